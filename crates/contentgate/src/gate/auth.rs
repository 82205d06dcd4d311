//! Principals, roles and permissions.
//!
//! Authentication happens outside this crate; callers arrive as an
//! `Option<&Principal>` where `None` means unauthenticated.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Ordered privilege tiers. `Owner` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    ManageContent,
    ManageJobs,
    ExecuteActions,
}

const OWNER_PERMISSIONS: &[Permission] = &[
    Permission::ManageContent,
    Permission::ManageJobs,
    Permission::ExecuteActions,
];
const ADMIN_PERMISSIONS: &[Permission] = &[Permission::ManageContent, Permission::ManageJobs];
const OPERATOR_PERMISSIONS: &[Permission] = &[Permission::ManageContent];

impl Role {
    pub const HIGHEST: Role = Role::Owner;

    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Owner => OWNER_PERMISSIONS,
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Operator => OPERATOR_PERMISSIONS,
            Role::Viewer => &[],
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "VIEWER",
            Role::Operator => "OPERATOR",
            Role::Admin => "ADMIN",
            Role::Owner => "OWNER",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "VIEWER" => Some(Role::Viewer),
            "OPERATOR" => Some(Role::Operator),
            "ADMIN" => Some(Role::Admin),
            "OWNER" => Some(Role::Owner),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Audit name for a possibly-absent caller.
pub fn principal_label(principal: Option<&Principal>) -> &str {
    principal.map(|p| p.id.as_str()).unwrap_or("anonymous")
}

pub fn require_authenticated(principal: Option<&Principal>) -> Result<&Principal> {
    principal.ok_or(CoreError::Unauthorized)
}

/// Requires at least `min` on the role ladder.
pub fn require_role<'a>(
    principal: Option<&'a Principal>,
    min: Role,
    operation: &'static str,
) -> Result<&'a Principal> {
    let p = require_authenticated(principal)?;
    if p.role < min {
        tracing::warn!(principal = %p.id, role = %p.role, operation, "Forbidden: role too low");
        return Err(CoreError::Forbidden {
            principal: p.id.clone(),
            role: p.role,
            operation,
            required: format!("role {} or higher", min),
        });
    }
    Ok(p)
}

pub fn require_permission<'a>(
    principal: Option<&'a Principal>,
    permission: Permission,
    operation: &'static str,
) -> Result<&'a Principal> {
    let p = require_authenticated(principal)?;
    if !p.role.has(permission) {
        tracing::warn!(principal = %p.id, role = %p.role, operation, "Forbidden: missing permission");
        return Err(CoreError::Forbidden {
            principal: p.id.clone(),
            role: p.role,
            operation,
            required: format!("permission {:?}", permission),
        });
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_order() {
        assert!(Role::Viewer < Role::Operator);
        assert!(Role::Operator < Role::Admin);
        assert!(Role::Admin < Role::Owner);
        assert_eq!(Role::HIGHEST, Role::Owner);
    }

    #[test]
    fn test_permissions_by_role() {
        assert!(Role::Operator.has(Permission::ManageContent));
        assert!(!Role::Operator.has(Permission::ManageJobs));
        assert!(Role::Admin.has(Permission::ManageJobs));
        assert!(!Role::Admin.has(Permission::ExecuteActions));
        assert!(Role::Owner.has(Permission::ExecuteActions));
        assert!(Role::Viewer.permissions().is_empty());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("owner"), Some(Role::Owner));
        assert_eq!(Role::from_str("root"), None);
    }

    #[test]
    fn test_require_role() {
        let admin = Principal::new("a1", Role::Admin);
        assert!(require_role(Some(&admin), Role::Operator, "enqueue").is_ok());

        let err = require_role(Some(&admin), Role::Owner, "execute").unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert!(err.to_string().contains("requires role OWNER or higher"));

        let err = require_role(None, Role::Viewer, "list").unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn test_require_permission() {
        let viewer = Principal::new("v1", Role::Viewer);
        assert!(require_permission(Some(&viewer), Permission::ManageContent, "check").is_err());
        let op = Principal::new("o1", Role::Operator);
        assert!(require_permission(Some(&op), Permission::ManageContent, "check").is_ok());
    }

    #[test]
    fn test_principal_label() {
        assert_eq!(principal_label(None), "anonymous");
        let p = Principal::new("u7", Role::Viewer);
        assert_eq!(principal_label(Some(&p)), "u7");
    }
}
