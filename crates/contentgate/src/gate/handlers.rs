//! Concrete side effects behind the execution gate, keyed by
//! `(action, category)`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::approval::ActionApproval;
use super::auth::Principal;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("No handler registered for action '{action}' in category '{category}'")]
    NoHandler { action: String, category: String },

    #[error("{0}")]
    Failed(String),
}

/// What a handler gets to see.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub approval: &'a ActionApproval,
    pub principal: &'a Principal,
    pub now: DateTime<Utc>,
}

/// Performs one approved action. A returned error leaves the approval
/// executable, so handlers should not commit partial effects.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, ctx: &ActionContext<'_>) -> Result<serde_json::Value, HandlerError>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ActionContext<'_>) -> Result<serde_json::Value, HandlerError> + Send + Sync,
{
    fn execute(&self, ctx: &ActionContext<'_>) -> Result<serde_json::Value, HandlerError> {
        self(ctx)
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`, replacing any previous one for the same key.
    pub fn register(
        &mut self,
        action: impl Into<String>,
        category: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) -> &mut Self {
        self.handlers
            .insert((action.into(), category.into()), Arc::new(handler));
        self
    }

    /// Registers a closure handler.
    pub fn register_fn<F>(
        &mut self,
        action: impl Into<String>,
        category: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(&ActionContext<'_>) -> Result<serde_json::Value, HandlerError> + Send + Sync + 'static,
    {
        self.register(action, category, handler)
    }

    pub fn contains(&self, action: &str, category: &str) -> bool {
        self.handlers
            .contains_key(&(action.to_string(), category.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, ctx: &ActionContext<'_>) -> Result<serde_json::Value, HandlerError> {
        let key = (ctx.approval.action.clone(), ctx.approval.category.clone());
        match self.handlers.get(&key) {
            Some(handler) => handler.execute(ctx),
            None => Err(HandlerError::NoHandler {
                action: key.0,
                category: key.1,
            }),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::approval::ApprovalStatus;
    use crate::gate::auth::Role;

    fn approval(action: &str, category: &str) -> ActionApproval {
        let now = Utc::now();
        ActionApproval {
            id: "ap-1".into(),
            action: action.into(),
            category: category.into(),
            target_id: "product-9".into(),
            payload: serde_json::json!({}),
            status: ApprovalStatus::Approved,
            proposed_by: "admin".into(),
            decided_by: Some("admin".into()),
            decided_at: Some(now),
            execution_in_progress: false,
            claimed_at: None,
            executed_at: None,
            executed_by: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_dispatch_by_key() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("PROMOTE", "marketing", |ctx| {
            Ok(serde_json::json!({ "promoted": ctx.approval.target_id }))
        });
        assert!(registry.contains("PROMOTE", "marketing"));
        assert_eq!(registry.len(), 1);

        let ap = approval("PROMOTE", "marketing");
        let owner = Principal::new("o", Role::Owner);
        let out = registry
            .dispatch(&ActionContext {
                approval: &ap,
                principal: &owner,
                now: Utc::now(),
            })
            .unwrap();
        assert_eq!(out["promoted"], "product-9");
    }

    #[test]
    fn test_missing_handler() {
        let registry = HandlerRegistry::new();
        let ap = approval("REVIEW", "seo");
        let owner = Principal::new("o", Role::Owner);
        let err = registry
            .dispatch(&ActionContext {
                approval: &ap,
                principal: &owner,
                now: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, HandlerError::NoHandler { .. }));
    }
}
