//! State-transition events for observability surfaces.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which kind of record changed state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Schedule,
    Keyword,
    Content,
    Approval,
    SystemFlag,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Job => write!(f, "job"),
            EntityKind::Schedule => write!(f, "schedule"),
            EntityKind::Keyword => write!(f, "keyword"),
            EntityKind::Content => write!(f, "content"),
            EntityKind::Approval => write!(f, "approval"),
            EntityKind::SystemFlag => write!(f, "system_flag"),
        }
    }
}

/// One successful state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: EntityKind,
    pub id: String,
    /// Previous state; `None` when the record was just created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    /// Who caused the change; `None` for system-initiated transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn created(kind: EntityKind, id: &str, state: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            id: id.to_string(),
            from: None,
            to: state.to_string(),
            principal: None,
            timestamp,
        }
    }

    pub fn transition(
        kind: EntityKind,
        id: &str,
        from: &str,
        to: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            id: id.to_string(),
            from: Some(from.to_string()),
            to: to.to_string(),
            principal: None,
            timestamp,
        }
    }

    pub fn by(mut self, principal: &str) -> Self {
        self.principal = Some(principal.to_string());
        self
    }
}

/// Fans lifecycle events out to any number of subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<LifecycleEvent>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: LifecycleEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}
