//! Broadcasting of lifecycle events.

pub mod lifecycle_events;

pub use lifecycle_events::{EntityKind, EventBroadcaster, LifecycleEvent};
