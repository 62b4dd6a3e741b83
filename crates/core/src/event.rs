//! Domain event system — observe a turn's progress without coupling to it.
//!
//! The orchestrator publishes events as a turn moves through its states.
//! The CLI's verbose mode and tests subscribe; nobody is required to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::turn::Role;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user turn began processing
    TurnStarted {
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A model response was obtained
    ModelCalled {
        conversation_id: String,
        model: String,
        /// Served from the response cache
        cached: bool,
        /// Transport attempts made (0 on a cache hit)
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// A plugin was invoked
    PluginInvoked {
        conversation_id: String,
        plugin: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A turn was durably appended
    TurnCommitted {
        conversation_id: String,
        role: Role,
        seq: u64,
        timestamp: DateTime<Utc>,
    },

    /// The user turn reached `Done`
    TurnCompleted {
        conversation_id: String,
        steps: u32,
        timestamp: DateTime<Utc>,
    },

    /// The user turn reached `Failed`
    TurnFailed {
        conversation_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::PluginInvoked {
            conversation_id: "c1".into(),
            plugin: "calculator".into(),
            success: true,
            duration_ms: 3,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::PluginInvoked { plugin, success, .. } => {
                assert_eq!(plugin, "calculator");
                assert!(success);
            }
            _ => panic!("Expected PluginInvoked event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TurnFailed {
            conversation_id: "c1".into(),
            error: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
