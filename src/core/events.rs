//! Change notification
//!
//! The engine buffers a [`ChangeEvent`] for every successful mutation while
//! a transaction is open and hands them to the [`EventBus`] only after the
//! commit succeeded. Rolled-back work never reaches subscribers.
//!
//! ```rust,ignore
//! let bus = EventBus::new(1024);
//! let mut rx = bus.subscribe();
//!
//! if let Ok(envelope) = rx.recv().await {
//!     println!("{} {:?}", envelope.event.action(), envelope.event.entity_type());
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Entity mutations; `id` is the JSON form of the primary key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EntityEvent {
    Created {
        entity_type: String,
        id: Value,
        data: Value,
    },
    Updated {
        entity_type: String,
        id: Value,
    },
    Deleted {
        entity_type: String,
        id: Value,
    },
}

/// Relation mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LinkEvent {
    Deleted {
        source_type: String,
        source_id: Value,
        navigation: String,
        target_id: Value,
    },
}

/// Anything subscribers can be told about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Entity(EntityEvent),
    Link(LinkEvent),
}

impl ChangeEvent {
    pub fn event_kind(&self) -> &str {
        match self {
            ChangeEvent::Entity(_) => "entity",
            ChangeEvent::Link(_) => "link",
        }
    }

    /// Type of the changed entity, or of the relation's source
    pub fn entity_type(&self) -> &str {
        match self {
            ChangeEvent::Entity(
                EntityEvent::Created { entity_type, .. }
                | EntityEvent::Updated { entity_type, .. }
                | EntityEvent::Deleted { entity_type, .. },
            ) => entity_type,
            ChangeEvent::Link(LinkEvent::Deleted { source_type, .. }) => source_type,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            ChangeEvent::Entity(EntityEvent::Created { .. }) => "created",
            ChangeEvent::Entity(EntityEvent::Updated { .. }) => "updated",
            ChangeEvent::Entity(EntityEvent::Deleted { .. })
            | ChangeEvent::Link(LinkEvent::Deleted { .. }) => "deleted",
        }
    }
}

/// Envelope wrapping an event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: ChangeEvent,
}

impl EventEnvelope {
    pub fn new(event: ChangeEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Broadcast-based event bus
///
/// Cheap to clone; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// `capacity` is how many events a slow receiver may fall behind
    /// before it starts losing them
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers; returns how many received it
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let envelope = EventEnvelope::new(event);
        // no receivers is not an error
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
