//! Event types and EventBus
//!
//! Job lifecycle events are broadcast to any number of subscribers
//! (progress reporting, persistence, an external dashboard bridge).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Hip metrics event types
///
/// Job states travel as their lowercase wire names so this crate does not
/// depend on the engine's state enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HipmEvent {
    /// A job was created or reset to pending
    JobEnqueued {
        input_id: String,
        /// True when an existing terminal job was force-reset
        forced: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A job committed a state transition
    JobStateChanged {
        input_id: String,
        old_state: String,
        new_state: String,
        attempt: u32,
        /// Error message for transitions into `failed`
        error: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A job completed and its record is available
    JobCompleted {
        input_id: String,
        /// True when the record carries a critical recorded error
        critical: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch run drained its queue
    BatchFinished {
        batch_id: Uuid,
        completed: usize,
        failed: usize,
        dead: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl HipmEvent {
    /// Event type name, matching the serde tag
    pub fn event_type(&self) -> &str {
        match self {
            HipmEvent::JobEnqueued { .. } => "JobEnqueued",
            HipmEvent::JobStateChanged { .. } => "JobStateChanged",
            HipmEvent::JobCompleted { .. } => "JobCompleted",
            HipmEvent::BatchFinished { .. } => "BatchFinished",
        }
    }

    /// Input identifier for job events
    pub fn input_id(&self) -> Option<&str> {
        match self {
            HipmEvent::JobEnqueued { input_id, .. }
            | HipmEvent::JobStateChanged { input_id, .. }
            | HipmEvent::JobCompleted { input_id, .. } => Some(input_id),
            HipmEvent::BatchFinished { .. } => None,
        }
    }
}

/// Broadcast event bus
///
/// Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HipmEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<HipmEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    pub fn emit(
        &self,
        event: HipmEvent,
    ) -> Result<usize, broadcast::error::SendError<HipmEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: HipmEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
