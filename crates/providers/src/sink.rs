//! Outbound sinks: UI event emission and progress persistence.
//!
//! The event sink abstraction decouples the engine from any particular UI
//! layer, enabling unit testing and headless operation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lektra_segment::TopicRef;

/// Trait for emitting events to subscribers.
pub trait EventSink: Send + Sync {
    /// Emit an event with a JSON payload.
    ///
    /// # Arguments
    /// * `topic` - Event name/topic (e.g., "lecture:segment_text")
    /// * `payload` - JSON payload to emit
    fn emit(&self, topic: &str, payload: serde_json::Value);
}

/// Type alias for a shared event sink reference.
pub type EventSinkRef = Arc<dyn EventSink>;

/// Durable progress persistence. Best-effort: the engine never blocks
/// playback on the result.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn save_progress(
        &self,
        topic: &TopicRef,
        completed: usize,
        total: usize,
    ) -> crate::Result<()>;
}

/// In-memory event sink for testing.
///
/// Captures all emitted events for later inspection.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<EmittedEvent>>,
}

/// A captured event from [`InMemoryEventSink`].
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured events.
    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Get events for a specific topic.
    pub fn events_for(&self, topic: &str) -> Vec<EmittedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        self.events.lock().unwrap().push(EmittedEvent {
            topic: topic.to_string(),
            payload,
        });
    }
}

/// No-op event sink that discards all events.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _topic: &str, _payload: serde_json::Value) {
        // Intentionally empty
    }
}

/// Event names as constants to prevent typos.
pub mod event_names {
    /// Session state snapshot after every accepted change.
    pub const STATE_CHANGED: &str = "session:state_changed";
    /// Display text for the segment whose audio just started.
    pub const SEGMENT_TEXT: &str = "lecture:segment_text";
    /// Per-segment playback progress.
    pub const PLAYBACK_PROGRESS: &str = "playback:progress";
    /// Incremental assistant answer tokens.
    pub const ASSISTANT_PARTIAL: &str = "assistant:partial";
    /// Full assistant answer once the stream finishes.
    pub const ASSISTANT_RESPONSE: &str = "assistant:response";
    /// A matching visual asset should be shown.
    pub const VISUAL_SHOW: &str = "visual:show";
    /// Topic hand-off happened.
    pub const TOPIC_CHANGED: &str = "lecture:topic_changed";
    /// The whole session finished (no next topic).
    pub const SESSION_COMPLETED: &str = "session:completed";
}
