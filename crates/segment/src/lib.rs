use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Repository trait for the durable segment cache.
/// Implemented by the storage layer, allowing the engine to remain decoupled.
pub trait SegmentStore: Send + Sync {
    /// Persist a segment for a topic. Idempotent per (topic, index).
    fn cache_segment(&self, topic_id: &str, segment: &Segment) -> Result<(), StoreError>;

    /// All cached segments for a topic with `index >= from`, ascending.
    fn segments_from(&self, topic_id: &str, from: u32) -> Result<Vec<Segment>, StoreError>;

    /// All cached segments for a topic, ascending by index.
    fn all_segments(&self, topic_id: &str) -> Result<Vec<Segment>, StoreError>;

    /// Drop every cached segment for one topic.
    fn clear_topic(&self, topic_id: &str) -> Result<(), StoreError>;

    /// Drop the whole cache (session end).
    fn clear_all(&self) -> Result<(), StoreError>;
}

/// Kind of lecture content a segment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Narration,
    Question,
}

/// One unit of lecture content: narrated text plus its audio, delivered in
/// index order by the streaming source. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u32,
    pub kind: SegmentKind,
    pub text: String,
    pub audio: Arc<[u8]>,
}

impl Segment {
    pub fn new(
        index: u32,
        kind: SegmentKind,
        text: impl Into<String>,
        audio: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            index,
            kind,
            text: text.into(),
            audio: audio.into(),
        }
    }
}

/// A cached segment row: the segment plus the topic it belongs to.
#[derive(Debug, Clone)]
pub struct CachedSegment {
    pub topic_id: String,
    pub segment: Segment,
    pub created_at: DateTime<Utc>,
}

/// Identifies one topic inside a curriculum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRef {
    pub curriculum_id: String,
    pub topic_id: String,
    pub title: String,
}

impl TopicRef {
    pub fn new(
        curriculum_id: impl Into<String>,
        topic_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            curriculum_id: curriculum_id.into(),
            topic_id: topic_id.into(),
            title: title.into(),
        }
    }
}

/// Voice settings forwarded to the streaming source and the synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub voice_id: String,
    pub speed: f32,
    #[serde(default)]
    pub language: Option<String>,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            voice_id: "nova".to_string(),
            speed: 1.0,
            language: None,
        }
    }
}
