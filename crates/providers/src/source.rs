//! Segment streaming source contract.
//!
//! The source delivers lecture segments for one topic in ascending index
//! order. Text and audio for an index may arrive in either order; delivery
//! goes through a typed channel owned by the coordinator rather than
//! callbacks, so subscription lifetime is explicit.

use async_trait::async_trait;
use tokio::sync::mpsc;

use lektra_segment::{SegmentKind, TopicRef, VoiceProfile};

/// One delivery from the streaming source.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// Display text for a segment index.
    Text {
        index: u32,
        kind: SegmentKind,
        text: String,
    },
    /// Narrated audio for a segment index.
    Audio { index: u32, audio: Vec<u8> },
    /// The topic stream finished; no further events will arrive.
    Complete,
    /// Mid-stream delivery failure. Terminal for this stream.
    Error(String),
}

/// Producer half handed to a [`SegmentSource`] implementation.
///
/// Sends are awaited so a slow consumer exerts backpressure on the source
/// instead of unbounded buffering. All methods are fire-and-forget on a
/// closed channel (the session went away).
#[derive(Clone)]
pub struct SegmentSink {
    tx: mpsc::Sender<SourceEvent>,
}

impl SegmentSink {
    /// Create a sink plus the receiver the coordinator drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SourceEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn text(&self, index: u32, kind: SegmentKind, text: impl Into<String>) {
        self.post(SourceEvent::Text {
            index,
            kind,
            text: text.into(),
        })
        .await;
    }

    pub async fn audio(&self, index: u32, audio: Vec<u8>) {
        self.post(SourceEvent::Audio { index, audio }).await;
    }

    pub async fn complete(&self) {
        self.post(SourceEvent::Complete).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.post(SourceEvent::Error(message.into())).await;
    }

    async fn post(&self, event: SourceEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("segment sink closed, dropping source event");
        }
    }
}

/// Streaming source of lecture segments for a topic.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Stream all segments of `topic` into `sink`.
    ///
    /// Implementations must deliver ascending indices and finish with either
    /// `Complete` or `Error`. Returns early setup failures (missing
    /// identifiers, no connection) as `ProviderError::StreamSetup`.
    async fn stream_segments(
        &self,
        topic: &TopicRef,
        voice: &VoiceProfile,
        sink: SegmentSink,
    ) -> crate::Result<()>;
}
