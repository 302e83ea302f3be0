//! Topic continuity: pre-generation of the next topic and hand-off data.
//!
//! Once the current topic crosses the progress threshold, the next topic's
//! segments are streamed into a separate queue while playback continues.
//! The live queue is never touched until hand-off. The pre-generation
//! stream is cancellable; stop and hand-off both consume the state.

use tokio_util::sync::CancellationToken;

use lektra_providers::SourceEvent;
use lektra_segment::{SegmentStore, TopicRef};

use crate::queue::SegmentQueue;

pub(crate) struct ContinuityState {
    /// Stream id used to route this topic's source events.
    pub stream_id: u64,
    pub next_topic: TopicRef,
    pub queue: SegmentQueue,
    pub stream_complete: bool,
    pub failed: bool,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub(crate) struct ContinuityManager {
    state: Option<ContinuityState>,
}

impl ContinuityManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn stream_id(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.stream_id)
    }

    /// Create pre-generation state for the next topic.
    ///
    /// Returns the cancellation token for the stream task. Calling while a
    /// pre-generation is already running is a bug guarded by the caller's
    /// exactly-once trigger.
    pub fn begin(&mut self, stream_id: u64, next_topic: TopicRef) -> CancellationToken {
        let cancel = CancellationToken::new();
        tracing::info!(
            topic_id = %next_topic.topic_id,
            "pre-generating next topic"
        );
        self.state = Some(ContinuityState {
            stream_id,
            next_topic,
            queue: SegmentQueue::new(),
            stream_complete: false,
            failed: false,
            cancel: cancel.clone(),
        });
        cancel
    }

    /// Apply one source event from the pre-generation stream.
    ///
    /// Completed segments are cached under the next topic so replay works
    /// immediately after hand-off.
    pub fn apply(&mut self, event: SourceEvent, store: &dyn SegmentStore) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            SourceEvent::Text { index, kind, text } => {
                if let Some(segment) = state.queue.offer_text(index, kind, text) {
                    if let Err(e) = store.cache_segment(&state.next_topic.topic_id, &segment) {
                        tracing::warn!(error = %e, "failed to cache pre-generated segment");
                    }
                }
            }
            SourceEvent::Audio { index, audio } => {
                if let Some(segment) = state.queue.offer_audio(index, audio) {
                    if let Err(e) = store.cache_segment(&state.next_topic.topic_id, &segment) {
                        tracing::warn!(error = %e, "failed to cache pre-generated segment");
                    }
                }
            }
            SourceEvent::Complete => {
                state.stream_complete = true;
                tracing::info!(
                    topic_id = %state.next_topic.topic_id,
                    segments = state.queue.ready_len(),
                    "pre-generation complete"
                );
            }
            SourceEvent::Error(message) => {
                tracing::warn!(message, "pre-generation stream failed");
                state.failed = true;
            }
        }
    }

    /// Whether hand-off data is usable right now.
    pub fn ready(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| !s.failed && (s.stream_complete || !s.queue.is_empty()))
            .unwrap_or(false)
    }

    /// Consume the continuity state for hand-off.
    pub fn take(&mut self) -> Option<ContinuityState> {
        self.state.take()
    }

    /// Abandon pre-generation, cancelling the stream task.
    pub fn cancel(&mut self) {
        if let Some(state) = self.state.take() {
            state.cancel.cancel();
            tracing::debug!(
                topic_id = %state.next_topic.topic_id,
                "pre-generation cancelled"
            );
        }
    }
}
