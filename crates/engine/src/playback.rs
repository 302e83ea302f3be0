//! Playback controller: sequential consumption of the segment queue.
//!
//! Owns the live queue and the single active renderer. Dequeues in index
//! order, shows a segment's text in the same coordinator step its audio
//! starts (never earlier), skips segments whose renderer cannot be built,
//! and fires the pre-generation trigger exactly once per topic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use lektra_providers::{event_names, AudioClip, AudioOutput, EventSinkRef, RenderOutcome, RendererHandle};

use crate::constants::{PREGEN_PROGRESS_RATIO, PREGEN_REMAINING_SEGMENTS};
use crate::events::Event;
use crate::queue::SegmentQueue;
use crate::state::{StateChange, StateOwner};

/// Result of a `play_next` attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PlayAdvance {
    /// A renderer is now live for this segment index.
    Started(u32),
    /// The queue is empty; nothing is rendering.
    Drained,
    /// Paused, or a renderer is already live; nothing changed.
    Blocked,
}

struct ActiveRenderer {
    index: u32,
    handle: Box<dyn RendererHandle>,
    paused: bool,
}

pub(crate) struct PlaybackController {
    pub queue: SegmentQueue,
    active: Option<ActiveRenderer>,
    pregen_triggered: bool,
    /// The live topic stream has delivered its final segment.
    pub stream_complete: bool,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self {
            queue: SegmentQueue::new(),
            active: None,
            pregen_triggered: false,
            stream_complete: false,
        }
    }

    pub fn active_index(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.index)
    }

    pub fn has_paused_renderer(&self) -> bool {
        self.active.as_ref().map(|a| a.paused).unwrap_or(false)
    }

    /// Dequeue and start rendering the next segment.
    ///
    /// Idempotent when paused or when a renderer is already live. A segment
    /// whose renderer cannot be constructed is marked completed and skipped;
    /// playback never stalls on one bad segment.
    pub fn play_next(
        &mut self,
        state: &mut StateOwner,
        output: &Arc<dyn AudioOutput>,
        sink: &EventSinkRef,
        events_tx: &mpsc::Sender<Event>,
    ) -> PlayAdvance {
        if state.playback().is_paused || self.active.is_some() {
            return PlayAdvance::Blocked;
        }

        loop {
            let Some(segment) = self.queue.pop_next() else {
                state.apply(StateChange::PlaybackIdle);
                return PlayAdvance::Drained;
            };

            let (done_tx, done_rx) = oneshot::channel();
            match output.start(AudioClip::new(segment.audio.clone()), done_tx) {
                Ok(handle) => {
                    self.active = Some(ActiveRenderer {
                        index: segment.index,
                        handle,
                        paused: false,
                    });
                    state.apply(StateChange::PlaybackStarted {
                        index: segment.index,
                    });
                    // Rendering has begun; the text becomes visible in this
                    // same coordinator step and never before.
                    sink.emit(
                        event_names::SEGMENT_TEXT,
                        json!({
                            "index": segment.index,
                            "kind": segment.kind,
                            "text": segment.text,
                        }),
                    );
                    forward_completion(segment.index, done_rx, events_tx.clone());
                    tracing::debug!(index = segment.index, "segment rendering");
                    return PlayAdvance::Started(segment.index);
                }
                Err(e) => {
                    tracing::warn!(
                        index = segment.index,
                        error = %e,
                        "renderer construction failed, skipping segment"
                    );
                    state.apply(StateChange::SegmentCompleted);
                }
            }
        }
    }

    /// Freeze the active renderer (user pause).
    pub fn pause_active(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if !active.paused {
                active.handle.pause();
                active.paused = true;
            }
        }
    }

    /// Pause for a tentative barge-in, recording the pause point.
    ///
    /// Returns `None` when no renderer is live (e.g. speech during the
    /// post-reply decision window).
    pub fn pause_for_barge_in(&mut self) -> Option<(u32, Duration)> {
        let active = self.active.as_mut()?;
        let offset = active.handle.offset();
        if !active.paused {
            active.handle.pause();
            active.paused = true;
        }
        Some((active.index, offset))
    }

    /// Resume a paused renderer in place. Returns false when there is none.
    pub fn resume_from_pause(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) if active.paused => {
                active.handle.resume();
                active.paused = false;
                true
            }
            _ => false,
        }
    }

    /// Permanently discard the active renderer (confirmed barge-in).
    ///
    /// The renderer's completion fires `Stopped`, which the coordinator
    /// ignores because the active slot is already empty.
    pub fn discard_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.handle.stop();
            tracing::debug!(index = active.index, "renderer discarded");
        }
    }

    /// Halt rendering for shutdown. Same mechanics as discard.
    pub fn halt(&mut self) {
        self.discard_active();
    }

    /// Clear the completion slot after the renderer reported done.
    pub fn finish_active(&mut self, index: u32) -> bool {
        match &self.active {
            Some(active) if active.index == index => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Whether the pre-generation threshold was just crossed. Latches: true
    /// at most once per topic.
    pub fn should_trigger_pregen(&mut self, completed: usize, total: usize) -> bool {
        if self.pregen_triggered || total == 0 {
            return false;
        }
        let ratio = completed as f64 / total as f64;
        let remaining = total.saturating_sub(completed);
        if ratio > PREGEN_PROGRESS_RATIO || remaining <= PREGEN_REMAINING_SEGMENTS {
            self.pregen_triggered = true;
            tracing::info!(completed, total, "pre-generation threshold crossed");
            true
        } else {
            false
        }
    }

    /// Reset queue and latches for a fresh topic.
    pub fn reset_for_topic(&mut self) {
        self.queue = SegmentQueue::new();
        self.pregen_triggered = false;
        self.stream_complete = false;
    }
}

fn forward_completion(index: u32, done: oneshot::Receiver<RenderOutcome>, tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let outcome = done
            .await
            .unwrap_or_else(|_| RenderOutcome::Failed("renderer dropped".to_string()));
        let _ = tx.send(Event::SegmentDone { index, outcome }).await;
    });
}
