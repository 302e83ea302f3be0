//! Barge-in detection: the tentative -> confirmed interruption protocol.
//!
//! While the lecture is speaking, the monitor watches VAD verdicts. A
//! qualifying frame opens a tentative episode: playback pauses and a
//! confirmation timer starts. A second qualifying frame inside the window
//! confirms the interruption; expiry resolves it as a false positive.
//! Episodes carry monotonically increasing ids so a timer that fires after
//! the episode was resolved is recognized as stale and dropped; resolution
//! is a single compare-and-clear on the coordinator.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lektra_bus::CaptureFrame;

use crate::constants::BARGE_IN_CONFIDENCE;

/// Live interruption bookkeeping. Exists only while an interruption is in
/// progress; reset to empty on resolution.
pub(crate) struct BargeInState {
    pub episode: u64,
    pub tentative: bool,
    pub confirmed: bool,
    /// Segment that was rendering when the interruption began.
    pub pause_index: u32,
    /// Offset into that segment at the pause.
    pub pause_offset: Duration,
    /// Every frame observed since the episode began.
    pub collected: Vec<CaptureFrame>,
    pub has_detected_speech: bool,
    /// Accumulated continuous silence while collecting the utterance.
    pub silence_ms: u64,
    /// Cancels the confirmation timer task.
    pub confirm_cancel: CancellationToken,
}

/// Does this frame qualify as a barge-in attempt?
pub(crate) fn qualifies(frame: &CaptureFrame) -> bool {
    frame.verdict.is_speech && frame.verdict.confidence > BARGE_IN_CONFIDENCE
}

#[derive(Default)]
pub(crate) struct BargeInMonitor {
    state: Option<BargeInState>,
    episodes: u64,
}

impl BargeInMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tentative(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| s.tentative && !s.confirmed)
            .unwrap_or(false)
    }

    pub fn current_episode(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.episode)
    }

    /// Open a tentative episode at the given pause point.
    ///
    /// Returns the episode id and the cancellation token the caller uses to
    /// spawn the confirmation timer. The triggering frame is the first entry
    /// of the collected audio.
    pub fn begin_tentative(
        &mut self,
        pause_index: u32,
        pause_offset: Duration,
        trigger: CaptureFrame,
    ) -> (u64, CancellationToken) {
        self.episodes += 1;
        let token = CancellationToken::new();
        tracing::info!(
            episode = self.episodes,
            pause_index,
            pause_offset_ms = pause_offset.as_millis() as u64,
            "tentative barge-in"
        );
        self.state = Some(BargeInState {
            episode: self.episodes,
            tentative: true,
            confirmed: false,
            pause_index,
            pause_offset,
            collected: vec![trigger],
            has_detected_speech: false,
            silence_ms: 0,
            confirm_cancel: token.clone(),
        });
        (self.episodes, token)
    }

    /// Observe a frame during the tentative stage. Returns true when the
    /// frame reconfirms the interruption.
    pub fn observe_tentative(&mut self, frame: CaptureFrame) -> bool {
        let Some(state) = self.state.as_mut() else {
            return false;
        };
        if !state.tentative || state.confirmed {
            return false;
        }
        let reconfirmed = qualifies(&frame);
        state.collected.push(frame);
        reconfirmed
    }

    /// Promote the current episode to confirmed, cancelling its timer.
    ///
    /// Confirmation required qualifying speech frames, so the collector
    /// starts out with speech already detected.
    pub fn confirm(&mut self) -> Option<u64> {
        let state = self.state.as_mut()?;
        state.confirm_cancel.cancel();
        state.tentative = false;
        state.confirmed = true;
        state.has_detected_speech = true;
        state.silence_ms = 0;
        tracing::info!(episode = state.episode, "barge-in confirmed");
        Some(state.episode)
    }

    /// Resolve a confirmation-window expiry as a false positive.
    ///
    /// The compare-and-clear: only the live, still-tentative episode with a
    /// matching id resolves; anything else is a stale timer and is ignored.
    /// Returns the recorded pause point on resolution.
    pub fn resolve_false_positive(&mut self, episode: u64) -> Option<(u32, Duration)> {
        match &self.state {
            Some(s) if s.episode == episode && s.tentative && !s.confirmed => {}
            _ => return None,
        }
        let state = self.state.take()?;
        tracing::info!(episode, "barge-in false positive, resuming");
        Some((state.pause_index, state.pause_offset))
    }

    /// Mutable access for the utterance-collection stage.
    pub fn state_mut(&mut self) -> Option<&mut BargeInState> {
        self.state.as_mut()
    }

    /// Finalize the utterance: hand the collected frames out and clear.
    pub fn take_collected(&mut self) -> Option<(u64, Vec<CaptureFrame>)> {
        let state = self.state.take()?;
        Some((state.episode, state.collected))
    }

    /// Drop any in-flight episode, cancelling its timer.
    pub fn clear(&mut self) {
        if let Some(state) = self.state.take() {
            state.confirm_cancel.cancel();
        }
    }
}
