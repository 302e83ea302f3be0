//! Utterance collection after a confirmed interruption.
//!
//! Buffers every captured frame while the user speaks and decides when the
//! utterance is over: once speech has been heard, accumulated continuous
//! silence of `END_OF_UTTERANCE_SILENCE_MS` finalizes the utterance. Silence
//! is measured from frame durations, which keeps the decision independent of
//! wall-clock scheduling.

use lektra_bus::CaptureFrame;

use crate::barge_in::BargeInState;
use crate::constants::{END_OF_UTTERANCE_SILENCE_MS, SPEECH_FLOOR_CONFIDENCE};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CollectOutcome {
    /// Keep listening.
    Continue,
    /// The utterance is over; flush the collected audio to recognition.
    Finalize,
}

/// Feed one frame to the collector.
pub(crate) fn collect_frame(state: &mut BargeInState, frame: CaptureFrame) -> CollectOutcome {
    let is_speech =
        frame.verdict.is_speech && frame.verdict.confidence > SPEECH_FLOOR_CONFIDENCE;
    let duration_ms = frame.duration_ms();
    state.collected.push(frame);

    if is_speech {
        state.has_detected_speech = true;
        state.silence_ms = 0;
        return CollectOutcome::Continue;
    }

    if !state.has_detected_speech {
        // Nothing heard yet; wait for the user to actually speak.
        return CollectOutcome::Continue;
    }

    state.silence_ms += duration_ms;
    if state.silence_ms >= END_OF_UTTERANCE_SILENCE_MS {
        tracing::debug!(
            frames = state.collected.len(),
            silence_ms = state.silence_ms,
            "end of utterance"
        );
        CollectOutcome::Finalize
    } else {
        CollectOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lektra_bus::VadVerdict;
    use tokio_util::sync::CancellationToken;

    fn state() -> BargeInState {
        BargeInState {
            episode: 1,
            tentative: false,
            confirmed: true,
            pause_index: 0,
            pause_offset: Duration::ZERO,
            collected: Vec::new(),
            has_detected_speech: false,
            silence_ms: 0,
            confirm_cancel: CancellationToken::new(),
        }
    }

    fn frame_ms(ms: u64, verdict: VadVerdict) -> CaptureFrame {
        let samples = vec![0.0f32; (16 * ms) as usize];
        CaptureFrame::new(0, 0, 16000, samples, verdict)
    }

    #[test]
    fn silence_before_any_speech_never_finalizes() {
        let mut st = state();
        for _ in 0..20 {
            let outcome = collect_frame(&mut st, frame_ms(100, VadVerdict::silence()));
            assert_eq!(outcome, CollectOutcome::Continue);
        }
        assert!(!st.has_detected_speech);
    }

    #[test]
    fn one_second_of_silence_after_speech_finalizes() {
        let mut st = state();
        // Two seconds of speech...
        for _ in 0..20 {
            collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.6)));
        }
        assert!(st.has_detected_speech);

        // ...then silence: finalizes exactly at the 1s mark.
        for _ in 0..9 {
            let outcome = collect_frame(&mut st, frame_ms(100, VadVerdict::silence()));
            assert_eq!(outcome, CollectOutcome::Continue);
        }
        let outcome = collect_frame(&mut st, frame_ms(100, VadVerdict::silence()));
        assert_eq!(outcome, CollectOutcome::Finalize);
    }

    #[test]
    fn speech_resets_the_silence_run() {
        let mut st = state();
        collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.6)));
        for _ in 0..8 {
            collect_frame(&mut st, frame_ms(100, VadVerdict::silence()));
        }
        // A brief resumption of speech clears the accumulated silence.
        collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.5)));
        assert_eq!(st.silence_ms, 0);

        for _ in 0..9 {
            let outcome = collect_frame(&mut st, frame_ms(100, VadVerdict::silence()));
            assert_eq!(outcome, CollectOutcome::Continue);
        }
    }

    #[test]
    fn low_confidence_speech_counts_as_silence() {
        let mut st = state();
        collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.6)));
        for _ in 0..9 {
            collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.2)));
        }
        let outcome = collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.1)));
        assert_eq!(outcome, CollectOutcome::Finalize);
    }

    #[test]
    fn every_frame_is_collected() {
        let mut st = state();
        collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.6)));
        collect_frame(&mut st, frame_ms(100, VadVerdict::silence()));
        collect_frame(&mut st, frame_ms(100, VadVerdict::speech(0.4)));
        assert_eq!(st.collected.len(), 3);
    }
}
