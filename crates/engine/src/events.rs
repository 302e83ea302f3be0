//! Coordinator event types.
//!
//! Everything that can change engine state arrives as one of these events on
//! the coordinator channel; physically concurrent producers (source streams,
//! renderer completions, timers, off-coordinator round trips, the session
//! handle) never touch state directly.

use lektra_providers::{RenderOutcome, SourceEvent};

/// External request posted through the session handle.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Pause,
    Resume,
    Stop,
    /// Rebuild the queue from the cache starting at this index.
    GoBack { to: u32 },
    /// Convenience: rewind one segment from the current position.
    GoBackOne,
}

/// Phase progress reported by a running dispatch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchStage {
    Thinking,
    Speaking,
}

pub(crate) enum Event {
    /// Delivery from a topic stream. The id tells live and continuity (and
    /// stale, cancelled) streams apart.
    Source { stream_id: u64, event: SourceEvent },
    /// The renderer for `index` finished, failed or was stopped.
    SegmentDone {
        index: u32,
        outcome: RenderOutcome,
    },
    /// The barge-in confirmation window for this episode expired.
    ConfirmElapsed { episode: u64 },
    /// The post-reply decision window for this episode expired.
    DecisionElapsed { episode: u64 },
    /// Recognition finished. `None` means the recognizer failed; both the
    /// failure and an empty transcript count as a false alarm.
    Transcribed {
        episode: u64,
        transcript: Option<String>,
    },
    /// A dispatch task moved to a new phase.
    DispatchStage {
        episode: u64,
        stage: DispatchStage,
    },
    /// The spoken reply (or visual confirmation) finished playing.
    ReplyDone { episode: u64 },
    /// The dispatch task failed; degrade to resume.
    DispatchFailed { episode: u64 },
    Command(SessionCommand),
}
