//! Session state owner.
//!
//! All engine flags live behind one owner object: components request changes
//! through [`StateChange`] messages and every write funnels through
//! [`StateOwner::apply`], which validates phase transitions, keeps the
//! playback invariants, and emits a snapshot event after each accepted
//! change. Nothing else in the engine mutates session state.

use serde::Serialize;

use lektra_providers::{event_names, EventSinkRef};

/// The mutually exclusive session phases. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Thinking,
    Speaking,
    Interrupted,
    UserSpeaking,
    ProcessingUtterance,
    Paused,
    Error,
}

/// Delivery mode of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Narrated segments streamed from the source and rendered locally.
    DirectAudio,
    /// Fallback after a mid-stream delivery failure: the surrounding
    /// conversational mode takes over, the engine stops driving playback.
    Conversational,
}

/// Progress of the active topic's playback.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_paused: bool,
    /// Index of the rendering segment. `Some` only while playing.
    pub current_index: Option<u32>,
    pub completed: usize,
    pub total: usize,
}

/// Read-only view handed to event consumers.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub phase: SessionPhase,
    pub mode: SessionMode,
    pub playback: PlaybackState,
}

/// A requested state mutation.
#[derive(Debug, Clone)]
pub(crate) enum StateChange {
    Phase(SessionPhase),
    /// Enter Paused, remembering the phase to restore.
    PauseEntered,
    /// Leave Paused, restoring the remembered phase.
    PauseExited,
    PlaybackStarted { index: u32 },
    SegmentCompleted,
    TotalAnnounced { total: usize },
    /// Queue drained; nothing is rendering.
    PlaybackIdle,
    /// Counters reset for a fresh topic.
    TopicReset,
    /// Rewind: completed jumps back to a replay point.
    CompletedReset { completed: usize },
    Mode(SessionMode),
    /// Full reset on stop.
    Reset,
}

pub(crate) struct StateOwner {
    phase: SessionPhase,
    paused_from: Option<SessionPhase>,
    mode: SessionMode,
    playback: PlaybackState,
    sink: EventSinkRef,
}

/// Phase transition table from the session state machine.
fn transition_allowed(from: SessionPhase, to: SessionPhase) -> bool {
    use SessionPhase::*;
    if from == to || to == Idle || to == Error {
        return true;
    }
    matches!(
        (from, to),
        (Idle, Thinking)
            | (Thinking, Speaking)
            | (Speaking, Thinking)
            | (Speaking, Interrupted)
            | (Speaking, Paused)
            | (Interrupted, Speaking)
            | (Interrupted, UserSpeaking)
            | (Interrupted, Paused)
            | (UserSpeaking, ProcessingUtterance)
            | (UserSpeaking, Paused)
            | (ProcessingUtterance, Thinking)
            | (ProcessingUtterance, Speaking)
            | (Paused, Speaking)
            | (Paused, Interrupted)
            | (Paused, UserSpeaking)
            | (Error, Idle)
    )
}

impl StateOwner {
    pub fn new(sink: EventSinkRef) -> Self {
        Self {
            phase: SessionPhase::Idle,
            paused_from: None,
            mode: SessionMode::DirectAudio,
            playback: PlaybackState::default(),
            sink,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            phase: self.phase,
            mode: self.mode,
            playback: self.playback.clone(),
        }
    }

    /// The single write path. Invalid phase transitions are logged and
    /// dropped; everything accepted is followed by a snapshot emission.
    pub fn apply(&mut self, change: StateChange) {
        match change {
            StateChange::Phase(next) => {
                if !transition_allowed(self.phase, next) {
                    tracing::warn!(from = ?self.phase, to = ?next, "rejected phase transition");
                    return;
                }
                self.phase = next;
                if next == SessionPhase::Idle || next == SessionPhase::Error {
                    self.paused_from = None;
                }
            }
            StateChange::PauseEntered => {
                if !transition_allowed(self.phase, SessionPhase::Paused) {
                    tracing::warn!(from = ?self.phase, "rejected pause");
                    return;
                }
                self.paused_from = Some(self.phase);
                self.phase = SessionPhase::Paused;
                self.playback.is_paused = true;
            }
            StateChange::PauseExited => {
                if self.phase != SessionPhase::Paused {
                    return;
                }
                self.phase = self.paused_from.take().unwrap_or(SessionPhase::Speaking);
                self.playback.is_paused = false;
            }
            StateChange::PlaybackStarted { index } => {
                self.playback.is_playing = true;
                self.playback.current_index = Some(index);
            }
            StateChange::SegmentCompleted => {
                self.playback.completed += 1;
                // completed <= total must hold even before the source has
                // announced every segment.
                if self.playback.total < self.playback.completed {
                    self.playback.total = self.playback.completed;
                }
            }
            StateChange::TotalAnnounced { total } => {
                self.playback.total = total.max(self.playback.completed);
            }
            StateChange::PlaybackIdle => {
                self.playback.is_playing = false;
                self.playback.current_index = None;
            }
            StateChange::TopicReset => {
                self.playback = PlaybackState {
                    is_paused: self.playback.is_paused,
                    ..PlaybackState::default()
                };
            }
            StateChange::CompletedReset { completed } => {
                self.playback.completed = completed.min(self.playback.total);
                self.playback.is_playing = false;
                self.playback.current_index = None;
            }
            StateChange::Mode(mode) => {
                self.mode = mode;
            }
            StateChange::Reset => {
                self.phase = SessionPhase::Idle;
                self.paused_from = None;
                self.playback = PlaybackState::default();
            }
        }

        self.sink.emit(
            event_names::STATE_CHANGED,
            serde_json::to_value(self.snapshot()).unwrap_or_default(),
        );
    }
}
