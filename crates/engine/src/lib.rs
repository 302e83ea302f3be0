//! Lecture playback and barge-in interruption engine.
//!
//! Plays a streamed sequence of narrated lecture segments, keeps displayed
//! text synchronized with audio start, and arbitrates between "the lecture
//! is speaking" and "the user wants to interrupt" on a single serialized
//! coordinator.

mod barge_in;
mod collector;
pub mod constants;
mod continuity;
mod dispatcher;
mod events;
mod playback;
mod queue;
mod session;
mod state;

pub use dispatcher::VisualAsset;
pub use events::SessionCommand;
pub use session::{LectureSession, SessionConfig, SessionHandle};
pub use state::{PlaybackState, SessionMode, SessionPhase, StateSnapshot};

use lektra_providers::ProviderError;
use lektra_segment::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("curriculum has no topic at position {0}")]
    NoSuchTopic(usize),
}

pub type Result<T> = std::result::Result<T, EngineError>;
