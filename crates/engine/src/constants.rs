//! Tuning constants for the playback and interruption pipeline.
//!
//! These are deliberately constants, not configuration: the values were
//! settled empirically and no runtime tuning surface exists.

/// Minimum VAD confidence for a frame to count as a barge-in attempt
/// while the lecture is speaking.
pub const BARGE_IN_CONFIDENCE: f32 = 0.7;

/// Length of the confirmation window after a tentative interruption.
/// A second qualifying frame inside the window confirms the barge-in;
/// expiry resumes playback.
pub const CONFIRM_WINDOW_MS: u64 = 600;

/// Continuous silence that ends the user's utterance. Also used as the
/// post-reply decision window before playback resumes.
pub const END_OF_UTTERANCE_SILENCE_MS: u64 = 1_000;

/// Minimum confidence for a frame to count as speech while collecting
/// an utterance.
pub const SPEECH_FLOOR_CONFIDENCE: f32 = 0.3;

/// Progress ratio past which the next topic is pre-generated.
pub const PREGEN_PROGRESS_RATIO: f64 = 0.7;

/// Remaining-segment count that also triggers pre-generation.
pub const PREGEN_REMAINING_SEGMENTS: usize = 3;

/// Capacity of the per-topic source event channel.
pub const SOURCE_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the coordinator event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
