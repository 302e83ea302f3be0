//! Capability contracts consumed by the lecture engine.
//!
//! Every external collaborator (segment streaming, capture/VAD, STT, LLM,
//! TTS, audio rendering, progress persistence, UI events) is specified here
//! as a trait; concrete providers register with the [`CapabilityRegistry`]
//! and are resolved once at session start.

mod audio;
mod registry;
mod sink;
mod source;
mod speech;

pub use audio::{
    AudioClip, AudioOutput, CaptureHandle, CaptureSource, CaptureStream, RenderOutcome,
    RendererHandle,
};
pub use registry::{CapabilityRegistry, SelectedCapabilities};
pub use sink::{
    event_names, EmittedEvent, EventSink, EventSinkRef, InMemoryEventSink, NullEventSink,
    ProgressSink,
};
pub use source::{SegmentSink, SegmentSource, SourceEvent};
pub use speech::{
    AudioChunkStream, AudioFormat, ChatMessage, CompletionConfig, LanguageModel,
    RecognitionStream, Role, SpeechRecognizer, SpeechSynthesizer, TokenChunk, TokenStream,
};

/// Failure taxonomy shared by all capability providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Missing identifiers or configuration; not retryable.
    #[error("stream setup failed: {0}")]
    StreamSetup(String),
    /// Mid-stream delivery failure from the segment source.
    #[error("stream delivery failed: {0}")]
    StreamDelivery(String),
    /// Malformed or undecodable audio for one segment.
    #[error("render failed: {0}")]
    Render(String),
    /// STT failure during interruption handling.
    #[error("recognition failed: {0}")]
    Recognition(String),
    /// TTS failure for a spoken reply or announcement.
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    /// No provider configured for a capability.
    #[error("no {0} provider available")]
    Unavailable(&'static str),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
