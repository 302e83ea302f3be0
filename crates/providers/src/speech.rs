//! Speech and language capability contracts: STT, LLM and TTS.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use lektra_bus::CaptureFrame;
use lektra_segment::VoiceProfile;

/// Audio format negotiated with the recognizer when a stream opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: lektra_bus::SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// An open recognition stream: push buffered frames, then finish to obtain
/// the final transcript.
#[async_trait]
pub trait RecognitionStream: Send {
    /// Feed one captured frame to the recognizer.
    async fn push(&mut self, frame: &CaptureFrame) -> crate::Result<()>;

    /// Close the stream and wait for the final transcript.
    ///
    /// An empty string is a valid result and means no speech was recognized.
    async fn finish(self: Box<Self>) -> crate::Result<String>;
}

/// Speech-to-text capability.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start_stream(&self, format: AudioFormat) -> crate::Result<Box<dyn RecognitionStream>>;
}

/// Role of a chat message sent to the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Completion tuning knobs. Defaults are provider-chosen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// One streamed completion token.
#[derive(Debug, Clone)]
pub struct TokenChunk {
    pub content: String,
    pub is_done: bool,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = crate::Result<TokenChunk>> + Send>>;

/// Large-language-model capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
    ) -> crate::Result<TokenStream>;
}

pub type AudioChunkStream = Pin<Box<dyn Stream<Item = crate::Result<Vec<u8>>> + Send>>;

/// Text-to-speech capability.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceProfile) -> crate::Result<AudioChunkStream>;
}
