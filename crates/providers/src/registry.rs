//! Capability registry resolved once at session start.
//!
//! Replaces scattered "is this capability configured" checks with a single
//! resolution step: providers are registered in preference order and the
//! first available one per capability is selected. Required capabilities
//! (segment source, audio output, capture) fail resolution when absent;
//! STT/LLM/TTS/progress are optional and the engine degrades without them.

use std::sync::Arc;

use crate::audio::{AudioOutput, CaptureSource};
use crate::sink::ProgressSink;
use crate::source::SegmentSource;
use crate::speech::{LanguageModel, SpeechRecognizer, SpeechSynthesizer};
use crate::ProviderError;

#[derive(Default)]
pub struct CapabilityRegistry {
    sources: Vec<Arc<dyn SegmentSource>>,
    recognizers: Vec<Arc<dyn SpeechRecognizer>>,
    models: Vec<Arc<dyn LanguageModel>>,
    synthesizers: Vec<Arc<dyn SpeechSynthesizer>>,
    outputs: Vec<Arc<dyn AudioOutput>>,
    captures: Vec<Arc<dyn CaptureSource>>,
    progress_sinks: Vec<Arc<dyn ProgressSink>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(mut self, source: Arc<dyn SegmentSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn register_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizers.push(recognizer);
        self
    }

    pub fn register_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.models.push(model);
        self
    }

    pub fn register_synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizers.push(synthesizer);
        self
    }

    pub fn register_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn register_capture(mut self, capture: Arc<dyn CaptureSource>) -> Self {
        self.captures.push(capture);
        self
    }

    pub fn register_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sinks.push(sink);
        self
    }

    /// Resolve the preferred provider per capability.
    ///
    /// Registration order is preference order. Missing required capabilities
    /// make resolution fail; missing optional ones resolve to `None` and the
    /// engine degrades (questions are skipped, announcements are silent).
    pub fn resolve(&self) -> Result<SelectedCapabilities, ProviderError> {
        let source = self
            .sources
            .first()
            .cloned()
            .ok_or(ProviderError::Unavailable("segment source"))?;
        let output = self
            .outputs
            .first()
            .cloned()
            .ok_or(ProviderError::Unavailable("audio output"))?;
        let capture = self
            .captures
            .first()
            .cloned()
            .ok_or(ProviderError::Unavailable("capture"))?;

        let selected = SelectedCapabilities {
            source,
            output,
            capture,
            recognizer: self.recognizers.first().cloned(),
            model: self.models.first().cloned(),
            synthesizer: self.synthesizers.first().cloned(),
            progress: self.progress_sinks.first().cloned(),
        };

        tracing::info!(
            recognizer = selected.recognizer.is_some(),
            model = selected.model.is_some(),
            synthesizer = selected.synthesizer.is_some(),
            progress = selected.progress.is_some(),
            "capabilities resolved"
        );

        Ok(selected)
    }
}

/// The providers selected for one session.
#[derive(Clone)]
pub struct SelectedCapabilities {
    pub source: Arc<dyn SegmentSource>,
    pub output: Arc<dyn AudioOutput>,
    pub capture: Arc<dyn CaptureSource>,
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
    pub model: Option<Arc<dyn LanguageModel>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl SelectedCapabilities {
    /// Whether the full interruption Q&A path (STT + LLM + TTS) is usable.
    pub fn supports_questions(&self) -> bool {
        self.recognizer.is_some() && self.model.is_some() && self.synthesizer.is_some()
    }
}
