//! Shared mocks and harness for engine integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use lektra_bus::{CaptureBus, CaptureBusReceiver, CaptureBusSender, CaptureFrame, VadVerdict};
use lektra_cache::SqliteSegmentCache;
use lektra_engine::{LectureSession, SessionConfig, SessionHandle};
use lektra_providers::{
    AudioChunkStream, AudioClip, AudioFormat, AudioOutput, CapabilityRegistry, CaptureHandle,
    CaptureSource, CaptureStream, ChatMessage, CompletionConfig, EventSinkRef, InMemoryEventSink,
    LanguageModel, ProgressSink, ProviderError, RecognitionStream, RenderOutcome, RendererHandle,
    SegmentSink, SegmentSource, SourceEvent, SpeechRecognizer, SpeechSynthesizer, TokenChunk,
    TokenStream,
};
use lektra_segment::{SegmentKind, TopicRef, VoiceProfile};

/// Audio payload the mock output refuses to render.
pub const BAD_AUDIO: &[u8] = &[0xFF];

pub fn segment_audio(index: u32) -> Vec<u8> {
    vec![index as u8; 8]
}

pub fn topic(id: &str, title: &str) -> TopicRef {
    TopicRef::new("course-1", id, title)
}

/// Text + audio for `n` segments, then completion.
pub fn script_segments(n: u32) -> Vec<SourceEvent> {
    let mut events = Vec::new();
    for i in 0..n {
        events.push(SourceEvent::Text {
            index: i,
            kind: SegmentKind::Narration,
            text: format!("segment {i}"),
        });
        events.push(SourceEvent::Audio {
            index: i,
            audio: segment_audio(i),
        });
    }
    events.push(SourceEvent::Complete);
    events
}

/// Let the coordinator and its spawned tasks drain without advancing time.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused test time (fires due timers) and settle.
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

// --- Segment source -------------------------------------------------------

/// Source whose deliveries are driven by the test through a channel.
#[derive(Default)]
pub struct ManualSource {
    channels: Mutex<HashMap<String, mpsc::UnboundedReceiver<SourceEvent>>>,
    pub calls: Mutex<Vec<String>>,
}

impl ManualSource {
    /// Prepare the feed for a topic; must be called before the engine
    /// requests the stream.
    pub fn feed_for(&self, topic_id: &str) -> mpsc::UnboundedSender<SourceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().unwrap().insert(topic_id.to_string(), rx);
        tx
    }

    pub fn calls_for(&self, topic_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.as_str() == topic_id)
            .count()
    }
}

#[async_trait]
impl SegmentSource for ManualSource {
    async fn stream_segments(
        &self,
        topic: &TopicRef,
        _voice: &VoiceProfile,
        sink: SegmentSink,
    ) -> lektra_providers::Result<()> {
        self.calls.lock().unwrap().push(topic.topic_id.clone());
        let feed = self.channels.lock().unwrap().remove(&topic.topic_id);
        let Some(mut feed) = feed else {
            return Err(ProviderError::StreamSetup(format!(
                "no feed for {}",
                topic.topic_id
            )));
        };
        while let Some(event) = feed.recv().await {
            match event {
                SourceEvent::Text { index, kind, text } => sink.text(index, kind, text).await,
                SourceEvent::Audio { index, audio } => sink.audio(index, audio).await,
                SourceEvent::Complete => sink.complete().await,
                SourceEvent::Error(message) => sink.error(message).await,
            }
        }
        Ok(())
    }
}

// --- Audio output ---------------------------------------------------------

#[derive(Default)]
pub struct ClipControl {
    pub paused: bool,
    pub resumed: bool,
    pub stopped: bool,
    done: Option<oneshot::Sender<RenderOutcome>>,
}

pub struct RenderedClip {
    pub audio: Vec<u8>,
    pub control: Arc<Mutex<ClipControl>>,
}

/// Records every started renderer; completion is driven by the test.
#[derive(Clone, Default)]
pub struct MockOutput {
    clips: Arc<Mutex<Vec<RenderedClip>>>,
}

impl MockOutput {
    pub fn clip_count(&self) -> usize {
        self.clips.lock().unwrap().len()
    }

    pub fn audio_of(&self, i: usize) -> Vec<u8> {
        self.clips.lock().unwrap()[i].audio.clone()
    }

    pub fn control_of(&self, i: usize) -> Arc<Mutex<ClipControl>> {
        self.clips.lock().unwrap()[i].control.clone()
    }

    /// Complete clip `i` as fully played.
    pub fn finish(&self, i: usize) {
        let done = self.clips.lock().unwrap()[i]
            .control
            .lock()
            .unwrap()
            .done
            .take();
        if let Some(done) = done {
            let _ = done.send(RenderOutcome::Completed);
        }
    }

    /// Index of the first clip whose audio equals `audio`, if any.
    pub fn find_clip(&self, audio: &[u8]) -> Option<usize> {
        self.clips
            .lock()
            .unwrap()
            .iter()
            .position(|c| c.audio == audio)
    }
}

struct MockRenderer {
    control: Arc<Mutex<ClipControl>>,
}

impl RendererHandle for MockRenderer {
    fn pause(&mut self) {
        self.control.lock().unwrap().paused = true;
    }

    fn resume(&mut self) {
        let mut control = self.control.lock().unwrap();
        control.paused = false;
        control.resumed = true;
    }

    fn stop(&mut self) {
        let mut control = self.control.lock().unwrap();
        control.stopped = true;
        if let Some(done) = control.done.take() {
            let _ = done.send(RenderOutcome::Stopped);
        }
    }

    fn offset(&self) -> Duration {
        Duration::from_millis(1500)
    }
}

impl AudioOutput for MockOutput {
    fn start(
        &self,
        clip: AudioClip,
        done: oneshot::Sender<RenderOutcome>,
    ) -> lektra_providers::Result<Box<dyn RendererHandle>> {
        if clip.audio.as_ref() == BAD_AUDIO {
            return Err(ProviderError::Render("undecodable clip".to_string()));
        }
        let control = Arc::new(Mutex::new(ClipControl {
            done: Some(done),
            ..Default::default()
        }));
        self.clips.lock().unwrap().push(RenderedClip {
            audio: clip.audio.to_vec(),
            control: control.clone(),
        });
        Ok(Box::new(MockRenderer { control }))
    }
}

// --- Capture --------------------------------------------------------------

pub struct MockCapture {
    receiver: Mutex<Option<CaptureBusReceiver>>,
    pub sender: CaptureBusSender,
    pub stopped: Arc<AtomicBool>,
}

impl MockCapture {
    pub fn new() -> Self {
        let mut bus = CaptureBus::new();
        let sender = bus.sender();
        Self {
            receiver: Mutex::new(bus.take_receiver()),
            sender,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct MockCaptureHandle {
    stopped: Arc<AtomicBool>,
}

impl CaptureHandle for MockCaptureHandle {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

impl CaptureSource for MockCapture {
    fn start(&self) -> lektra_providers::Result<CaptureStream> {
        let frames = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or(ProviderError::Unavailable("capture"))?;
        Ok(CaptureStream {
            handle: Box::new(MockCaptureHandle {
                stopped: self.stopped.clone(),
            }),
            frames,
        })
    }
}

fn frame_samples(ms: u64) -> Vec<f32> {
    vec![0.0; (16 * ms) as usize]
}

/// One speech frame of 20 ms at the given confidence.
pub fn send_speech(sender: &CaptureBusSender, confidence: f32) {
    sender.send(0, 16000, frame_samples(20), VadVerdict::speech(confidence));
}

/// Silence frames totalling `ms`, in 100 ms steps.
pub fn send_silence(sender: &CaptureBusSender, ms: u64) {
    let mut remaining = ms;
    while remaining > 0 {
        let step = remaining.min(100);
        sender.send(0, 16000, frame_samples(step), VadVerdict::silence());
        remaining -= step;
    }
}

// --- Recognition / completion / synthesis ---------------------------------

pub struct MockRecognizer {
    pub transcript: Mutex<String>,
    pub starts: Arc<AtomicUsize>,
    pub pushed: Arc<AtomicUsize>,
}

impl MockRecognizer {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: Mutex::new(transcript.to_string()),
            starts: Arc::new(AtomicUsize::new(0)),
            pushed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_transcript(&self, transcript: &str) {
        *self.transcript.lock().unwrap() = transcript.to_string();
    }
}

struct MockRecognitionStream {
    transcript: String,
    pushed: Arc<AtomicUsize>,
}

#[async_trait]
impl RecognitionStream for MockRecognitionStream {
    async fn push(&mut self, _frame: &CaptureFrame) -> lektra_providers::Result<()> {
        self.pushed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> lektra_providers::Result<String> {
        Ok(self.transcript)
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn start_stream(
        &self,
        _format: AudioFormat,
    ) -> lektra_providers::Result<Box<dyn RecognitionStream>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRecognitionStream {
            transcript: self.transcript.lock().unwrap().clone(),
            pushed: self.pushed.clone(),
        }))
    }
}

pub struct MockModel {
    pub reply: String,
    pub prompts: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl MockModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        _config: &CompletionConfig,
    ) -> lektra_providers::Result<TokenStream> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let tokens: Vec<String> = self
            .reply
            .split_whitespace()
            .map(|w| format!("{w} "))
            .collect();
        Ok(Box::pin(async_stream::stream! {
            for token in tokens {
                yield Ok(TokenChunk { content: token, is_done: false });
            }
            yield Ok(TokenChunk { content: String::new(), is_done: true });
        }))
    }
}

pub struct MockSynthesizer {
    pub spoken: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            spoken: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceProfile,
    ) -> lektra_providers::Result<AudioChunkStream> {
        self.spoken.lock().unwrap().push(text.to_string());
        let bytes = text.as_bytes().to_vec();
        Ok(Box::pin(async_stream::stream! {
            yield Ok(bytes);
        }))
    }
}

pub struct MockProgress {
    pub saves: Arc<Mutex<Vec<(String, usize, usize)>>>,
}

impl MockProgress {
    pub fn new() -> Self {
        Self {
            saves: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ProgressSink for MockProgress {
    async fn save_progress(
        &self,
        topic: &TopicRef,
        completed: usize,
        total: usize,
    ) -> lektra_providers::Result<()> {
        self.saves
            .lock()
            .unwrap()
            .push((topic.topic_id.clone(), completed, total));
        Ok(())
    }
}

// --- Harness --------------------------------------------------------------

pub struct Harness {
    pub handle: SessionHandle,
    pub sink: Arc<InMemoryEventSink>,
    pub output: MockOutput,
    pub capture: Arc<MockCapture>,
    pub source: Arc<ManualSource>,
    pub recognizer: Arc<MockRecognizer>,
    pub model: Arc<MockModel>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub progress: Arc<MockProgress>,
    pub store: Arc<SqliteSegmentCache>,
    pub feeds: HashMap<String, mpsc::UnboundedSender<SourceEvent>>,
}

impl Harness {
    /// Start a session over `curriculum` with feeds prepared for every topic.
    pub fn start(
        curriculum: Vec<TopicRef>,
        configure: impl FnOnce(&mut SessionConfig),
    ) -> Harness {
        let source = Arc::new(ManualSource::default());
        let mut feeds = HashMap::new();
        for t in &curriculum {
            feeds.insert(t.topic_id.clone(), source.feed_for(&t.topic_id));
        }

        let sink: Arc<InMemoryEventSink> = Arc::new(InMemoryEventSink::new());
        let output = MockOutput::default();
        let capture = Arc::new(MockCapture::new());
        let recognizer = Arc::new(MockRecognizer::new(""));
        let model = Arc::new(MockModel::new("Great question. Shall we continue?"));
        let synthesizer = Arc::new(MockSynthesizer::new());
        let progress = Arc::new(MockProgress::new());
        let store = Arc::new(SqliteSegmentCache::open_in_memory().unwrap());

        let registry = CapabilityRegistry::new()
            .register_source(source.clone())
            .register_output(Arc::new(output.clone()))
            .register_capture(capture.clone())
            .register_recognizer(recognizer.clone())
            .register_model(model.clone())
            .register_synthesizer(synthesizer.clone())
            .register_progress_sink(progress.clone());

        let mut config = SessionConfig::new(curriculum);
        configure(&mut config);

        let sink_ref: EventSinkRef = sink.clone();
        let handle = LectureSession::start(&registry, store.clone(), sink_ref, config)
            .expect("session start");

        Harness {
            handle,
            sink,
            output,
            capture,
            source,
            recognizer,
            model,
            synthesizer,
            progress,
            store,
            feeds,
        }
    }

    pub fn feed(&self, topic_id: &str) -> &mpsc::UnboundedSender<SourceEvent> {
        self.feeds.get(topic_id).expect("feed prepared")
    }

    /// Send a scripted list of events on a topic's feed.
    pub fn deliver(&self, topic_id: &str, events: Vec<SourceEvent>) {
        let feed = self.feed(topic_id);
        for event in events {
            let _ = feed.send(event);
        }
    }

    /// The phase string of the most recent state snapshot.
    pub fn last_phase(&self) -> String {
        self.sink
            .events_for(lektra_providers::event_names::STATE_CHANGED)
            .last()
            .and_then(|e| e.payload["phase"].as_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Segment texts shown so far, in order.
    pub fn shown_texts(&self) -> Vec<String> {
        self.sink
            .events_for(lektra_providers::event_names::SEGMENT_TEXT)
            .iter()
            .map(|e| e.payload["text"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}
