//! The lecture session coordinator.
//!
//! One task owns all mutable session state and drains two inputs: the
//! coordinator event channel (source deliveries, renderer completions,
//! timers, recognition results, commands) and the capture-frame bus.
//! Everything that runs concurrently (source streams, STT/LLM/TTS round
//! trips, the reply renderer, timers) re-enters through episode- or
//! stream-tagged events, so stale results are dropped by a single compare
//! on the coordinator.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lektra_bus::{CaptureBusReceiver, CaptureFrame};
use lektra_providers::{
    event_names, AudioFormat, CapabilityRegistry, CaptureHandle, EventSinkRef, RenderOutcome,
    SegmentSink, SelectedCapabilities, SourceEvent,
};
use lektra_segment::{Segment, SegmentStore, TopicRef, VoiceProfile};

use crate::barge_in::{self, BargeInMonitor};
use crate::collector::{self, CollectOutcome};
use crate::constants::{
    CONFIRM_WINDOW_MS, END_OF_UTTERANCE_SILENCE_MS, EVENT_CHANNEL_CAPACITY,
    SOURCE_CHANNEL_CAPACITY,
};
use crate::continuity::{ContinuityManager, ContinuityState};
use crate::dispatcher::{self, Dispatcher, InterruptionKind, VisualAsset};
use crate::events::{DispatchStage, Event, SessionCommand};
use crate::playback::{PlayAdvance, PlaybackController};
use crate::state::{SessionMode, SessionPhase, StateChange, StateOwner};
use crate::EngineError;

/// Static configuration for one lecture session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Topics in curriculum order; continuity walks this list.
    pub curriculum: Vec<TopicRef>,
    /// Position of the starting topic in `curriculum`.
    pub start_topic: usize,
    pub voice: VoiceProfile,
    /// Hand off to the next topic automatically when one finishes.
    pub auto_continue: bool,
    /// Reference visuals available to the interruption dispatcher.
    pub visual_assets: Vec<VisualAsset>,
}

impl SessionConfig {
    pub fn new(curriculum: Vec<TopicRef>) -> Self {
        Self {
            curriculum,
            start_topic: 0,
            voice: VoiceProfile::default(),
            auto_continue: true,
            visual_assets: Vec::new(),
        }
    }
}

/// Handle to a running session. Commands are posted to the coordinator;
/// `join` waits for it to finish.
pub struct SessionHandle {
    events_tx: mpsc::Sender<Event>,
    task: JoinHandle<()>,
    session_id: Uuid,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub async fn pause(&self) {
        self.send(SessionCommand::Pause).await;
    }

    pub async fn resume(&self) {
        self.send(SessionCommand::Resume).await;
    }

    /// Request shutdown. Safe to call repeatedly; the coordinator performs
    /// the teardown sequence once and later requests are dropped.
    pub async fn stop(&self) {
        self.send(SessionCommand::Stop).await;
    }

    /// Rebuild playback from the cache starting at segment `to`.
    pub async fn go_back(&self, to: u32) {
        self.send(SessionCommand::GoBack { to }).await;
    }

    pub async fn go_back_one(&self) {
        self.send(SessionCommand::GoBackOne).await;
    }

    /// Wait for the coordinator task to end.
    pub async fn join(self) {
        let _ = self.task.await;
    }

    /// Stop and wait for the teardown to finish.
    pub async fn shutdown(self) {
        self.stop().await;
        self.join().await;
    }

    async fn send(&self, command: SessionCommand) {
        if self
            .events_tx
            .send(Event::Command(command))
            .await
            .is_err()
        {
            tracing::debug!("session already ended, command dropped");
        }
    }
}

/// Entry point: resolve capabilities and launch the coordinator.
pub struct LectureSession;

impl LectureSession {
    pub fn start(
        registry: &CapabilityRegistry,
        store: Arc<dyn SegmentStore>,
        sink: EventSinkRef,
        config: SessionConfig,
    ) -> Result<SessionHandle, EngineError> {
        let mut state = StateOwner::new(sink.clone());

        let caps = match registry.resolve() {
            Ok(caps) => caps,
            Err(e) => {
                state.apply(StateChange::Phase(SessionPhase::Error));
                return Err(e.into());
            }
        };

        let topic = match config.curriculum.get(config.start_topic) {
            Some(topic) => topic.clone(),
            None => {
                state.apply(StateChange::Phase(SessionPhase::Error));
                return Err(EngineError::NoSuchTopic(config.start_topic));
            }
        };

        let capture = match caps.capture.start() {
            Ok(capture) => capture,
            Err(e) => {
                state.apply(StateChange::Phase(SessionPhase::Error));
                return Err(e.into());
            }
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session_id = Uuid::new_v4();

        state.apply(StateChange::Phase(SessionPhase::Thinking));

        let dispatcher = Dispatcher::new(config.visual_assets.clone());
        let mut session = Session {
            caps,
            store,
            sink,
            topic_pos: config.start_topic,
            topic: topic.clone(),
            config,
            state,
            playback: PlaybackController::new(),
            barge_in: BargeInMonitor::new(),
            continuity: ContinuityManager::new(),
            dispatcher,
            events_tx: events_tx.clone(),
            events_rx,
            frames: capture.frames,
            capture_handle: capture.handle,
            capture_open: true,
            live_stream_id: 0,
            stream_ids: 0,
            live_cancel: CancellationToken::new(),
            reply_cancel: None,
            dispatch_episode: None,
            awaiting_decision: None,
        };
        session.spawn_live_stream(topic);

        let task = tokio::spawn(session.run());
        Ok(SessionHandle {
            events_tx,
            task,
            session_id,
        })
    }
}

/// What to do once the live queue drains.
enum DrainPlan {
    /// More segments are on the way; wait.
    Wait,
    /// Curriculum exhausted (or auto-continue off): end the session.
    Complete,
    /// Transition to the next topic, with pre-generated data when ready.
    Handoff {
        next: TopicRef,
        pregen: Option<ContinuityState>,
    },
}

struct Session {
    caps: SelectedCapabilities,
    store: Arc<dyn SegmentStore>,
    sink: EventSinkRef,
    config: SessionConfig,
    state: StateOwner,
    playback: PlaybackController,
    barge_in: BargeInMonitor,
    continuity: ContinuityManager,
    dispatcher: Dispatcher,
    topic_pos: usize,
    topic: TopicRef,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    frames: CaptureBusReceiver,
    capture_handle: Box<dyn CaptureHandle>,
    capture_open: bool,
    live_stream_id: u64,
    stream_ids: u64,
    live_cancel: CancellationToken,
    /// Stops a reply renderer spawned by a dispatch task.
    reply_cancel: Option<CancellationToken>,
    /// Episode whose utterance is being processed or answered.
    dispatch_episode: Option<u64>,
    /// Episode waiting in the post-reply decision window.
    awaiting_decision: Option<u64>,
}

impl Session {
    async fn run(mut self) {
        tracing::info!(topic_id = %self.topic.topic_id, "lecture session started");
        loop {
            tokio::select! {
                maybe_event = self.events_rx.recv() => match maybe_event {
                    Some(event) => {
                        if self.handle_event(event).await.is_break() {
                            break;
                        }
                    }
                    None => break,
                },
                maybe_frame = self.frames.recv(), if self.capture_open => match maybe_frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => self.capture_open = false,
                },
            }
        }
        tracing::info!("lecture session ended");
    }

    // --- Event handling ---

    async fn handle_event(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Source { stream_id, event } => {
                if stream_id == self.live_stream_id {
                    self.on_live_source_event(event).await;
                } else if Some(stream_id) == self.continuity.stream_id() {
                    self.continuity.apply(event, self.store.as_ref());
                } else {
                    tracing::debug!(stream_id, "dropping event from stale stream");
                }
            }
            Event::SegmentDone { index, outcome } => self.on_segment_done(index, outcome).await,
            Event::ConfirmElapsed { episode } => {
                if self.barge_in.resolve_false_positive(episode).is_some() {
                    self.resume_after_interruption().await;
                }
            }
            Event::DecisionElapsed { episode } => {
                if self.awaiting_decision == Some(episode) {
                    self.resume_after_interruption().await;
                }
            }
            Event::Transcribed { episode, transcript } => {
                self.on_transcribed(episode, transcript).await;
            }
            Event::DispatchStage { episode, stage } => {
                if self.dispatch_episode == Some(episode) {
                    let phase = match stage {
                        DispatchStage::Thinking => SessionPhase::Thinking,
                        DispatchStage::Speaking => SessionPhase::Speaking,
                    };
                    self.state.apply(StateChange::Phase(phase));
                }
            }
            Event::ReplyDone { episode } => {
                if self.dispatch_episode == Some(episode) {
                    self.awaiting_decision = Some(episode);
                    self.spawn_decision_timer(episode);
                }
            }
            Event::DispatchFailed { episode } => {
                if self.dispatch_episode == Some(episode) {
                    self.resume_after_interruption().await;
                }
            }
            Event::Command(command) => return self.on_command(command).await,
        }
        ControlFlow::Continue(())
    }

    async fn on_command(&mut self, command: SessionCommand) -> ControlFlow<()> {
        match command {
            SessionCommand::Pause => {
                if matches!(
                    self.state.phase(),
                    SessionPhase::Speaking | SessionPhase::Interrupted | SessionPhase::UserSpeaking
                ) {
                    self.playback.pause_active();
                    self.state.apply(StateChange::PauseEntered);
                }
            }
            SessionCommand::Resume => {
                if self.state.phase() == SessionPhase::Paused {
                    self.state.apply(StateChange::PauseExited);
                    if !self.playback.resume_from_pause() {
                        self.advance_playback().await;
                    }
                }
            }
            SessionCommand::Stop => {
                self.shutdown();
                return ControlFlow::Break(());
            }
            SessionCommand::GoBack { to } => self.go_back(to).await,
            SessionCommand::GoBackOne => {
                let playback = self.state.playback();
                let current = playback
                    .current_index
                    .unwrap_or(playback.completed as u32);
                self.go_back(current.saturating_sub(1)).await;
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_live_source_event(&mut self, event: SourceEvent) {
        if self.state.mode() != SessionMode::DirectAudio {
            return;
        }
        match event {
            SourceEvent::Text { index, kind, text } => {
                let segment = self.playback.queue.offer_text(index, kind, text);
                self.state.apply(StateChange::TotalAnnounced {
                    total: self.playback.queue.announced_total(),
                });
                self.after_segment_arrival(segment).await;
            }
            SourceEvent::Audio { index, audio } => {
                let segment = self.playback.queue.offer_audio(index, audio);
                self.after_segment_arrival(segment).await;
            }
            SourceEvent::Complete => {
                self.playback.stream_complete = true;
                tracing::info!(topic_id = %self.topic.topic_id, "topic stream complete");
                let playback = self.state.playback();
                if !playback.is_playing
                    && !playback.is_paused
                    && self.playback.queue.is_empty()
                    && matches!(
                        self.state.phase(),
                        SessionPhase::Thinking | SessionPhase::Speaking
                    )
                {
                    self.advance_playback().await;
                }
            }
            SourceEvent::Error(message) => {
                tracing::warn!(message, "segment delivery failed, leaving direct-audio mode");
                self.playback.discard_active();
                self.playback.queue.clear();
                self.continuity.cancel();
                self.state.apply(StateChange::Mode(SessionMode::Conversational));
                self.state.apply(StateChange::PlaybackIdle);
                self.state.apply(StateChange::Phase(SessionPhase::Idle));
            }
        }
    }

    async fn after_segment_arrival(&mut self, segment: Option<Segment>) {
        let Some(segment) = segment else { return };
        if let Err(e) = self.store.cache_segment(&self.topic.topic_id, &segment) {
            tracing::warn!(error = %e, index = segment.index, "segment cache write failed");
        }
        let playback = self.state.playback();
        if !playback.is_playing
            && !playback.is_paused
            && matches!(
                self.state.phase(),
                SessionPhase::Thinking | SessionPhase::Speaking
            )
        {
            self.advance_playback().await;
        }
    }

    async fn on_segment_done(&mut self, index: u32, outcome: RenderOutcome) {
        if !self.playback.finish_active(index) {
            // Stale completion: the renderer was discarded (confirmed
            // barge-in or shutdown) before it reported back.
            return;
        }
        if outcome == RenderOutcome::Stopped {
            self.state.apply(StateChange::PlaybackIdle);
            return;
        }
        if let RenderOutcome::Failed(e) = &outcome {
            tracing::warn!(index, error = %e, "segment render failed, advancing");
        }

        self.state.apply(StateChange::SegmentCompleted);
        let playback = self.state.playback();
        self.sink.emit(
            event_names::PLAYBACK_PROGRESS,
            json!({
                "index": index,
                "completed": playback.completed,
                "total": playback.total,
            }),
        );
        self.persist_progress();
        self.maybe_trigger_pregen();
        self.advance_playback().await;
    }

    async fn on_transcribed(&mut self, episode: u64, transcript: Option<String>) {
        if self.dispatch_episode != Some(episode) {
            return;
        }
        let text = transcript.unwrap_or_default().trim().to_string();
        if text.is_empty() {
            tracing::debug!(episode, "empty transcript, resuming lecture");
            self.resume_after_interruption().await;
            return;
        }
        tracing::info!(episode, transcript = %text, "utterance transcribed");
        match self.dispatcher.classify(&text) {
            InterruptionKind::Visual { subject } => self.dispatch_visual(episode, subject),
            InterruptionKind::Question => self.dispatch_question(episode, text),
        }
    }

    // --- Frame handling (barge-in protocol) ---

    async fn handle_frame(&mut self, frame: CaptureFrame) {
        match self.state.phase() {
            SessionPhase::Speaking => {
                if barge_in::qualifies(&frame) {
                    self.enter_tentative(frame);
                }
            }
            SessionPhase::Interrupted => {
                if self.barge_in.observe_tentative(frame) {
                    self.confirm_barge_in();
                }
            }
            SessionPhase::UserSpeaking => {
                let finalize = match self.barge_in.state_mut() {
                    Some(state) => collector::collect_frame(state, frame) == CollectOutcome::Finalize,
                    None => false,
                };
                if finalize {
                    self.begin_transcription().await;
                }
            }
            _ => {}
        }
    }

    fn enter_tentative(&mut self, frame: CaptureFrame) {
        self.awaiting_decision = None;
        self.dispatch_episode = None;

        // Pause point: the live renderer, or the next queue position when
        // nothing is rendering (speech inside the decision window).
        let (pause_index, pause_offset) =
            self.playback.pause_for_barge_in().unwrap_or_else(|| {
                let next = self
                    .playback
                    .queue
                    .peek_index()
                    .unwrap_or(self.state.playback().completed as u32);
                (next, Duration::ZERO)
            });

        let (episode, cancel) = self
            .barge_in
            .begin_tentative(pause_index, pause_offset, frame);
        self.state.apply(StateChange::Phase(SessionPhase::Interrupted));
        self.spawn_confirm_timer(episode, cancel);
    }

    fn confirm_barge_in(&mut self) {
        self.barge_in.confirm();
        self.playback.discard_active();
        if let Some(cancel) = self.reply_cancel.take() {
            cancel.cancel();
        }
        self.state.apply(StateChange::Phase(SessionPhase::UserSpeaking));
    }

    async fn begin_transcription(&mut self) {
        let Some((episode, frames)) = self.barge_in.take_collected() else {
            return;
        };
        self.state
            .apply(StateChange::Phase(SessionPhase::ProcessingUtterance));
        self.dispatch_episode = Some(episode);

        let Some(recognizer) = self.caps.recognizer.clone() else {
            tracing::warn!("no recognizer configured, treating utterance as false alarm");
            self.resume_after_interruption().await;
            return;
        };

        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let mut stream = recognizer.start_stream(AudioFormat::default()).await?;
                for frame in &frames {
                    stream.push(frame).await?;
                }
                stream.finish().await
            }
            .await;
            let transcript = match result {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(error = %e, "recognition failed");
                    None
                }
            };
            let _ = tx.send(Event::Transcribed { episode, transcript }).await;
        });
    }

    // --- Interruption dispatch ---

    fn dispatch_visual(&mut self, episode: u64, subject: String) {
        let found = self.dispatcher.find_asset(&subject).cloned();
        if let Some(asset) = &found {
            self.sink.emit(
                event_names::VISUAL_SHOW,
                json!({
                    "asset_id": asset.asset_id,
                    "subject": asset.subject,
                    "caption": asset.caption,
                }),
            );
        }
        let spoken = match &found {
            Some(asset) => format!("Here's the {}.", asset.subject),
            None => format!("I don't have a visual for {subject} on hand."),
        };

        let tx = self.events_tx.clone();
        let synthesizer = self.caps.synthesizer.clone();
        let output = self.caps.output.clone();
        let voice = self.config.voice.clone();
        let cancel = CancellationToken::new();
        self.reply_cancel = Some(cancel.clone());
        tokio::spawn(async move {
            let _ = tx
                .send(Event::DispatchStage {
                    episode,
                    stage: DispatchStage::Speaking,
                })
                .await;
            if let Some(synthesizer) = synthesizer {
                if let Err(e) =
                    dispatcher::speak(&synthesizer, &output, &voice, &spoken, &cancel).await
                {
                    tracing::warn!(error = %e, "visual confirmation synthesis failed");
                }
            }
            let _ = tx.send(Event::ReplyDone { episode }).await;
        });
    }

    fn dispatch_question(&mut self, episode: u64, transcript: String) {
        let Some(model) = self.caps.model.clone() else {
            tracing::warn!("no language model configured, resuming lecture");
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(Event::DispatchFailed { episode }).await;
            });
            return;
        };

        let synthesizer = self.caps.synthesizer.clone();
        let output = self.caps.output.clone();
        let voice = self.config.voice.clone();
        let sink = self.sink.clone();
        let messages = dispatcher::build_messages(&self.topic.title, &transcript);
        let tx = self.events_tx.clone();
        let cancel = CancellationToken::new();
        self.reply_cancel = Some(cancel.clone());
        tokio::spawn(async move {
            let _ = tx
                .send(Event::DispatchStage {
                    episode,
                    stage: DispatchStage::Thinking,
                })
                .await;
            let answer = match dispatcher::stream_answer(&model, &sink, &messages).await {
                Ok(answer) if !answer.trim().is_empty() => answer,
                Ok(_) => {
                    let _ = tx.send(Event::DispatchFailed { episode }).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "completion failed");
                    let _ = tx.send(Event::DispatchFailed { episode }).await;
                    return;
                }
            };
            let _ = tx
                .send(Event::DispatchStage {
                    episode,
                    stage: DispatchStage::Speaking,
                })
                .await;
            if let Some(synthesizer) = synthesizer {
                if let Err(e) =
                    dispatcher::speak(&synthesizer, &output, &voice, &answer, &cancel).await
                {
                    tracing::warn!(error = %e, "reply synthesis failed");
                }
            }
            let _ = tx.send(Event::ReplyDone { episode }).await;
        });
    }

    /// The single re-entry point after any interruption outcome: false
    /// positive, empty transcript, dispatch failure, or the post-reply
    /// decision window expiring.
    async fn resume_after_interruption(&mut self) {
        self.barge_in.clear();
        self.dispatch_episode = None;
        self.awaiting_decision = None;
        if let Some(cancel) = self.reply_cancel.take() {
            cancel.cancel();
        }
        self.state.apply(StateChange::Phase(SessionPhase::Speaking));
        if !self.playback.resume_from_pause() {
            self.advance_playback().await;
        }
    }

    // --- Playback driving ---

    async fn advance_playback(&mut self) {
        loop {
            match self.playback.play_next(
                &mut self.state,
                &self.caps.output,
                &self.sink,
                &self.events_tx,
            ) {
                PlayAdvance::Started(_) => {
                    if self.state.phase() == SessionPhase::Thinking {
                        self.state.apply(StateChange::Phase(SessionPhase::Speaking));
                    }
                    self.maybe_trigger_pregen();
                    return;
                }
                PlayAdvance::Blocked => return,
                PlayAdvance::Drained => {
                    self.maybe_trigger_pregen();
                    match self.plan_after_drain() {
                        DrainPlan::Wait => return,
                        DrainPlan::Complete => {
                            self.complete_session();
                            return;
                        }
                        DrainPlan::Handoff { next, pregen } => {
                            self.perform_handoff(next, pregen).await;
                            // Loop again: play the new topic's first segment
                            // (or drain straight through an empty topic).
                        }
                    }
                }
            }
        }
    }

    fn plan_after_drain(&mut self) -> DrainPlan {
        if self.state.mode() != SessionMode::DirectAudio {
            return DrainPlan::Wait;
        }
        if !self.playback.stream_complete {
            return DrainPlan::Wait;
        }
        if !matches!(
            self.state.phase(),
            SessionPhase::Thinking | SessionPhase::Speaking
        ) {
            return DrainPlan::Wait;
        }
        if !self.config.auto_continue {
            return DrainPlan::Complete;
        }

        if self.continuity.ready() {
            let continuity = self.continuity.take().expect("ready implies state");
            return DrainPlan::Handoff {
                next: continuity.next_topic.clone(),
                pregen: Some(continuity),
            };
        }

        // Pre-generation missing or failed: attempt a fresh stream.
        self.continuity.cancel();
        match self.config.curriculum.get(self.topic_pos + 1).cloned() {
            Some(next) if !next.topic_id.is_empty() && !next.curriculum_id.is_empty() => {
                DrainPlan::Handoff { next, pregen: None }
            }
            Some(next) => {
                tracing::warn!(title = %next.title, "next topic is missing identifiers");
                DrainPlan::Complete
            }
            None => DrainPlan::Complete,
        }
    }

    async fn perform_handoff(&mut self, next: TopicRef, pregen: Option<ContinuityState>) {
        // Spoken transition, awaited before the swap.
        if let Some(synthesizer) = &self.caps.synthesizer {
            let announcement = format!("Moving on to {}.", next.title);
            let cancel = CancellationToken::new();
            if let Err(e) = dispatcher::speak(
                synthesizer,
                &self.caps.output,
                &self.config.voice,
                &announcement,
                &cancel,
            )
            .await
            {
                tracing::warn!(error = %e, "transition announcement failed");
            }
        }

        if let Err(e) = self.store.clear_topic(&self.topic.topic_id) {
            tracing::warn!(error = %e, "old topic cache clear failed");
        }
        self.live_cancel.cancel();

        let pregenerated = pregen.is_some();
        self.topic_pos += 1;
        self.topic = next.clone();
        self.playback.reset_for_topic();
        self.state.apply(StateChange::TopicReset);

        match pregen {
            Some(continuity) => {
                self.state.apply(StateChange::TotalAnnounced {
                    total: continuity.queue.announced_total(),
                });
                self.playback.queue = continuity.queue;
                self.playback.stream_complete = continuity.stream_complete;
                // Promote the (possibly still running) pre-generation stream
                // to the live stream.
                self.live_stream_id = continuity.stream_id;
                self.live_cancel = continuity.cancel;
            }
            None => {
                self.spawn_live_stream(next.clone());
                if self.state.phase() == SessionPhase::Speaking {
                    self.state.apply(StateChange::Phase(SessionPhase::Thinking));
                }
            }
        }

        self.sink.emit(
            event_names::TOPIC_CHANGED,
            json!({
                "topic_id": next.topic_id,
                "title": next.title,
                "pregenerated": pregenerated,
            }),
        );
        tracing::info!(topic_id = %next.topic_id, pregenerated, "topic hand-off");
    }

    fn maybe_trigger_pregen(&mut self) {
        let (completed, total) = {
            let playback = self.state.playback();
            (playback.completed, playback.total)
        };
        if !self.playback.should_trigger_pregen(completed, total) {
            return;
        }
        if self.continuity.is_active() {
            return;
        }
        let Some(next) = self.config.curriculum.get(self.topic_pos + 1).cloned() else {
            tracing::debug!("no next topic to pre-generate");
            return;
        };
        self.stream_ids += 1;
        let stream_id = self.stream_ids;
        let cancel = self.continuity.begin(stream_id, next.clone());
        self.spawn_topic_stream(next, stream_id, cancel);
    }

    async fn go_back(&mut self, to: u32) {
        match self.store.segments_from(&self.topic.topic_id, to) {
            Ok(segments) if !segments.is_empty() => {
                self.playback.discard_active();
                self.barge_in.clear();
                self.dispatch_episode = None;
                self.awaiting_decision = None;
                self.playback.queue.clear();
                for segment in segments {
                    self.playback.queue.push_ready(segment);
                }
                self.state
                    .apply(StateChange::CompletedReset { completed: to as usize });
                if self.state.phase() == SessionPhase::Idle {
                    self.state.apply(StateChange::Phase(SessionPhase::Thinking));
                }
                tracing::info!(to, "rewound playback from cache");
                self.advance_playback().await;
            }
            Ok(_) => tracing::warn!(to, "no cached segments to rewind to"),
            Err(e) => tracing::warn!(error = %e, "rewind failed"),
        }
    }

    fn complete_session(&mut self) {
        self.persist_progress();
        self.state.apply(StateChange::Phase(SessionPhase::Idle));
        self.sink.emit(
            event_names::SESSION_COMPLETED,
            json!({ "topic_id": self.topic.topic_id }),
        );
        tracing::info!("curriculum finished, session idle");
    }

    /// Teardown, in the required order: renderer, capture stream,
    /// confirmation timer. Everything after is cleanup.
    fn shutdown(&mut self) {
        tracing::info!("stopping lecture session");
        self.playback.halt();
        self.capture_handle.stop();
        self.frames.close();
        self.capture_open = false;
        self.barge_in.clear();
        if let Some(cancel) = self.reply_cancel.take() {
            cancel.cancel();
        }
        self.live_cancel.cancel();
        self.continuity.cancel();
        self.playback.queue.clear();
        self.dispatch_episode = None;
        self.awaiting_decision = None;
        self.persist_progress();
        if let Err(e) = self.store.clear_all() {
            tracing::warn!(error = %e, "cache clear failed");
        }
        self.state.apply(StateChange::Reset);
    }

    // --- Helpers ---

    fn spawn_live_stream(&mut self, topic: TopicRef) {
        self.stream_ids += 1;
        self.live_stream_id = self.stream_ids;
        self.live_cancel = CancellationToken::new();
        self.spawn_topic_stream(topic, self.live_stream_id, self.live_cancel.clone());
    }

    /// Drive one topic stream: a forwarder moves deliveries from the typed
    /// source channel onto the coordinator, tagged with the stream id; the
    /// driver runs the source and surfaces setup errors as a stream error.
    fn spawn_topic_stream(&self, topic: TopicRef, stream_id: u64, cancel: CancellationToken) {
        let (sink, mut rx) = SegmentSink::channel(SOURCE_CHANNEL_CAPACITY);

        let forward_tx = self.events_tx.clone();
        let forward_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_cancel.cancelled() => break,
                    delivery = rx.recv() => match delivery {
                        Some(event) => {
                            if forward_tx
                                .send(Event::Source { stream_id, event })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let source = self.caps.source.clone();
        let voice = self.config.voice.clone();
        let error_tx = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = source.stream_segments(&topic, &voice, sink).await {
                tracing::warn!(error = %e, topic_id = %topic.topic_id, "segment stream failed");
                let _ = error_tx
                    .send(Event::Source {
                        stream_id,
                        event: SourceEvent::Error(e.to_string()),
                    })
                    .await;
            }
        });
    }

    fn spawn_confirm_timer(&self, episode: u64, cancel: CancellationToken) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(CONFIRM_WINDOW_MS)) => {
                    let _ = tx.send(Event::ConfirmElapsed { episode }).await;
                }
            }
        });
    }

    fn spawn_decision_timer(&self, episode: u64) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(END_OF_UTTERANCE_SILENCE_MS)).await;
            let _ = tx.send(Event::DecisionElapsed { episode }).await;
        });
    }

    fn persist_progress(&self) {
        let Some(progress) = self.caps.progress.clone() else {
            return;
        };
        let topic = self.topic.clone();
        let (completed, total) = {
            let playback = self.state.playback();
            (playback.completed, playback.total)
        };
        tokio::spawn(async move {
            if let Err(e) = progress.save_progress(&topic, completed, total).await {
                tracing::warn!(error = %e, "progress save failed");
            }
        });
    }
}
