//! Interruption dispatcher: routes a transcribed utterance.
//!
//! An utterance is either a visual-content request (answered from the
//! session's reference assets) or a general question (answered by the
//! language model and spoken back). Both paths end by handing control back
//! to the resume protocol.

use std::sync::Arc;

use futures::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use lektra_providers::{
    event_names, AudioClip, AudioOutput, ChatMessage, CompletionConfig, EventSinkRef,
    LanguageModel, ProviderError, RenderOutcome, SpeechSynthesizer,
};
use lektra_segment::VoiceProfile;

/// A reference visual asset attached to the session's curriculum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAsset {
    /// Subject the asset depicts, used for matching requests.
    pub subject: String,
    pub asset_id: String,
    pub caption: String,
}

/// How an utterance should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InterruptionKind {
    Visual { subject: String },
    Question,
}

pub(crate) struct Dispatcher {
    request_re: Regex,
    noun_subject_re: Regex,
    verb_subject_re: Regex,
    assets: Vec<VisualAsset>,
}

impl Dispatcher {
    pub fn new(assets: Vec<VisualAsset>) -> Self {
        Self {
            request_re: Regex::new(
                r"(?i)\b(show|display|draw|diagram|picture|image|graph|chart|figure|illustration|visual)\b",
            )
            .expect("valid regex"),
            noun_subject_re: Regex::new(
                r"(?i)(?:diagram|picture|image|graph|chart|figure|illustration|visual)s?\s+(?:of|for)\s+(?P<subject>.+?)[.?!]*$",
            )
            .expect("valid regex"),
            verb_subject_re: Regex::new(
                r"(?i)(?:show|display|draw)\s+(?:me\s+)?(?:(?:a|an|the)\s+)?(?P<subject>.+?)[.?!]*$",
            )
            .expect("valid regex"),
            assets,
        }
    }

    /// Classify a transcript as a visual request or a general question.
    pub fn classify(&self, transcript: &str) -> InterruptionKind {
        let transcript = transcript.trim();
        if !self.request_re.is_match(transcript) {
            return InterruptionKind::Question;
        }

        let subject = self
            .noun_subject_re
            .captures(transcript)
            .or_else(|| self.verb_subject_re.captures(transcript))
            .and_then(|c| c.name("subject"))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| transcript.to_string());

        InterruptionKind::Visual { subject }
    }

    /// Find a reference asset whose subject matches the request.
    pub fn find_asset(&self, subject: &str) -> Option<&VisualAsset> {
        let needle = subject.to_lowercase();
        self.assets.iter().find(|asset| {
            let candidate = asset.subject.to_lowercase();
            needle.contains(&candidate) || candidate.contains(&needle)
        })
    }
}

/// Build the Q&A prompt for an interruption during a lecture.
pub(crate) fn build_messages(topic_title: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "You are a voice tutor currently lecturing on \"{topic_title}\". \
             The student interrupted with a question. Answer briefly in a \
             conversational tone, then offer to continue the lecture."
        )),
        ChatMessage::user(question),
    ]
}

/// Stream a completion, emitting partial tokens to the UI, and return the
/// full answer text.
pub(crate) async fn stream_answer(
    model: &Arc<dyn LanguageModel>,
    sink: &EventSinkRef,
    messages: &[ChatMessage],
) -> Result<String, ProviderError> {
    let mut stream = model
        .stream_completion(messages, &CompletionConfig::default())
        .await?;

    let mut answer = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.content.is_empty() {
            answer.push_str(&chunk.content);
            sink.emit(
                event_names::ASSISTANT_PARTIAL,
                json!({ "content": chunk.content }),
            );
        }
        if chunk.is_done {
            break;
        }
    }

    sink.emit(event_names::ASSISTANT_RESPONSE, json!({ "text": answer }));
    Ok(answer)
}

/// Synthesize `text` and play it to completion.
///
/// Blocks the calling task (never the coordinator) until the reply audio has
/// finished rendering, or until `cancel` fires (a confirmed barge-in over
/// the reply, or shutdown), which stops the renderer.
pub(crate) async fn speak(
    synthesizer: &Arc<dyn SpeechSynthesizer>,
    output: &Arc<dyn AudioOutput>,
    voice: &VoiceProfile,
    text: &str,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    let mut chunks = synthesizer.synthesize(text, voice).await?;
    let mut audio = Vec::new();
    while let Some(chunk) = chunks.next().await {
        audio.extend_from_slice(&chunk?);
    }
    if audio.is_empty() {
        return Ok(());
    }

    let (done_tx, done_rx) = oneshot::channel();
    let mut handle = output.start(AudioClip::new(audio), done_tx)?;
    tokio::select! {
        outcome = done_rx => match outcome {
            Ok(RenderOutcome::Failed(e)) => Err(ProviderError::Render(e)),
            // Completed, or stopped externally.
            _ => Ok(()),
        },
        _ = cancel.cancelled() => {
            handle.stop();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(vec![
            VisualAsset {
                subject: "water cycle".to_string(),
                asset_id: "vis-001".to_string(),
                caption: "The water cycle".to_string(),
            },
            VisualAsset {
                subject: "krebs cycle".to_string(),
                asset_id: "vis-002".to_string(),
                caption: "The Krebs cycle".to_string(),
            },
        ])
    }

    #[test]
    fn plain_question_classifies_as_question() {
        let d = dispatcher();
        assert_eq!(
            d.classify("wait, what does entropy mean?"),
            InterruptionKind::Question
        );
    }

    #[test]
    fn diagram_request_extracts_subject() {
        let d = dispatcher();
        match d.classify("can you show me a diagram of the water cycle?") {
            InterruptionKind::Visual { subject } => assert_eq!(subject, "the water cycle"),
            other => panic!("expected visual, got {other:?}"),
        }
    }

    #[test]
    fn show_me_request_extracts_subject() {
        let d = dispatcher();
        match d.classify("show me the krebs cycle") {
            InterruptionKind::Visual { subject } => assert_eq!(subject, "krebs cycle"),
            other => panic!("expected visual, got {other:?}"),
        }
    }

    #[test]
    fn asset_lookup_is_case_insensitive_containment() {
        let d = dispatcher();
        assert_eq!(
            d.find_asset("The Water Cycle").map(|a| a.asset_id.as_str()),
            Some("vis-001")
        );
        assert!(d.find_asset("mitochondria").is_none());
    }

    #[test]
    fn prompt_includes_topic_title_and_brevity_instruction() {
        let messages = build_messages("Quantum Mechanics", "what is spin?");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("Quantum Mechanics"));
        assert!(messages[0].content.contains("briefly"));
        assert!(messages[0].content.contains("continue the lecture"));
        assert_eq!(messages[1].content, "what is spin?");
    }
}
