//! Audio rendering and capture contracts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use lektra_bus::CaptureBusReceiver;

/// An opaque audio clip handed to the output for rendering.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub audio: Arc<[u8]>,
}

impl AudioClip {
    pub fn new(audio: impl Into<Arc<[u8]>>) -> Self {
        Self {
            audio: audio.into(),
        }
    }
}

/// How a renderer finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The clip played to its end.
    Completed,
    /// The renderer was stopped before the end.
    Stopped,
    /// The clip could not be decoded or playback failed mid-way.
    Failed(String),
}

/// Control handle for one live renderer.
///
/// Exactly one renderer is live at a time; the engine enforces that, the
/// handle only has to honor pause/resume/stop on its own clip.
pub trait RendererHandle: Send {
    /// Freeze playback in place. Resumable.
    fn pause(&mut self);

    /// Continue a paused renderer from where it stopped.
    fn resume(&mut self);

    /// Halt permanently. The `done` channel fires with
    /// [`RenderOutcome::Stopped`].
    fn stop(&mut self);

    /// Current playback offset into the clip.
    fn offset(&self) -> Duration;
}

/// Audio rendering capability.
///
/// `start` must begin rendering before returning; completion (or failure, or
/// an explicit stop) is signalled exactly once on `done`. A construction
/// error means nothing was rendered and `done` will never fire.
pub trait AudioOutput: Send + Sync {
    fn start(
        &self,
        clip: AudioClip,
        done: oneshot::Sender<RenderOutcome>,
    ) -> crate::Result<Box<dyn RendererHandle>>;
}

/// Stop handle for a running capture stream.
pub trait CaptureHandle: Send {
    fn stop(&mut self);
}

/// A started capture stream: the frame receiver plus its stop handle.
pub struct CaptureStream {
    pub handle: Box<dyn CaptureHandle>,
    pub frames: CaptureBusReceiver,
}

/// Microphone capture + VAD capability.
///
/// Produces an ordered stream of [`lektra_bus::CaptureFrame`]s carrying VAD
/// verdicts for the lifetime of barge-in monitoring.
pub trait CaptureSource: Send + Sync {
    fn start(&self) -> crate::Result<CaptureStream>;
}
