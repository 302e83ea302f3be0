//! Low-latency capture bus for barge-in monitoring.
//!
//! Delivers (audio frame, VAD verdict) pairs from the capture side to the
//! playback coordinator with bounded latency and drop accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Standard audio sample rate for capture processing (16kHz).
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of each capture frame in milliseconds.
pub const FRAME_DURATION_MS: u32 = 20;

/// Number of samples per frame at the standard sample rate.
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize * FRAME_DURATION_MS as usize) / 1000;

/// Default buffer capacity in milliseconds.
pub const DEFAULT_BUFFER_CAPACITY_MS: u32 = 1500;

/// Per-frame speech verdict from the VAD capability.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VadVerdict {
    /// Whether the frame was classified as speech.
    pub is_speech: bool,
    /// Classifier confidence in `0.0..=1.0`.
    pub confidence: f32,
}

impl VadVerdict {
    pub fn speech(confidence: f32) -> Self {
        Self {
            is_speech: true,
            confidence,
        }
    }

    pub fn silence() -> Self {
        Self {
            is_speech: false,
            confidence: 0.0,
        }
    }
}

/// Captured audio frame with its VAD verdict and a sequence number for ordering.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Monotonic sequence number for ordering.
    pub seq: u64,
    /// Timestamp in milliseconds (wall clock when the frame was captured).
    pub ts_ms: i64,
    /// Sample rate of the audio data.
    pub sample_rate: u32,
    /// Audio samples (shared ownership for zero-copy).
    pub samples: Arc<[f32]>,
    /// Speech verdict for this frame.
    pub verdict: VadVerdict,
}

impl CaptureFrame {
    pub fn new(
        seq: u64,
        ts_ms: i64,
        sample_rate: u32,
        samples: impl Into<Arc<[f32]>>,
        verdict: VadVerdict,
    ) -> Self {
        Self {
            seq,
            ts_ms,
            sample_rate,
            samples: samples.into(),
            verdict,
        }
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Configuration for the capture bus.
#[derive(Debug, Clone)]
pub struct CaptureBusConfig {
    /// Target buffer capacity in milliseconds.
    pub capacity_ms: u32,
    /// Expected frame size in milliseconds (for calculating channel capacity).
    pub frame_size_ms: u32,
}

impl Default for CaptureBusConfig {
    fn default() -> Self {
        Self {
            capacity_ms: DEFAULT_BUFFER_CAPACITY_MS,
            frame_size_ms: FRAME_DURATION_MS,
        }
    }
}

impl CaptureBusConfig {
    /// Calculate channel capacity in number of frames.
    fn channel_capacity(&self) -> usize {
        if self.frame_size_ms == 0 {
            return 32;
        }
        ((self.capacity_ms / self.frame_size_ms) as usize).max(8)
    }
}

/// Sender half of the capture bus.
#[derive(Clone)]
pub struct CaptureBusSender {
    tx: mpsc::Sender<CaptureFrame>,
    seq_counter: Arc<AtomicU64>,
    dropped_frames: Arc<AtomicU64>,
}

impl CaptureBusSender {
    /// Send a frame, dropping it if the buffer is full.
    ///
    /// Returns true if sent successfully, false if dropped.
    pub fn send(
        &self,
        ts_ms: i64,
        sample_rate: u32,
        samples: impl Into<Arc<[f32]>>,
        verdict: VadVerdict,
    ) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let frame = CaptureFrame::new(seq, ts_ms, sample_rate, samples, verdict);

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                // Rate-limit logging: only log every 10th drop to avoid spam
                if dropped % 10 == 1 {
                    tracing::warn!(dropped, seq, "Capture bus full, dropping frames");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Capture bus closed");
                false
            }
        }
    }

    /// Send a frame, waiting until space is available.
    pub async fn send_async(
        &self,
        ts_ms: i64,
        sample_rate: u32,
        samples: impl Into<Arc<[f32]>>,
        verdict: VadVerdict,
    ) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let frame = CaptureFrame::new(seq, ts_ms, sample_rate, samples, verdict);

        match self.tx.send(frame).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Capture bus closed");
                false
            }
        }
    }

    /// Get the number of dropped frames.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Get the current sequence number.
    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::Relaxed)
    }
}

/// Receiver half of the capture bus.
pub struct CaptureBusReceiver {
    rx: mpsc::Receiver<CaptureFrame>,
    last_seq: u64,
    gaps_detected: u64,
}

impl CaptureBusReceiver {
    /// Receive the next frame.
    pub async fn recv(&mut self) -> Option<CaptureFrame> {
        let frame = self.rx.recv().await?;

        // Check for gaps in sequence numbers.
        if self.last_seq > 0 && frame.seq > self.last_seq + 1 {
            let gap = frame.seq - self.last_seq - 1;
            self.gaps_detected += gap;
            tracing::debug!(
                "Capture bus gap detected: {} frames missing (seq {} -> {})",
                gap,
                self.last_seq,
                frame.seq
            );
        }
        self.last_seq = frame.seq;

        Some(frame)
    }

    /// Try to receive a frame without blocking.
    pub fn try_recv(&mut self) -> Option<CaptureFrame> {
        match self.rx.try_recv() {
            Ok(frame) => {
                if self.last_seq > 0 && frame.seq > self.last_seq + 1 {
                    let gap = frame.seq - self.last_seq - 1;
                    self.gaps_detected += gap;
                }
                self.last_seq = frame.seq;
                Some(frame)
            }
            Err(_) => None,
        }
    }

    /// Get the number of gaps (missing frames) detected.
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    /// Close the receiving side so further sends fail fast.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Capture bus pairing one producer side with one consumer side.
pub struct CaptureBus {
    sender: CaptureBusSender,
    receiver: Option<CaptureBusReceiver>,
}

impl CaptureBus {
    /// Create a new capture bus with default configuration.
    pub fn new() -> Self {
        Self::with_config(CaptureBusConfig::default())
    }

    /// Create a new capture bus with custom configuration.
    pub fn with_config(config: CaptureBusConfig) -> Self {
        let capacity = config.channel_capacity();
        let (tx, rx) = mpsc::channel(capacity);

        tracing::debug!(
            "Created capture bus: capacity={}ms (~{} frames of {}ms)",
            config.capacity_ms,
            capacity,
            config.frame_size_ms
        );

        Self {
            sender: CaptureBusSender {
                tx,
                seq_counter: Arc::new(AtomicU64::new(0)),
                dropped_frames: Arc::new(AtomicU64::new(0)),
            },
            receiver: Some(CaptureBusReceiver {
                rx,
                last_seq: 0,
                gaps_detected: 0,
            }),
        }
    }

    /// Get a clone of the sender.
    pub fn sender(&self) -> CaptureBusSender {
        self.sender.clone()
    }

    /// Take the receiver (can only be called once).
    pub fn take_receiver(&mut self) -> Option<CaptureBusReceiver> {
        self.receiver.take()
    }
}

impl Default for CaptureBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples_ms(ms: u64) -> Vec<f32> {
        vec![0.0; (SAMPLE_RATE as u64 * ms / 1000) as usize]
    }

    #[test]
    fn test_frame_duration() {
        let frame = CaptureFrame::new(0, 0, 16000, samples_ms(100), VadVerdict::silence());
        assert_eq!(frame.duration_ms(), 100);
    }

    #[test]
    fn test_bus_config_capacity() {
        let config = CaptureBusConfig {
            capacity_ms: 1000,
            frame_size_ms: 20,
        };
        assert_eq!(config.channel_capacity(), 50);
    }

    #[tokio::test]
    async fn test_send_recv() {
        let mut bus = CaptureBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        sender.send(1000, 16000, samples_ms(20), VadVerdict::speech(0.9));

        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.ts_ms, 1000);
        assert!(frame.verdict.is_speech);
        assert_eq!(frame.samples.len(), FRAME_SAMPLES);
    }

    #[tokio::test]
    async fn test_sequence_monotonicity() {
        let mut bus = CaptureBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        for i in 0..10 {
            sender.send(i * 20, 16000, samples_ms(20), VadVerdict::silence());
        }

        let mut last_seq = 0;
        for _ in 0..10 {
            let frame = receiver.recv().await.unwrap();
            assert!(
                frame.seq >= last_seq,
                "Sequence must be monotonic: {} < {}",
                frame.seq,
                last_seq
            );
            last_seq = frame.seq;
        }
    }

    #[test]
    fn test_dropped_frames_detected() {
        let mut bus = CaptureBus::with_config(CaptureBusConfig {
            capacity_ms: 160, // Very small buffer (8 frames)
            frame_size_ms: 20,
        });
        let sender = bus.sender();
        let _receiver = bus.take_receiver().unwrap();

        for i in 0..20 {
            sender.send(i * 20, 16000, samples_ms(20), VadVerdict::silence());
        }

        assert!(
            sender.dropped_frames() > 0,
            "Should have dropped frames when buffer overflows"
        );
    }

    #[tokio::test]
    async fn test_verdict_preserved_in_order() {
        let mut bus = CaptureBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        let verdicts = [
            VadVerdict::silence(),
            VadVerdict::speech(0.75),
            VadVerdict::speech(0.4),
            VadVerdict::silence(),
        ];
        for (i, v) in verdicts.iter().enumerate() {
            sender.send(i as i64 * 20, 16000, samples_ms(20), *v);
        }

        for expected in &verdicts {
            let frame = receiver.recv().await.unwrap();
            assert_eq!(frame.verdict, *expected);
        }
    }

    #[tokio::test]
    async fn test_close_stops_delivery() {
        let mut bus = CaptureBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        receiver.close();
        assert!(!sender.send(0, 16000, samples_ms(20), VadVerdict::silence()));
    }
}
