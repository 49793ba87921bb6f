//! Frame bus between microphone capture and the session loop.
//!
//! Capture threads publish fixed-size 16 kHz frames; the session loop is the
//! single consumer and fans each frame out to the detector and the encoder.
//! Frames keep capture order, so outbound audio leaves in the order it was
//! recorded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use talkmee_codec::INPUT_SAMPLE_RATE as SAMPLE_RATE;

/// Samples per captured frame (256 ms at 16 kHz).
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// Default buffer capacity in milliseconds.
pub const DEFAULT_BUFFER_CAPACITY_MS: u32 = 4000;

/// A captured block of mono audio plus its energy.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Monotonic sequence number for ordering.
    pub seq: u64,
    /// Wall clock capture time in milliseconds.
    pub ts_ms: i64,
    pub sample_rate: u32,
    /// Samples in `[-1.0, 1.0]` (shared ownership for zero-copy).
    pub samples: Arc<[f32]>,
    /// RMS energy of `samples`.
    pub energy_rms: f32,
}

impl AudioFrame {
    pub fn new(seq: u64, ts_ms: i64, sample_rate: u32, samples: impl Into<Arc<[f32]>>) -> Self {
        let samples = samples.into();
        let energy_rms = talkmee_codec::rms(&samples);
        Self {
            seq,
            ts_ms,
            sample_rate,
            samples,
            energy_rms,
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

/// Configuration for the frame bus.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AudioBusConfig {
    /// Target buffer capacity in milliseconds.
    pub capacity_ms: u32,
    /// Expected frame size in milliseconds (for calculating channel capacity).
    pub frame_size_ms: u32,
}

impl Default for AudioBusConfig {
    fn default() -> Self {
        Self {
            capacity_ms: DEFAULT_BUFFER_CAPACITY_MS,
            frame_size_ms: (DEFAULT_FRAME_SAMPLES as u64 * 1000 / SAMPLE_RATE as u64) as u32,
        }
    }
}

impl AudioBusConfig {
    /// Channel capacity in number of frames.
    fn channel_capacity(&self) -> usize {
        if self.frame_size_ms == 0 {
            return 32;
        }
        ((self.capacity_ms / self.frame_size_ms) as usize).max(8)
    }
}

/// Sender half of the frame bus.
#[derive(Clone)]
pub struct AudioBusSender {
    tx: mpsc::Sender<AudioFrame>,
    seq_counter: Arc<AtomicU64>,
    dropped_frames: Arc<AtomicU64>,
}

impl AudioBusSender {
    /// Publish a frame, dropping it if the consumer is too far behind.
    ///
    /// Returns true if sent, false if dropped.
    pub fn send(&self, ts_ms: i64, sample_rate: u32, samples: impl Into<Arc<[f32]>>) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::new(seq, ts_ms, sample_rate, samples);

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                // Only log every 10th drop
                if dropped % 10 == 1 {
                    tracing::warn!(dropped, seq, "Frame bus full, dropping frames");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Frame bus closed");
                false
            }
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiver half of the frame bus.
pub struct AudioBusReceiver {
    rx: mpsc::Receiver<AudioFrame>,
    last_seq: Option<u64>,
    gaps_detected: u64,
}

impl AudioBusReceiver {
    /// Receive the next frame.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        let frame = self.rx.recv().await?;
        self.track(&frame);
        Some(frame)
    }

    /// Receive a frame without waiting.
    pub fn try_recv(&mut self) -> Option<AudioFrame> {
        let frame = self.rx.try_recv().ok()?;
        self.track(&frame);
        Some(frame)
    }

    fn track(&mut self, frame: &AudioFrame) {
        if let Some(last) = self.last_seq {
            if frame.seq > last + 1 {
                let gap = frame.seq - last - 1;
                self.gaps_detected += gap;
                tracing::debug!(gap, from = last, to = frame.seq, "Frame bus gap detected");
            }
        }
        self.last_seq = Some(frame.seq);
    }

    /// Number of frames missing from the sequence so far.
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    /// Discard every queued frame. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.try_recv().is_some() {
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(drained, "Drained stale frames from bus");
        }
        drained
    }
}

/// Create a connected sender/receiver pair without the owning bus.
pub fn channel(config: AudioBusConfig) -> (AudioBusSender, AudioBusReceiver) {
    let capacity = config.channel_capacity();
    let (tx, rx) = mpsc::channel(capacity);

    tracing::debug!(
        capacity_ms = config.capacity_ms,
        frames = capacity,
        frame_size_ms = config.frame_size_ms,
        "Created frame bus"
    );

    let sender = AudioBusSender {
        tx,
        seq_counter: Arc::new(AtomicU64::new(0)),
        dropped_frames: Arc::new(AtomicU64::new(0)),
    };
    let receiver = AudioBusReceiver {
        rx,
        last_seq: None,
        gaps_detected: 0,
    };
    (sender, receiver)
}

/// Bounded single-consumer frame bus.
pub struct AudioBus {
    sender: AudioBusSender,
    receiver: Option<AudioBusReceiver>,
}

impl AudioBus {
    pub fn new() -> Self {
        Self::with_config(AudioBusConfig::default())
    }

    pub fn with_config(config: AudioBusConfig) -> Self {
        let (sender, receiver) = channel(config);
        Self {
            sender,
            receiver: Some(receiver),
        }
    }

    pub fn sender(&self) -> AudioBusSender {
        self.sender.clone()
    }

    /// Take the receiver (can only be called once).
    pub fn take_receiver(&mut self) -> Option<AudioBusReceiver> {
        self.receiver.take()
    }
}

impl Default for AudioBus {
    fn default() -> Self {
        Self::new()
    }
}
