use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use talkmee_bus::{AudioBusSender, DEFAULT_FRAME_SAMPLES, SAMPLE_RATE};

use crate::stream::InputStream;
use crate::{AudioError, Result};

/// How long `start` waits for the capture thread to open the device.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for the capture thread during `stop`.
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A source of 16 kHz mono frames.
///
/// `start` acquires the input device and begins publishing frames on the
/// bus; `stop` releases the device before returning and is a no-op when
/// nothing is capturing.
pub trait Microphone: Send {
    fn start(&mut self, frames: AudioBusSender) -> Result<()>;

    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

impl<M: Microphone + ?Sized> Microphone for Box<M> {
    fn start(&mut self, frames: AudioBusSender) -> Result<()> {
        (**self).start(frames)
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

/// Regroups variable-size device chunks into fixed-size frames.
#[derive(Debug, Clone)]
pub struct FrameChunker {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Append samples and return every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_samples;
        if complete == 0 {
            return Vec::new();
        }
        let mut frames = Vec::with_capacity(complete);
        let mut rest = self.pending.split_off(complete * self.frame_samples);
        std::mem::swap(&mut rest, &mut self.pending);
        for frame in rest.chunks_exact(self.frame_samples) {
            frames.push(frame.to_vec());
        }
        frames
    }

    /// Samples waiting for the next frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Microphone backed by a cpal input stream.
///
/// The stream lives on a dedicated capture thread; stopping joins that
/// thread, so the device is released when `stop` returns.
pub struct CpalMicrophone {
    device_id: Option<String>,
    frame_samples: usize,
    stop_signal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            device_id: None,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            stop_signal: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Capture from a named device instead of the default one.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_frame_samples(mut self, frame_samples: usize) -> Self {
        self.frame_samples = frame_samples.max(1);
        self
    }

    /// Forget a capture thread that already exited on its own.
    fn reap_finished(&mut self) {
        if self.thread.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.thread.take() {
                if handle.join().is_err() {
                    tracing::warn!("Capture thread panicked");
                }
            }
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs until stopped or until the device goes away. An early exit leaves
/// `is_active` false, which the session layer treats as a lost microphone.
fn capture_loop(
    rx: Receiver<Vec<f32>>,
    frames: AudioBusSender,
    frame_samples: usize,
    stop_signal: &AtomicBool,
    stream_failed: &AtomicBool,
) {
    let mut chunker = FrameChunker::new(frame_samples);
    let mut emitted: u64 = 0;

    while !stop_signal.load(Ordering::SeqCst) {
        if stream_failed.load(Ordering::SeqCst) {
            tracing::warn!("Microphone stream failed, ending capture");
            break;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(samples) => {
                for frame in chunker.push(&samples) {
                    // Timestamp is audio time since capture started.
                    let ts_ms = (emitted * 1000 / SAMPLE_RATE as u64) as i64;
                    emitted += frame.len() as u64;
                    frames.send(ts_ms, SAMPLE_RATE, frame);
                }
                if frames.is_closed() {
                    tracing::info!("Frame bus closed, ending capture");
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Microphone stream disconnected");
                break;
            }
        }
    }

    tracing::debug!(
        emitted_samples = emitted,
        discarded_samples = chunker.pending_len(),
        dropped_frames = frames.dropped_frames(),
        "Capture loop finished"
    );
}

impl Microphone for CpalMicrophone {
    fn start(&mut self, frames: AudioBusSender) -> Result<()> {
        self.reap_finished();
        if self.thread.is_some() {
            tracing::debug!("Microphone already capturing");
            return Ok(());
        }

        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = Arc::clone(&stop_signal);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let device_id = self.device_id.clone();
        let frame_samples = self.frame_samples;

        let handle = std::thread::Builder::new()
            .name("talkmee-capture".into())
            .spawn(move || {
                let mut stream = match InputStream::open(device_id.as_deref()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let Some(rx) = stream.take_receiver() else {
                    let _ = ready_tx.send(Err(AudioError::StreamError("receiver already taken".into())));
                    return;
                };
                let stream_failed = stream.failure_flag();
                let _ = ready_tx.send(Ok(()));
                capture_loop(rx, frames, frame_samples, &stop_signal, &stream_failed);
                drop(stream);
                tracing::info!("Capture thread exiting, device released");
            })
            .map_err(|e| AudioError::StreamError(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.thread = Some(handle);
                tracing::info!("Microphone capturing");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                tracing::warn!(error = %e, "Microphone failed to start");
                Err(e)
            }
            Err(_) => {
                self.thread = Some(handle);
                self.stop();
                Err(AudioError::StreamError("timed out opening microphone".into()))
            }
        }
    }

    fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        let Some(handle) = self.thread.take() else {
            return;
        };

        let start = Instant::now();
        while !handle.is_finished() && start.elapsed() < STOP_TIMEOUT {
            std::thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                tracing::warn!("Capture thread panicked");
            }
            tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "Microphone stopped");
        } else {
            tracing::warn!("Capture thread did not stop within {:?}, detaching", STOP_TIMEOUT);
        }
    }

    fn is_active(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_emits_fixed_frames() {
        let mut chunker = FrameChunker::new(4);
        assert!(chunker.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(chunker.pending_len(), 3);

        let frames = chunker.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]);
        assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(chunker.pending_len(), 2);

        chunker.clear();
        assert_eq!(chunker.pending_len(), 0);
    }

    #[test]
    fn test_chunker_zero_size_is_clamped() {
        let mut chunker = FrameChunker::new(0);
        assert_eq!(chunker.push(&[0.5, 0.5]).len(), 2);
    }

    #[test]
    fn test_capture_loop_publishes_and_stops() {
        let mut bus = talkmee_bus::AudioBus::new();
        let mut receiver = bus.take_receiver().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let failed = AtomicBool::new(false);

        tx.send(vec![0.5; 6]).unwrap();
        tx.send(vec![0.5; 3]).unwrap();
        drop(tx);
        capture_loop(rx, bus.sender(), 4, &stop, &failed);

        let first = receiver.try_recv().unwrap();
        let second = receiver.try_recv().unwrap();
        assert_eq!(first.samples.len(), 4);
        assert_eq!(first.ts_ms, 0);
        assert_eq!(second.ts_ms, 0); // 4 samples at 16 kHz rounds down to 0 ms
        assert!(second.seq > first.seq);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_capture_loop_ends_on_stream_failure() {
        let mut bus = talkmee_bus::AudioBus::new();
        let mut receiver = bus.take_receiver().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<f32>>();
        let stop = AtomicBool::new(false);
        let failed = AtomicBool::new(true);

        // The sender stays alive, as it does inside a stalled cpal callback.
        capture_loop(rx, bus.sender(), 4, &stop, &failed);

        drop(tx);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut mic = CpalMicrophone::new();
        mic.stop();
        mic.stop();
        assert!(!mic.is_active());
    }
}
