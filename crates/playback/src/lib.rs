//! Gapless playback of model audio.
//!
//! Buffers arrive in bursts faster than real time. The scheduler queues each
//! one on the output device's clock directly after the previous one, so the
//! coach's voice plays back-to-back without gaps or overlap, and can be cut
//! off in one call when the model is interrupted.

mod simulated;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use simulated::SimulatedOutput;
pub use talkmee_codec::PlayableBuffer;

/// Identifier of one scheduled buffer on the output device.
pub type VoiceId = u64;

/// An output device with its own monotonic clock.
pub trait AudioOutput: Send {
    /// Seconds on the output clock.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at output time `at`.
    fn start(&mut self, id: VoiceId, buffer: Arc<PlayableBuffer>, at: f64);

    /// Halt a voice immediately.
    fn stop(&mut self, id: VoiceId);

    /// Voices that finished playing since the last call.
    fn drain_ended(&mut self) -> Vec<VoiceId>;
}

impl<T: AudioOutput + ?Sized> AudioOutput for Box<T> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn start(&mut self, id: VoiceId, buffer: Arc<PlayableBuffer>, at: f64) {
        (**self).start(id, buffer, at)
    }

    fn stop(&mut self, id: VoiceId) {
        (**self).stop(id)
    }

    fn drain_ended(&mut self) -> Vec<VoiceId> {
        (**self).drain_ended()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: VoiceId,
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

pub struct PlaybackScheduler<O> {
    output: O,
    next_start_time: f64,
    active: BTreeMap<VoiceId, ScheduledBuffer>,
    next_id: VoiceId,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        let next_start_time = output.current_time();
        Self {
            output,
            next_start_time,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Queue a buffer right after everything already scheduled, or now if the
    /// queue has drained. Empty buffers are skipped.
    pub fn schedule(&mut self, buffer: PlayableBuffer) -> Option<ScheduledBuffer> {
        if buffer.is_empty() {
            tracing::trace!("Skipping empty playback buffer");
            return None;
        }

        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let duration = buffer.duration_secs();
        let id = self.next_id;
        self.next_id += 1;

        let scheduled = ScheduledBuffer {
            id,
            start_time,
            duration,
        };
        self.output.start(id, Arc::new(buffer), start_time);
        self.active.insert(id, scheduled);
        self.next_start_time = scheduled.end_time();

        tracing::trace!(id, start_time, duration, "Scheduled playback buffer");
        Some(scheduled)
    }

    /// Retire voices the output reports as finished. Returns how many ended.
    pub fn poll_completions(&mut self) -> usize {
        let ended = self.output.drain_ended();
        let mut retired = 0;
        for id in ended {
            if self.active.remove(&id).is_some() {
                retired += 1;
            }
        }
        retired
    }

    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Halt all audio and restart the schedule from the current output time.
    pub fn stop_all(&mut self) {
        let stopped = self.active.len();
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        // Discard completions of voices we just stopped.
        self.output.drain_ended();
        self.next_start_time = self.output.current_time();
        if stopped > 0 {
            tracing::debug!(stopped, "Stopped all playback");
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
