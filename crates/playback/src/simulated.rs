use std::sync::Arc;

use crate::{AudioOutput, PlayableBuffer, VoiceId};

/// Output device driven by a virtual clock.
///
/// Nothing is rendered; voices end once [`advance`](Self::advance) moves the
/// clock past their end time. Used by tests and by hosts running without a
/// speaker.
#[derive(Debug, Default)]
pub struct SimulatedOutput {
    time: f64,
    playing: Vec<(VoiceId, f64)>,
    ended: Vec<VoiceId>,
    started: Vec<(VoiceId, f64, f64)>,
    stopped: Vec<VoiceId>,
}

impl SimulatedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and finish every voice that ran out.
    pub fn advance(&mut self, secs: f64) {
        self.time += secs;
        let now = self.time;
        let ended = &mut self.ended;
        self.playing.retain(|&(id, end)| {
            if end <= now {
                ended.push(id);
                false
            } else {
                true
            }
        });
    }

    /// Every `(id, start, duration)` ever started, in call order.
    pub fn started(&self) -> &[(VoiceId, f64, f64)] {
        &self.started
    }

    /// Ids halted through [`AudioOutput::stop`], in call order.
    pub fn stopped(&self) -> &[VoiceId] {
        &self.stopped
    }
}

impl AudioOutput for SimulatedOutput {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn start(&mut self, id: VoiceId, buffer: Arc<PlayableBuffer>, at: f64) {
        let duration = buffer.duration_secs();
        self.started.push((id, at, duration));
        self.playing.push((id, at + duration));
    }

    fn stop(&mut self, id: VoiceId) {
        self.playing.retain(|&(playing, _)| playing != id);
        self.stopped.push(id);
    }

    fn drain_ended(&mut self) -> Vec<VoiceId> {
        std::mem::take(&mut self.ended)
    }
}
