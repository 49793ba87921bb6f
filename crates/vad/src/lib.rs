//! Energy-based voice activity detection.
//!
//! Decides when the learner has finished an utterance: speech is any frame
//! whose RMS energy exceeds a threshold, and the utterance ends once the
//! microphone has stayed quiet for the trailing-silence window. Model audio
//! that is still playing counts as activity, so the learner is never cut off
//! while the coach is talking.

use std::time::{Duration, Instant};

/// RMS level above which a frame counts as speech.
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.012;

/// Quiet time after speech before the utterance is considered finished.
pub const DEFAULT_SILENCE_DURATION_MS: u64 = 1200;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub silence_threshold: f32,
    pub silence_duration_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            silence_duration_ms: DEFAULT_SILENCE_DURATION_MS,
        }
    }
}

impl VadSettings {
    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// First above-threshold frame since the detector was armed.
    SpeechStarted,
    /// Speech happened and the trailing silence window elapsed.
    EndOfUtterance,
}

/// Trailing-silence timer over frame energies.
///
/// The detector is inert until [`arm`](Self::arm)ed; after reporting
/// `EndOfUtterance` it disarms itself so the event fires at most once per
/// recording.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    settings: VadSettings,
    armed: bool,
    has_spoken: bool,
    last_active_at: Option<Instant>,
}

impl SilenceDetector {
    pub fn new(settings: VadSettings) -> Self {
        Self {
            settings,
            armed: false,
            has_spoken: false,
            last_active_at: None,
        }
    }

    pub fn settings(&self) -> VadSettings {
        self.settings
    }

    /// Takes effect immediately, including for an armed detector.
    pub fn set_settings(&mut self, settings: VadSettings) {
        self.settings = settings;
    }

    /// Start watching a new recording.
    pub fn arm(&mut self, now: Instant) {
        self.armed = true;
        self.has_spoken = false;
        self.last_active_at = Some(now);
        tracing::trace!("Silence detector armed");
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    pub fn last_active_at(&self) -> Option<Instant> {
        self.last_active_at
    }

    /// Feed the energy of one captured frame.
    pub fn observe_energy(&mut self, energy_rms: f32, now: Instant) -> Option<VadEvent> {
        if !self.armed || energy_rms <= self.settings.silence_threshold {
            return None;
        }
        self.last_active_at = Some(now);
        if self.has_spoken {
            return None;
        }
        self.has_spoken = true;
        tracing::debug!(energy_rms, "Speech started");
        Some(VadEvent::SpeechStarted)
    }

    /// Model audio was scheduled or is still audible.
    pub fn observe_playback(&mut self, now: Instant) {
        if self.armed {
            self.last_active_at = Some(now);
        }
    }

    /// Check the silence timer. `playing` reports whether model audio is
    /// currently audible.
    pub fn poll(&mut self, now: Instant, playing: bool) -> Option<VadEvent> {
        if !self.armed {
            return None;
        }
        if playing {
            self.observe_playback(now);
            return None;
        }
        if !self.has_spoken {
            return None;
        }
        let last_active = self.last_active_at?;
        let silent_for = now.saturating_duration_since(last_active);
        if silent_for > self.settings.silence_duration() {
            self.armed = false;
            tracing::debug!(silent_ms = silent_for.as_millis() as u64, "End of utterance");
            return Some(VadEvent::EndOfUtterance);
        }
        None
    }
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new(VadSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_unarmed_detector_ignores_everything() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        assert_eq!(vad.observe_energy(0.5, t0), None);
        assert_eq!(vad.poll(t0 + ms(5000), false), None);
        assert!(!vad.has_spoken());
    }

    #[test]
    fn test_silence_without_speech_never_ends() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        vad.arm(t0);
        for i in 0..50 {
            vad.observe_energy(0.001, t0 + ms(i * 256));
        }
        assert_eq!(vad.poll(t0 + ms(60_000), false), None);
        assert!(vad.is_armed());
    }

    #[test]
    fn test_end_of_utterance_after_trailing_silence() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        vad.arm(t0);

        assert_eq!(vad.observe_energy(0.05, t0), Some(VadEvent::SpeechStarted));
        assert_eq!(vad.observe_energy(0.05, t0 + ms(100)), None);
        assert_eq!(vad.observe_energy(0.05, t0 + ms(200)), None);
        vad.observe_energy(0.0, t0 + ms(300));

        assert_eq!(vad.poll(t0 + ms(1300), false), None);
        assert_eq!(vad.poll(t0 + ms(1400), false), None);
        assert_eq!(vad.poll(t0 + ms(1401), false), Some(VadEvent::EndOfUtterance));
    }

    #[test]
    fn test_end_of_utterance_fires_once() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        vad.arm(t0);
        vad.observe_energy(0.05, t0);

        assert_eq!(vad.poll(t0 + ms(1300), false), Some(VadEvent::EndOfUtterance));
        assert_eq!(vad.poll(t0 + ms(1400), false), None);
        assert_eq!(vad.observe_energy(0.05, t0 + ms(1500)), None);
        assert_eq!(vad.poll(t0 + ms(9000), false), None);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        vad.arm(t0);
        assert_eq!(vad.observe_energy(DEFAULT_SILENCE_THRESHOLD, t0), None);
        assert!(!vad.has_spoken());
    }

    #[test]
    fn test_playback_suppresses_end_of_utterance() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        vad.arm(t0);
        vad.observe_energy(0.05, t0);

        // Model audio audible until 3s.
        for i in 1..=30 {
            assert_eq!(vad.poll(t0 + ms(i * 100), true), None);
        }
        assert_eq!(vad.poll(t0 + ms(4000), false), None);
        assert_eq!(vad.poll(t0 + ms(4201), false), Some(VadEvent::EndOfUtterance));
    }

    #[test]
    fn test_observe_playback_refreshes_activity() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        vad.arm(t0);
        vad.observe_energy(0.05, t0);
        vad.observe_playback(t0 + ms(1000));
        assert_eq!(vad.poll(t0 + ms(2000), false), None);
        assert_eq!(vad.poll(t0 + ms(2201), false), Some(VadEvent::EndOfUtterance));
    }

    #[test]
    fn test_rearm_resets_speech() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::default();
        vad.arm(t0);
        vad.observe_energy(0.05, t0);
        vad.poll(t0 + ms(2000), false);

        vad.arm(t0 + ms(3000));
        assert!(!vad.has_spoken());
        assert_eq!(vad.poll(t0 + ms(9000), false), None);
        assert_eq!(
            vad.observe_energy(0.05, t0 + ms(9100)),
            Some(VadEvent::SpeechStarted)
        );
    }

    #[test]
    fn test_custom_settings() {
        let t0 = Instant::now();
        let mut vad = SilenceDetector::new(VadSettings {
            silence_threshold: 0.2,
            silence_duration_ms: 500,
        });
        vad.arm(t0);
        assert_eq!(vad.observe_energy(0.1, t0), None);
        vad.observe_energy(0.3, t0);
        assert_eq!(vad.poll(t0 + ms(501), false), Some(VadEvent::EndOfUtterance));
    }
}
