use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use talkmee_bus::AudioBusConfig;
use talkmee_coach::{Accent, FeedbackLanguage};
use talkmee_events::PracticeKind;
use talkmee_live::DEFAULT_LIVE_MODEL;
use talkmee_vad::VadSettings;

/// Delay between showing a result and moving to the next target.
pub const AUTO_ADVANCE_DELAY_MS: u64 = 5000;

/// Period of the host loop's timer tick.
pub const TICK_INTERVAL_MS: u64 = 50;

pub const CONVERSATION_VOICE: &str = "Charon";

pub const TUTOR_INSTRUCTION: &str = "You are an English language tutor. Speak clearly. \
You can respond in both English and Thai to help the student learn. \
Encourage them to speak more English. Be friendly and conversational.";

pub const DEFAULT_SENTENCES: [&str; 10] = [
    "The quick brown fox jumps over the lazy dog.",
    "I'm looking forward to our meeting tomorrow.",
    "Could you please tell me how to get to the station?",
    "Learning a new language opens up many opportunities.",
    "The weather today is absolutely wonderful, isn't it?",
    "I would like to order a large latte with oat milk.",
    "Practice makes perfect when it comes to fluency.",
    "Can you recommend a good restaurant nearby?",
    "Success is not final, failure is not fatal.",
    "Believe you can and you're halfway there.",
];

pub const DEFAULT_VOCABULARY: [&str; 9] = [
    "Extraordinary",
    "Infrastructure",
    "Perspective",
    "Collaborate",
    "Innovative",
    "Sustainable",
    "Phenomenon",
    "Algorithm",
    "Atmosphere",
];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for both session modes.
///
/// Every field has a default, so a settings file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub vad: VadSettings,
    pub frame_bus: AudioBusConfig,
    /// Move to a new target on its own after a result is shown.
    pub auto_advance: bool,
    pub auto_advance_delay_ms: u64,
    pub tick_interval_ms: u64,
    pub live_model: String,
    pub conversation_voice: String,
    pub tutor_instruction: String,
    pub sentences: Vec<String>,
    pub vocabulary: Vec<String>,
    pub practice_kind: PracticeKind,
    pub accent: Accent,
    pub feedback_language: FeedbackLanguage,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            vad: VadSettings::default(),
            frame_bus: AudioBusConfig::default(),
            auto_advance: true,
            auto_advance_delay_ms: AUTO_ADVANCE_DELAY_MS,
            tick_interval_ms: TICK_INTERVAL_MS,
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            conversation_voice: CONVERSATION_VOICE.to_string(),
            tutor_instruction: TUTOR_INSTRUCTION.to_string(),
            sentences: DEFAULT_SENTENCES.iter().map(|s| s.to_string()).collect(),
            vocabulary: DEFAULT_VOCABULARY.iter().map(|s| s.to_string()).collect(),
            practice_kind: PracticeKind::default(),
            accent: Accent::default(),
            feedback_language: FeedbackLanguage::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), "Loaded session settings");
        Ok(settings)
    }

    pub fn auto_advance_delay(&self) -> Duration {
        Duration::from_millis(self.auto_advance_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Practice items for a kind.
    pub fn pool(&self, kind: PracticeKind) -> &[String] {
        match kind {
            PracticeKind::Sentence => &self.sentences,
            PracticeKind::Vocabulary => &self.vocabulary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let settings = SessionSettings::default();
        assert_eq!(settings.vad.silence_threshold, 0.012);
        assert_eq!(settings.vad.silence_duration_ms, 1200);
        assert_eq!(settings.auto_advance_delay(), Duration::from_secs(5));
        assert_eq!(settings.pool(PracticeKind::Sentence).len(), 10);
        assert_eq!(settings.pool(PracticeKind::Vocabulary).len(), 9);
        assert_eq!(settings.conversation_voice, "Charon");
        assert_eq!(settings.feedback_language, FeedbackLanguage::Thai);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = SessionSettings::from_json_str(
            r#"{"auto_advance_delay_ms": 3000, "vad": {"silence_threshold": 0.02}, "accent": "uk"}"#,
        )
        .unwrap();
        assert_eq!(settings.auto_advance_delay_ms, 3000);
        assert_eq!(settings.vad.silence_threshold, 0.02);
        assert_eq!(settings.vad.silence_duration_ms, 1200);
        assert_eq!(settings.accent, Accent::Uk);
        assert_eq!(settings.sentences.len(), 10);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        assert!(matches!(
            SessionSettings::from_json_str("{not json"),
            Err(SettingsError::Parse(_))
        ));
        assert!(matches!(
            SessionSettings::from_json_file("/nonexistent/talkmee.json"),
            Err(SettingsError::Io(_))
        ));
    }
}
