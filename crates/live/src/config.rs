use serde::{Deserialize, Serialize};

/// Native-audio live model used when nothing else is configured.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Parameters sent in the session setup message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub model: String,
    /// Prebuilt voice name, e.g. `Puck` or `Charon`.
    pub voice: Option<String>,
    pub response_modality: Modality,
    pub system_instruction: Option<String>,
    /// Ask the server to transcribe the learner's audio.
    pub input_transcription: bool,
    /// Ask the server to transcribe its own audio replies.
    pub output_transcription: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: None,
            response_modality: Modality::Audio,
            system_instruction: None,
            input_transcription: true,
            output_transcription: true,
        }
    }
}

impl LiveConfig {
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_transcription(mut self, input: bool, output: bool) -> Self {
        self.input_transcription = input;
        self.output_transcription = output;
        self
    }

    /// Model name in the `models/...` form the API expects.
    pub fn qualified_model(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}
