//! JSON messages of the `BidiGenerateContent` live protocol.
//!
//! Outbound messages are serialized exactly; inbound messages are parsed
//! leniently: a missing or mistyped field is treated as absent so one odd
//! field never costs the rest of the message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use talkmee_codec::{EncodedFrame, OUTPUT_SAMPLE_RATE};

use crate::config::{LiveConfig, Modality};
use crate::event::InboundEvent;
use crate::{LiveError, Result};

// ── Outbound ───────────────────────────────────────────────────────

/// A message from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn setup(config: &LiveConfig) -> Self {
        ClientMessage::Setup(Setup::from_config(config))
    }

    pub fn audio(frame: &EncodedFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: frame.mime_type(),
                data: frame.data.clone(),
            }),
            audio_stream_end: None,
        })
    }

    /// Tells the server no more microphone audio will follow.
    pub fn audio_stream_end() -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: None,
            audio_stream_end: Some(true),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LiveError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            model: config.qualified_model(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
                speech_config: config.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                parts: vec![TextPart { text: text.clone() }],
            }),
            input_audio_transcription: config
                .input_transcription
                .then(AudioTranscriptionConfig::default),
            output_audio_transcription: config
                .output_transcription
                .then(AudioTranscriptionConfig::default),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`; its presence enables transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// ── Inbound ────────────────────────────────────────────────────────

/// Treat a mistyped field as absent.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// A message from server to client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, deserialize_with = "lenient")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub server_content: Option<ServerContent>,
    #[serde(default, deserialize_with = "lenient")]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, deserialize_with = "lenient")]
    pub model_turn: Option<ModelTurn>,
    #[serde(default, deserialize_with = "lenient")]
    pub turn_complete: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub interrupted: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, deserialize_with = "lenient")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelTurn {
    #[serde(default, deserialize_with = "lenient")]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, deserialize_with = "lenient")]
    pub inline_data: Option<InlineData>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, deserialize_with = "lenient")]
    pub mime_type: String,
    #[serde(default, deserialize_with = "lenient")]
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transcription {
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default, deserialize_with = "lenient")]
    pub time_left: Option<String>,
}

/// `rate=` parameter of an audio MIME type, e.g. `audio/pcm;rate=24000`.
fn mime_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

impl ServerMessage {
    /// Parse one text (or UTF-8 binary) frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LiveError::Protocol(e.to_string()))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Expand into events: transcripts, then every audio part, then
    /// interruption, then end of turn.
    pub fn into_events(self) -> Vec<InboundEvent> {
        if let Some(go_away) = &self.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "Server is about to close the session");
        }
        let Some(content) = self.server_content else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(InboundEvent::InputTranscriptDelta(text));
            }
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(InboundEvent::OutputTranscriptDelta(text));
            }
        }

        for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
            let Some(inline) = part.inline_data else {
                continue;
            };
            if inline.data.is_empty() {
                continue;
            }
            match talkmee_codec::decode(&inline.data) {
                Ok(samples) => events.push(InboundEvent::AudioChunk {
                    samples,
                    sample_rate: mime_rate(&inline.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, mime_type = %inline.mime_type, "Ignoring undecodable audio part");
                }
            }
        }

        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events(json: serde_json::Value) -> Vec<InboundEvent> {
        ServerMessage::parse(&json.to_string()).unwrap().into_events()
    }

    #[test]
    fn test_setup_message_shape() {
        let config = LiveConfig::default()
            .with_voice("Charon")
            .with_system_instruction("Be friendly.")
            .with_transcription(true, false);
        let value = serde_json::to_value(ClientMessage::setup(&config)).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-2.5-flash-native-audio-preview-12-2025",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Charon" } }
                        }
                    },
                    "systemInstruction": { "parts": [{ "text": "Be friendly." }] },
                    "inputAudioTranscription": {}
                }
            })
        );
    }

    #[test]
    fn test_audio_message_shape() {
        let frame = talkmee_codec::encode(&[0.0, 1.0], 16_000);
        let value = serde_json::to_value(ClientMessage::audio(&frame)).unwrap();
        assert_eq!(
            value,
            json!({ "realtimeInput": { "audio": { "mimeType": "audio/pcm;rate=16000", "data": "AAD/fw==" } } })
        );
    }

    #[test]
    fn test_audio_stream_end_shape() {
        let json = ClientMessage::audio_stream_end().to_json().unwrap();
        assert_eq!(json, r#"{"realtimeInput":{"audioStreamEnd":true}}"#);
    }

    #[test]
    fn test_setup_complete_yields_no_events() {
        let message = ServerMessage::parse(r#"{"setupComplete": {}}"#).unwrap();
        assert!(message.is_setup_complete());
        assert!(message.into_events().is_empty());
    }

    #[test]
    fn test_transcription_deltas() {
        let got = events(json!({
            "serverContent": {
                "inputTranscription": { "text": "Hel" },
                "outputTranscription": { "text": "Hi" }
            }
        }));
        assert_eq!(
            got,
            vec![
                InboundEvent::InputTranscriptDelta("Hel".into()),
                InboundEvent::OutputTranscriptDelta("Hi".into()),
            ]
        );
    }

    #[test]
    fn test_empty_transcription_ignored() {
        assert!(events(json!({ "serverContent": { "inputTranscription": { "text": "" } } })).is_empty());
    }

    #[test]
    fn test_every_audio_part_is_decoded() {
        let got = events(json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQA=" } },
                    { "text": "thinking" },
                    { "inlineData": { "mimeType": "audio/pcm", "data": "AgADAA==" } }
                ]}
            }
        }));
        assert_eq!(
            got,
            vec![
                InboundEvent::AudioChunk { samples: vec![1], sample_rate: 24_000 },
                InboundEvent::AudioChunk { samples: vec![2, 3], sample_rate: 24_000 },
            ]
        );
    }

    #[test]
    fn test_turn_complete_comes_after_content() {
        let got = events(json!({
            "serverContent": {
                "turnComplete": true,
                "outputTranscription": { "text": "Bye" },
                "modelTurn": { "parts": [{ "inlineData": { "data": "AQA=" } }] }
            }
        }));
        assert_eq!(got.first(), Some(&InboundEvent::OutputTranscriptDelta("Bye".into())));
        assert_eq!(got.last(), Some(&InboundEvent::TurnComplete));
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn test_interrupted() {
        assert_eq!(
            events(json!({ "serverContent": { "interrupted": true } })),
            vec![InboundEvent::Interrupted]
        );
    }

    #[test]
    fn test_mistyped_fields_are_ignored() {
        let got = events(json!({
            "serverContent": {
                "turnComplete": "yes",
                "interrupted": 1,
                "inputTranscription": { "text": 42 },
                "outputTranscription": { "text": "still here" },
                "modelTurn": { "parts": "nope" }
            }
        }));
        assert_eq!(got, vec![InboundEvent::OutputTranscriptDelta("still here".into())]);
    }

    #[test]
    fn test_undecodable_audio_is_skipped() {
        let got = events(json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "data": "!!!" } }] },
                "turnComplete": true
            }
        }));
        assert_eq!(got, vec![InboundEvent::TurnComplete]);
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let got = events(json!({ "usageMetadata": { "totalTokenCount": 12 }, "serverContent": { "generationComplete": true } }));
        assert!(got.is_empty());
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        assert!(matches!(ServerMessage::parse("{not json"), Err(LiveError::Protocol(_))));
    }

    #[test]
    fn test_mime_rate() {
        assert_eq!(mime_rate("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(mime_rate("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(mime_rate("audio/pcm"), None);
    }
}
