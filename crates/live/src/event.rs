/// Semantic events decoded from server messages, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Partial transcription of the learner's audio.
    InputTranscriptDelta(String),
    /// Partial transcription of the model's audio.
    OutputTranscriptDelta(String),
    /// Decoded PCM16 model audio.
    AudioChunk { samples: Vec<i16>, sample_rate: u32 },
    /// The model finished its turn.
    TurnComplete,
    /// The learner barged in; queued model audio must be dropped.
    Interrupted,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::InputTranscriptDelta(_) => "input_transcript",
            InboundEvent::OutputTranscriptDelta(_) => "output_transcript",
            InboundEvent::AudioChunk { .. } => "audio",
            InboundEvent::TurnComplete => "turn_complete",
            InboundEvent::Interrupted => "interrupted",
        }
    }
}
