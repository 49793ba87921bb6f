//! Shared event contracts between the session engine and its host.
//!
//! Every UI-visible transition is published as one of these DTOs on an
//! [`EventBus`]. Using shared types keeps field names in sync between the
//! emitting controller and whatever renders them.

mod bus;

pub use bus::{
    emit_event, EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus,
    TracingEventBus,
};

use serde::{Deserialize, Serialize};
use talkmee_transcript::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Conversation,
    Drill,
}

/// Phase of a pronunciation drill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrillState {
    #[default]
    Idle,
    Recording,
    Analyzing,
    ShowingResult,
    AutoAdvanceCountdown,
}

/// What the drill asks the learner to say.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeKind {
    #[default]
    Sentence,
    Vocabulary,
}

/// Emitted when the live session changes state.
///
/// Producers: conversation and drill controllers
/// Consumers: host UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateEvent {
    pub mode: SessionMode,
    /// One of `idle`, `connecting`, `open`, `closing`, `closed`, `error`.
    pub state: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Whether the microphone is capturing.
    pub active: bool,
}

/// Live, uncommitted transcription text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub user: String,
    pub model: String,
}

/// One committed side of an exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub playing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillStateEvent {
    pub state: DrillState,
    pub is_recording: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetChangedEvent {
    pub target: String,
    pub kind: PracticeKind,
}

/// Pronunciation evaluation ready for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillResultEvent {
    pub target: String,
    pub spoken: String,
    pub score: u8,
    pub feedback: String,
    pub highlighted: String,
}

/// Whole seconds left before the drill moves to the next target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountdownEvent {
    pub seconds_remaining: u64,
}

/// A user-facing error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionErrorEvent {
    pub message: String,
}

/// Event names as constants to prevent typos.
pub mod event_names {
    pub const SESSION_STATE: &str = "session:state";
    pub const SESSION_TRANSCRIPT: &str = "session:transcript";
    pub const SESSION_TURN: &str = "session:turn";
    pub const SESSION_PLAYBACK: &str = "session:playback";
    pub const SESSION_ERROR: &str = "session:error";
    pub const DRILL_STATE: &str = "drill:state";
    pub const DRILL_TARGET: &str = "drill:target";
    pub const DRILL_RESULT: &str = "drill:result";
    pub const DRILL_COUNTDOWN: &str = "drill:countdown";
}
