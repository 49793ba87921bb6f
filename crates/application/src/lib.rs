//! Session controllers for free conversation and pronunciation drills.
//!
//! Both modes share an [`AudioEngine`] that wires microphone frames into a
//! live session and the session's audio into the playback scheduler. A
//! [`SessionHost`] drives either controller from one task.

mod clock;
mod conversation;
mod drill;
mod engine;
mod error;
mod host;
mod settings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::ConversationController;
pub use drill::DrillController;
pub use engine::{AudioEngine, EngineInput, SessionEnd};
pub use error::{Result, SessionError};
pub use host::{Command, SessionDriver, SessionHost};
pub use settings::{
    SessionSettings, SettingsError, AUTO_ADVANCE_DELAY_MS, CONVERSATION_VOICE, DEFAULT_SENTENCES,
    DEFAULT_VOCABULARY, TICK_INTERVAL_MS, TUTOR_INSTRUCTION,
};
