//! Live audio session with the model.
//!
//! A [`LiveSession`] is an owned handle over one bidirectional connection:
//! microphone frames go out as base64 PCM, and server messages come back as
//! ordered [`InboundEvent`]s (transcription deltas, model audio, interruption,
//! end of turn). Connections are produced by a [`LiveConnector`]; the
//! production one speaks the Gemini Live WebSocket protocol.

mod config;
mod error;
mod event;
mod memory;
mod session;
mod state;
pub mod wire;
mod ws;

pub use config::{LiveConfig, Modality, DEFAULT_LIVE_MODEL};
pub use error::{LiveError, Result};
pub use event::InboundEvent;
pub use memory::{InMemoryConnector, RemoteEnd};
pub use session::{LiveConnection, LiveConnector, LiveSession, TransportEvent};
pub use state::SessionState;
pub use wire::{ClientMessage, ServerMessage};
pub use ws::WebSocketConnector;
