use async_trait::async_trait;
use talkmee_codec::EncodedFrame;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::config::LiveConfig;
use crate::event::InboundEvent;
use crate::state::SessionState;
use crate::wire::{ClientMessage, ServerMessage};
use crate::{LiveError, Result};

/// Capacity of the outbound and inbound channels of a connection.
pub(crate) const CHANNEL_CAPACITY: usize = 256;

/// What the transport reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// Remote end closed the connection.
    Closed { reason: Option<String> },
    /// The connection broke.
    Failed(String),
}

/// An established, handshaken connection.
pub struct LiveConnection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to the live model.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and complete the setup handshake.
    async fn connect(&self, config: &LiveConfig) -> Result<LiveConnection>;
}

/// One live conversation with the model.
pub struct LiveSession {
    id: Uuid,
    state: SessionState,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    frames_sent: u64,
    frames_dropped: u64,
    frames_shed: u64,
}

impl LiveSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            outbound: None,
            inbound: None,
            frames_sent: 0,
            frames_dropped: 0,
            frames_shed: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames discarded because the session was not open.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Frames discarded while open because the outbound queue was full.
    pub fn frames_shed(&self) -> u64 {
        self.frames_shed
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(&next) {
            tracing::debug!(session_id = %self.id, from = self.state.label(), to = next.label(), "Ignoring invalid session transition");
            return;
        }
        tracing::debug!(session_id = %self.id, from = self.state.label(), to = next.label(), "Session state");
        self.state = next;
    }

    fn release(&mut self) {
        self.outbound = None;
        self.inbound = None;
    }

    /// Open the session. Only valid from `Idle`.
    #[tracing::instrument(level = "debug", skip(self, connector, config), fields(session_id = %self.id, model = %config.model))]
    pub async fn connect(&mut self, connector: &dyn LiveConnector, config: &LiveConfig) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(LiveError::InvalidState(self.state.label()));
        }
        self.transition(SessionState::Connecting);

        match connector.connect(config).await {
            Ok(connection) => {
                self.outbound = Some(connection.outbound);
                self.inbound = Some(connection.inbound);
                self.transition(SessionState::Open);
                tracing::info!(session_id = %self.id, "Live session open");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Live session failed to connect");
                self.transition(SessionState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Send one microphone frame. Frames outside `Open` are dropped.
    ///
    /// Accepted frames reach the transport in FIFO order. When the outbound
    /// queue is full the new frame is shed instead of blocking capture, so a
    /// stalled socket costs audio rather than latency.
    pub fn send(&mut self, frame: &EncodedFrame) -> bool {
        if !self.state.is_open() {
            self.frames_dropped += 1;
            tracing::debug!(session_id = %self.id, state = self.state.label(), "Dropping frame; session not open");
            return false;
        }
        let Some(outbound) = self.outbound.as_ref() else {
            self.frames_dropped += 1;
            return false;
        };
        match outbound.try_send(ClientMessage::audio(frame)) {
            Ok(()) => {
                self.frames_sent += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.frames_shed += 1;
                if self.frames_shed % 10 == 1 {
                    tracing::warn!(session_id = %self.id, shed = self.frames_shed, "Transport backed up, shedding frames");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.frames_dropped += 1;
                self.transition(SessionState::Error("transport closed".into()));
                self.release();
                false
            }
        }
    }

    /// Wait for the next transport event. Never resolves without a connection.
    pub async fn recv(&mut self) -> TransportEvent {
        let Some(inbound) = self.inbound.as_mut() else {
            return std::future::pending().await;
        };
        match inbound.recv().await {
            Some(event) => event,
            None => {
                self.inbound = None;
                TransportEvent::Closed { reason: None }
            }
        }
    }

    /// Next transport event if one is already queued.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        let inbound = self.inbound.as_mut()?;
        match inbound.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.inbound = None;
                Some(TransportEvent::Closed { reason: None })
            }
        }
    }

    /// Apply a transport event and return the semantic events it carries.
    ///
    /// Messages arriving after the session left `Open` are discarded.
    pub fn handle(&mut self, event: TransportEvent) -> Vec<InboundEvent> {
        match event {
            TransportEvent::Message(message) => {
                if !self.state.is_open() {
                    tracing::debug!(session_id = %self.id, state = self.state.label(), "Discarding message for inactive session");
                    return Vec::new();
                }
                message.into_events()
            }
            TransportEvent::Closed { reason } => {
                if !self.state.is_terminal() {
                    tracing::info!(session_id = %self.id, reason = ?reason, "Live session closed by server");
                    self.transition(SessionState::Closed);
                }
                self.release();
                Vec::new()
            }
            TransportEvent::Failed(reason) => {
                if !self.state.is_terminal() {
                    tracing::warn!(session_id = %self.id, %reason, "Live session failed");
                    self.transition(SessionState::Error(reason));
                }
                self.release();
                Vec::new()
            }
        }
    }

    /// Close the session. Safe to call in any state.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Open => {
                self.transition(SessionState::Closing);
                if let Some(outbound) = self.outbound.as_ref() {
                    if outbound.try_send(ClientMessage::audio_stream_end()).is_err() {
                        tracing::debug!(session_id = %self.id, "Could not send audioStreamEnd");
                    }
                }
                self.release();
                self.transition(SessionState::Closed);
                tracing::info!(session_id = %self.id, sent = self.frames_sent, dropped = self.frames_dropped, shed = self.frames_shed, "Live session closed");
            }
            SessionState::Idle | SessionState::Connecting | SessionState::Closing => {
                self.release();
                self.transition(SessionState::Closed);
            }
            SessionState::Closed | SessionState::Error(_) => self.release(),
        }
    }
}

impl Default for LiveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}
