use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::LiveConfig;
use crate::session::{LiveConnection, LiveConnector, TransportEvent, CHANNEL_CAPACITY};
use crate::wire::{ClientMessage, RealtimeInput, ServerMessage};
use crate::{LiveError, Result};

/// In-process connector for tests and offline runs.
///
/// Every successful `connect` leaves a [`RemoteEnd`] behind that plays the
/// server: it sees what the client sent and can push server messages.
#[derive(Default)]
pub struct InMemoryConnector {
    remotes: Mutex<VecDeque<RemoteEnd>>,
    fail_next: Mutex<Option<String>>,
    configs: Mutex<Vec<LiveConfig>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` fail with a connection error.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *lock(&self.fail_next) = Some(reason.into());
    }

    /// Server side of the oldest connection not yet taken.
    pub fn take_remote(&self) -> Option<RemoteEnd> {
        lock(&self.remotes).pop_front()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.configs).len()
    }

    /// Config of the most recent connection attempt.
    pub fn last_config(&self) -> Option<LiveConfig> {
        lock(&self.configs).last().cloned()
    }
}

#[async_trait]
impl LiveConnector for InMemoryConnector {
    async fn connect(&self, config: &LiveConfig) -> Result<LiveConnection> {
        lock(&self.configs).push(config.clone());
        if let Some(reason) = lock(&self.fail_next).take() {
            return Err(LiveError::Connection(reason));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        lock(&self.remotes).push_back(RemoteEnd {
            outbound: outbound_rx,
            inbound: inbound_tx,
        });

        Ok(LiveConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Server side of an in-memory connection.
pub struct RemoteEnd {
    outbound: mpsc::Receiver<ClientMessage>,
    inbound: mpsc::Sender<TransportEvent>,
}

impl RemoteEnd {
    pub fn push(&self, message: ServerMessage) {
        self.deliver(TransportEvent::Message(message));
    }

    /// Push a raw server message.
    pub fn push_json(&self, json: &str) -> Result<()> {
        self.push(ServerMessage::parse(json)?);
        Ok(())
    }

    pub fn close(&self, reason: Option<&str>) {
        self.deliver(TransportEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    pub fn fail(&self, reason: &str) {
        self.deliver(TransportEvent::Failed(reason.to_string()));
    }

    fn deliver(&self, event: TransportEvent) {
        if self.inbound.try_send(event).is_err() {
            tracing::debug!("In-memory client is gone or backed up");
        }
    }

    /// Drain every message the client has sent so far.
    pub fn drain_sent(&mut self) -> Vec<ClientMessage> {
        let mut sent = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            sent.push(message);
        }
        sent
    }

    /// Base64 payloads of audio sent so far, in order.
    pub fn sent_audio(&mut self) -> Vec<String> {
        self.drain_sent()
            .into_iter()
            .filter_map(|message| match message {
                ClientMessage::RealtimeInput(RealtimeInput {
                    audio: Some(blob), ..
                }) => Some(blob.data),
                _ => None,
            })
            .collect()
    }

    /// Whether an `audioStreamEnd` is among the unread messages.
    pub fn received_stream_end(&mut self) -> bool {
        self.drain_sent().into_iter().any(|message| {
            matches!(
                message,
                ClientMessage::RealtimeInput(RealtimeInput {
                    audio_stream_end: Some(true),
                    ..
                })
            )
        })
    }
}
