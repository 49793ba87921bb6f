use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::config::LiveConfig;
use crate::session::{LiveConnection, LiveConnector, TransportEvent, CHANNEL_CAPACITY};
use crate::wire::{ClientMessage, ServerMessage};
use crate::{LiveError, Result};

/// Gemini Live WebSocket endpoint.
pub const GEMINI_LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Connects to Gemini Live over a WebSocket.
///
/// The connector sends the setup message and waits for `setupComplete`
/// before handing the connection over, so a returned connection is ready
/// for audio. No reconnection is attempted.
#[derive(Clone)]
pub struct WebSocketConnector {
    api_key: String,
    endpoint: String,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: GEMINI_LIVE_ENDPOINT.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Text of a frame that carries JSON. Gemini sends JSON in binary frames too.
fn frame_text(message: &WsMessage) -> Option<&str> {
    match message {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(&data[..]).ok(),
        _ => None,
    }
}

#[async_trait]
impl LiveConnector for WebSocketConnector {
    async fn connect(&self, config: &LiveConfig) -> Result<LiveConnection> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        tracing::info!(endpoint = %self.endpoint, model = %config.model, "Connecting to live endpoint");

        let (mut stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::Connection(e.to_string()))?;

        let setup = ClientMessage::setup(config).to_json()?;
        tracing::debug!(setup = %setup, "Sending live setup");
        stream
            .send(WsMessage::Text(setup.into()))
            .await
            .map_err(|e| LiveError::Connection(format!("failed to send setup: {e}")))?;

        let handshake = tokio::time::timeout(self.handshake_timeout, async {
            while let Some(frame) = stream.next().await {
                let frame = frame.map_err(|e| LiveError::Connection(e.to_string()))?;
                if let WsMessage::Close(close) = &frame {
                    return Err(LiveError::Connection(format!(
                        "closed before setup completed: {close:?}"
                    )));
                }
                if let Some(text) = frame_text(&frame) {
                    match ServerMessage::parse(text) {
                        Ok(message) if message.is_setup_complete() => return Ok(()),
                        Ok(_) => tracing::debug!("Ignoring message before setupComplete"),
                        Err(e) => tracing::warn!(error = %e, "Unparsable message during setup"),
                    }
                }
            }
            Err(LiveError::Connection("stream ended before setup completed".into()))
        })
        .await;

        match handshake {
            Ok(Ok(())) => tracing::info!("Live setup complete"),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(LiveError::Connection(format!(
                    "setupComplete timeout ({}s)",
                    self.handshake_timeout.as_secs()
                )))
            }
        }

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = writer_cancel.cancelled() => break,

                    message = outbound_rx.recv() => {
                        // Session dropped its sender: close politely.
                        let Some(message) = message else { break };
                        let json = match message.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to serialize outbound message");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::Text(json.into())).await {
                            tracing::warn!(error = %e, "WebSocket send failed, closing writer");
                            break;
                        }
                    }
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
            writer_cancel.cancel();
            tracing::debug!("Live writer terminated");
        });

        let reader_cancel = cancel;
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;

                    _ = reader_cancel.cancelled() => break,

                    frame = source.next() => frame,
                };

                let event = match frame {
                    Some(Ok(WsMessage::Close(close))) => {
                        let reason = close.map(|c| c.reason.to_string()).filter(|r| !r.is_empty());
                        let _ = inbound_tx.send(TransportEvent::Closed { reason }).await;
                        break;
                    }
                    Some(Ok(frame)) => {
                        let Some(text) = frame_text(&frame) else {
                            if matches!(frame, WsMessage::Binary(_)) {
                                tracing::warn!("Skipping non-JSON binary frame");
                            }
                            continue;
                        };
                        match ServerMessage::parse(text) {
                            Ok(message) => TransportEvent::Message(message),
                            Err(e) => {
                                tracing::warn!(error = %e, "Ignoring malformed server message");
                                continue;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(TransportEvent::Failed(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(TransportEvent::Closed { reason: None }).await;
                        break;
                    }
                };

                if inbound_tx.send(event).await.is_err() {
                    tracing::debug!("Session dropped its receiver, closing reader");
                    break;
                }
            }
            reader_cancel.cancel();
            tracing::debug!("Live reader terminated");
        });

        Ok(LiveConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_text_accepts_json_binary() {
        let binary = WsMessage::Binary(br#"{"setupComplete":{}}"#.to_vec().into());
        assert_eq!(frame_text(&binary), Some(r#"{"setupComplete":{}}"#));

        let raw = WsMessage::Binary(vec![0x01, 0x02].into());
        assert_eq!(frame_text(&raw), None);

        let text = WsMessage::Text("{}".to_string().into());
        assert_eq!(frame_text(&text), Some("{}"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let connector = WebSocketConnector::new("key")
            .with_endpoint("ws://127.0.0.1:9")
            .with_handshake_timeout(Duration::from_millis(200));
        let result = connector.connect(&LiveConfig::default()).await;
        assert!(matches!(result, Err(LiveError::Connection(_))));
    }
}
