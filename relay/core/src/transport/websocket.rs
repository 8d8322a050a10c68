//! WebSocket Transport
//!
//! Connects to a remote push server. Each frame travels as one JSON text
//! message; the byte-level frame codec is not needed since WebSocket is
//! already message oriented.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

use crate::ids::TenantId;
use crate::protocol::{InboundFrame, OutboundFrame};

use super::traits::{Connector, TransportChannels, TransportError};

/// Per-direction channel capacity
const CHANNEL_CAPACITY: usize = 100;

/// Connector for a WebSocket push server
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Dial `url` (`ws://` or `wss://`)
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, tenant: &TenantId) -> Result<TransportChannels, TransportError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to connect to {}: {e}", self.url))
        })?;

        let (mut sink, mut stream) = ws_stream.split();
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    // Ping/pong are answered by tungstenite; binary is not part of the protocol
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read error");
                        break;
                    }
                };

                match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    // Unknown frame types from newer servers are skipped, not fatal
                    Err(e) => tracing::debug!(error = %e, "ignoring undecodable push frame"),
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode outbound frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(json)).await {
                    tracing::warn!(error = %e, "websocket write error");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tracing::info!(url = %self.url, tenant = %tenant, "websocket opened");

        Ok(TransportChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        // Port 9 (discard) is essentially never served locally
        let connector = WebSocketConnector::new("ws://127.0.0.1:9/push");
        let result = connector.open(&"acme".into()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[test]
    fn test_endpoint_is_url() {
        let connector = WebSocketConnector::new("wss://push.example.com/ws");
        assert_eq!(connector.endpoint(), "wss://push.example.com/ws");
    }
}
