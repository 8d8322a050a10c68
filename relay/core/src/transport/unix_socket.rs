//! Unix Socket Transport
//!
//! Connects to a local push relay over a Unix domain socket using the
//! length-prefixed frame codec.
//!
//! # Socket Location
//!
//! Default: `$XDG_RUNTIME_DIR/relay/push.sock`
//! Fallback: `/tmp/relay-$UID/push.sock`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                     ┌──────────────┐
//! │ ConnectionManager    │                     │  Push relay  │
//! │                      │  OutboundFrame ──►  │              │
//! │ outbound ─► writer ──┼────── push.sock ────┤              │
//! │ inbound  ◄─ reader ◄─┼─────────────────────┤              │
//! │                      │  ◄── InboundFrame   │              │
//! └──────────────────────┘                     └──────────────┘
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::ids::TenantId;
use crate::protocol::{InboundFrame, OutboundFrame};

use super::frame::{encode, FrameDecoder};
use super::traits::{Connector, TransportChannels, TransportError};

/// Per-direction channel capacity
const CHANNEL_CAPACITY: usize = 100;

/// Default socket path for the push relay
///
/// Uses `XDG_RUNTIME_DIR` if available, otherwise `/tmp/relay-$UID/`.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("relay").join("push.sock")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/relay-{uid}/push.sock"))
    }
}

/// Connector for a Unix socket push relay
#[derive(Clone, Debug)]
pub struct UnixSocketConnector {
    socket_path: PathBuf,
}

impl UnixSocketConnector {
    /// Connect to the socket at `socket_path`
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Connect to [`default_socket_path`]
    #[must_use]
    pub fn with_default_path() -> Self {
        Self::new(default_socket_path())
    }

    /// Socket path this connector dials
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

#[async_trait]
impl Connector for UnixSocketConnector {
    async fn open(&self, tenant: &TenantId) -> Result<TransportChannels, TransportError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "failed to connect to {}: {e}",
                self.socket_path.display()
            ))
        })?;

        let (mut read_half, mut write_half) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_CAPACITY);

        // Read task: socket -> inbound. Ends on EOF, IO error, or broken framing.
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];

            'read: loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) => {
                        tracing::debug!("push relay closed the socket");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "socket read error");
                        break;
                    }
                };

                decoder.push(&buf[..n]);
                loop {
                    match decoder.decode::<InboundFrame>() {
                        Ok(Some(frame)) => {
                            if inbound_tx.send(frame).await.is_err() {
                                break 'read;
                            }
                        }
                        Ok(None) => break,
                        // Unknown frame types from newer servers are skipped, not fatal
                        Err(e) if e.is_skippable() => {
                            tracing::debug!(error = %e, "ignoring undecodable push frame");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping connection on frame error");
                            break 'read;
                        }
                    }
                }
            }
        });

        // Write task: outbound -> socket. Dropping the sender closes the write half.
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let bytes = match encode(&frame) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode outbound frame");
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(&bytes).await {
                    tracing::warn!(error = %e, "socket write error");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        tracing::info!(path = %self.socket_path.display(), tenant = %tenant, "socket opened");

        Ok(TransportChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn endpoint(&self) -> String {
        format!("unix:{}", self.socket_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let dir = TempDir::new().unwrap();
        let connector = UnixSocketConnector::new(dir.path().join("missing.sock"));

        let result = connector.open(&"acme".into()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_frames_cross_the_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("push.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 1024];

            let hello = loop {
                let n = stream.read(&mut buf).await.unwrap();
                decoder.push(&buf[..n]);
                if let Some(frame) = decoder.decode::<OutboundFrame>().unwrap() {
                    break frame;
                }
            };

            let tenant_id = match hello {
                OutboundFrame::Hello { tenant_id } => tenant_id,
                other => panic!("expected hello, got {other:?}"),
            };
            let reply = encode(&InboundFrame::Welcome { tenant_id }).unwrap();
            stream.write_all(&reply).await.unwrap();
        });

        let connector = UnixSocketConnector::new(path);
        let mut channels = connector.open(&"acme".into()).await.unwrap();
        channels
            .outbound
            .send(OutboundFrame::Hello {
                tenant_id: "acme".into(),
            })
            .await
            .unwrap();

        let reply = channels.inbound.recv().await.unwrap();
        assert_eq!(
            reply,
            InboundFrame::Welcome {
                tenant_id: "acme".into()
            }
        );

        server.await.unwrap();
        // Server task ended and dropped its stream
        assert!(channels.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_frame_type_keeps_socket_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("push.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut bytes = encode(&serde_json::json!({
                "type": "typing",
                "conversationId": "c-1",
            }))
            .unwrap();
            bytes.extend(
                encode(&InboundFrame::Joined {
                    conversation_id: "c-1".into(),
                })
                .unwrap(),
            );
            stream.write_all(&bytes).await.unwrap();
            stream
        });

        let connector = UnixSocketConnector::new(path);
        let mut channels = connector.open(&"acme".into()).await.unwrap();

        assert_eq!(
            channels.inbound.recv().await,
            Some(InboundFrame::Joined {
                conversation_id: "c-1".into()
            })
        );

        // Still open while the server holds its end
        let _stream = server.await.unwrap();
        assert!(channels.inbound.try_recv().is_err());
        assert!(!channels.outbound.is_closed());
    }

    #[test]
    fn test_default_socket_path() {
        let path = default_socket_path();
        assert!(path.to_string_lossy().ends_with("push.sock"));
    }
}
