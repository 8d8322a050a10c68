//! Outbound Frame Handle
//!
//! Shared slot holding the sender half of the live channel. The
//! connection manager installs a sender on connect and clears it on
//! close; everything else only sends through it.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::protocol::OutboundFrame;
use crate::transport::TransportError;

/// Cloneable handle for sending frames over the current connection
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    sender: Arc<RwLock<Option<mpsc::Sender<OutboundFrame>>>>,
}

impl Outbox {
    /// Create an outbox with no connection behind it
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route frames to a freshly opened channel
    pub fn install(&self, sender: mpsc::Sender<OutboundFrame>) {
        *self.sender.write() = Some(sender);
    }

    /// Detach from the channel; subsequent sends fail with `NotConnected`
    pub fn close(&self) {
        self.sender.write().take();
    }

    /// Whether a channel is installed and still open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender
            .read()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    fn current(&self) -> Result<mpsc::Sender<OutboundFrame>, RelayError> {
        self.sender.read().clone().ok_or(RelayError::NotConnected)
    }

    /// Send a frame, waiting for buffer space
    ///
    /// # Errors
    ///
    /// `NotConnected` without a channel, `Transport` if the channel closed.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), RelayError> {
        self.current()?
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed.into())
    }

    /// Send without waiting; used from contexts that must not block
    ///
    /// # Errors
    ///
    /// As [`Outbox::send`], plus `Transport` when the buffer is full.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), RelayError> {
        self.current()?.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::SendFailed("outbound buffer full".to_string()).into()
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join() -> OutboundFrame {
        OutboundFrame::Join {
            conversation_id: "c-1".into(),
        }
    }

    #[tokio::test]
    async fn test_send_without_channel_is_not_connected() {
        let outbox = Outbox::new();
        assert!(!outbox.is_open());
        assert!(matches!(outbox.send(join()).await, Err(RelayError::NotConnected)));
        assert!(matches!(outbox.try_send(join()), Err(RelayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_install_and_close() {
        let outbox = Outbox::new();
        let (tx, mut rx) = mpsc::channel(1);
        outbox.install(tx);
        assert!(outbox.is_open());

        outbox.send(join()).await.unwrap();
        assert_eq!(rx.recv().await, Some(join()));

        outbox.close();
        assert!(!outbox.is_open());
        assert!(matches!(outbox.send(join()).await, Err(RelayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_try_send_reports_full_buffer() {
        let outbox = Outbox::new();
        let (tx, _rx) = mpsc::channel(1);
        outbox.install(tx);

        outbox.try_send(join()).unwrap();
        assert!(matches!(
            outbox.try_send(join()),
            Err(RelayError::Transport(TransportError::SendFailed(_)))
        ));
    }
}
