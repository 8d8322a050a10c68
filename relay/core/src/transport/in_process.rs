//! In-Process Transport
//!
//! Channel-backed connector for embedding a push server in the same
//! process, and for driving the protocol from tests without sockets.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut peers) = InProcessConnector::new();
//!
//! // Server side: accept each opened channel
//! tokio::spawn(async move {
//!     while let Some(mut peer) = peers.recv().await {
//!         peer.welcome().await?;
//!         // read peer.next_request(), push peer.push(frame)
//!     }
//! });
//! ```

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ids::{ConversationId, TenantId};
use crate::protocol::{InboundFrame, OutboundFrame};

use super::traits::{Connector, TransportChannels, TransportError};

/// Default per-direction channel capacity
const DEFAULT_CAPACITY: usize = 100;

/// Server half of an in-process channel
#[derive(Debug)]
pub struct PeerEnd {
    /// Tenant the client asked for
    pub tenant_id: TenantId,
    /// Push frames to the client
    pub inbound: mpsc::Sender<InboundFrame>,
    /// Requests from the client
    pub outbound: mpsc::Receiver<OutboundFrame>,
}

impl PeerEnd {
    /// Push a frame to the client
    pub async fn push(&self, frame: InboundFrame) -> Result<(), TransportError> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("client end dropped".to_string()))
    }

    /// Confirm the handshake for the requested tenant
    pub async fn welcome(&self) -> Result<(), TransportError> {
        self.push(InboundFrame::Welcome {
            tenant_id: self.tenant_id.clone(),
        })
        .await
    }

    /// Acknowledge a room join
    pub async fn ack_join(&self, conversation_id: ConversationId) -> Result<(), TransportError> {
        self.push(InboundFrame::Joined { conversation_id }).await
    }

    /// Next request from the client; `None` once the client closed
    pub async fn next_request(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }
}

/// Connector whose channels terminate in this process
#[derive(Clone, Debug)]
pub struct InProcessConnector {
    peers: mpsc::UnboundedSender<PeerEnd>,
    capacity: usize,
}

impl InProcessConnector {
    /// Create a connector and the receiver on which opened channels appear
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerEnd>) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create with custom channel capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::UnboundedReceiver<PeerEnd>) {
        let (peers, accept_rx) = mpsc::unbounded_channel();
        (Self { peers, capacity }, accept_rx)
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn open(&self, tenant: &TenantId) -> Result<TransportChannels, TransportError> {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.capacity);

        self.peers
            .send(PeerEnd {
                tenant_id: tenant.clone(),
                inbound: inbound_tx,
                outbound: outbound_rx,
            })
            .map_err(|_| TransportError::ConnectionFailed("no in-process peer listening".into()))?;

        Ok(TransportChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn endpoint(&self) -> String {
        "in-process".to_string()
    }
}
