//! Transport Traits
//!
//! A [`Connector`] opens one tenant-scoped duplex channel and hands back a
//! pair of frame channels. The connector owns whatever IO tasks it needs;
//! the caller only ever sees typed frames.
//!
//! Closing semantics:
//! - Dropping [`TransportChannels::outbound`] closes the client side.
//! - The server side closing shows up as `inbound.recv()` returning `None`.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ids::TenantId;
use crate::protocol::{InboundFrame, OutboundFrame};

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Connection to peer failed
    ConnectionFailed(String),
    /// Connection was closed
    ConnectionClosed,
    /// Failed to send frame
    SendFailed(String),
    /// Frame serialization/deserialization error
    SerializationError(String),
    /// IO error from underlying transport
    IoError(std::io::Error),
    /// Transport not usable in its current configuration
    InvalidState(String),
    /// Intact frame whose payload is not a known message; safe to skip
    UndecodableFrame(String),
    /// Frame checksum mismatch - data corruption detected
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value received
        actual: u32,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            Self::UndecodableFrame(msg) => write!(f, "Undecodable frame: {msg}"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl TransportError {
    /// Whether the stream is still usable after this error
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::UndecodableFrame(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

/// Typed ends of an open duplex channel
#[derive(Debug)]
pub struct TransportChannels {
    /// Frames to the server
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Frames from the server
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Opens duplex channels to the push server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel for `tenant`
    ///
    /// Returning `Ok` means the transport is up; tenant confirmation is a
    /// protocol-level handshake performed by the caller.
    async fn open(&self, tenant: &TenantId) -> Result<TransportChannels, TransportError>;

    /// Human-readable endpoint description for logs
    fn endpoint(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: refused");

        let err = TransportError::ChecksumMismatch {
            expected: 0xdead_beef,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing socket");
        let err = TransportError::from(io_err);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("missing socket"));
    }
}
