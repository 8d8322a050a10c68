//! Transport Factory
//!
//! Builds a [`Connector`] from configuration so callers never name a
//! concrete transport.

use std::sync::Arc;

use super::{
    config::{TransportConfig, TransportType},
    traits::{Connector, TransportError},
};

#[cfg(unix)]
use super::unix_socket::UnixSocketConnector;

#[cfg(feature = "websocket")]
use super::websocket::WebSocketConnector;

/// Create a connector based on configuration
///
/// # Errors
///
/// Returns `TransportError::InvalidState` for `InProcess`, which needs a
/// live peer and must be built with `InProcessConnector::new()` instead.
pub fn create_connector(config: &TransportConfig) -> Result<Arc<dyn Connector>, TransportError> {
    match &config.transport {
        TransportType::InProcess => Err(TransportError::InvalidState(
            "InProcess transport requires a peer; use InProcessConnector::new() directly".into(),
        )),

        #[cfg(unix)]
        TransportType::UnixSocket { path } => {
            let connector = match path {
                Some(socket_path) => UnixSocketConnector::new(socket_path.clone()),
                None => UnixSocketConnector::with_default_path(),
            };
            Ok(Arc::new(connector))
        }

        #[cfg(feature = "websocket")]
        TransportType::WebSocket { url } => Ok(Arc::new(WebSocketConnector::new(url.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_process_needs_explicit_construction() {
        let result = create_connector(&TransportConfig::default());
        match result {
            Err(TransportError::InvalidState(msg)) => assert!(msg.contains("InProcess")),
            Err(other) => panic!("expected InvalidState, got: {other}"),
            Ok(_) => panic!("expected error for InProcess transport"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_socket_custom_path() {
        use std::path::PathBuf;

        let config = TransportConfig {
            transport: TransportType::UnixSocket {
                path: Some(PathBuf::from("/tmp/test-relay.sock")),
            },
        };
        let connector = create_connector(&config).unwrap();
        assert_eq!(connector.endpoint(), "unix:/tmp/test-relay.sock");
    }
}
