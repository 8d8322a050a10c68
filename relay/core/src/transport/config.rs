//! Transport Configuration
//!
//! Selects which transport carries the push channel.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Transport type selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportType {
    /// Channels inside this process (embedded server, tests)
    ///
    /// Cannot be built from configuration alone; construct an
    /// `InProcessConnector` directly.
    #[default]
    InProcess,

    /// Unix domain socket to a local push relay
    #[cfg(unix)]
    UnixSocket {
        /// Socket path (None = default path)
        path: Option<PathBuf>,
    },

    /// WebSocket to a remote push server
    #[cfg(feature = "websocket")]
    WebSocket {
        /// Server URL (`ws://` or `wss://`)
        url: String,
    },
}

/// Transport configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport to use
    pub transport: TransportType,
}

impl TransportConfig {
    /// Unix socket at the default path
    #[cfg(unix)]
    #[must_use]
    pub fn local() -> Self {
        Self {
            transport: TransportType::UnixSocket { path: None },
        }
    }

    /// WebSocket to `url`
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            transport: TransportType::WebSocket { url: url.into() },
        }
    }

    /// Check if this is an in-process configuration
    #[must_use]
    pub fn is_in_process(&self) -> bool {
        matches!(self.transport, TransportType::InProcess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_in_process() {
        assert!(TransportConfig::default().is_in_process());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_uses_default_socket() {
        let config = TransportConfig::local();
        assert_eq!(config.transport, TransportType::UnixSocket { path: None });
    }

    #[cfg(unix)]
    #[test]
    fn test_transport_type_toml_shape() {
        let parsed: TransportType =
            toml::from_str("kind = \"unix_socket\"\npath = \"/run/relay.sock\"").unwrap();
        assert_eq!(
            parsed,
            TransportType::UnixSocket {
                path: Some(PathBuf::from("/run/relay.sock"))
            }
        );
    }
}
