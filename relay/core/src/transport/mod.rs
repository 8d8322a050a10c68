//! Transport Layer for the Push Channel
//!
//! Provides abstraction over the mechanisms that can carry the duplex
//! push channel:
//! - `InProcess`: Direct channel communication (embedded server, tests)
//! - `UnixSocket`: Local push relay via Unix domain sockets
//! - `WebSocket`: Remote push server (feature `websocket`)
//!
//! Every transport yields the same [`TransportChannels`], so the
//! connection manager is oblivious to which one is in use.

pub mod config;
pub mod factory;
pub mod frame;
pub mod in_process;
pub mod traits;
#[cfg(unix)]
pub mod unix_socket;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-exports for convenience
pub use config::{TransportConfig, TransportType};
pub use factory::create_connector;
pub use frame::FrameDecoder;
pub use in_process::{InProcessConnector, PeerEnd};
pub use traits::{Connector, TransportChannels, TransportError};

#[cfg(unix)]
pub use unix_socket::UnixSocketConnector;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
