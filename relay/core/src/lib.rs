//! Relay Core - Streaming Answer Delivery for Assistant Clients
//!
//! Client side of a two-transport protocol: questions go out over an
//! ordinary HTTP request, answers come back incrementally over a
//! tenant-scoped duplex push channel. This crate correlates the two,
//! keeps the partial answer in order, notices when a stream goes quiet,
//! and lets the caller cancel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         StreamClient                             │
//! │                                                                  │
//! │   ask() ──► RoomCorrelator ──► SubmissionApi ──► DispatcherHandle│
//! │               (join + ack)       (HTTP)           (begin)        │
//! └──────┬──────────────┬───────────────────────────────┬────────────┘
//!        │              │ Outbox                        │ commands
//!        ▼              ▼                               ▼
//! ┌──────────────┐  ┌──────────────┐          ┌────────────────────┐
//! │ Connection   │  │  Connector   │          │ Dispatcher task    │
//! │ Manager      │──│ (in-process, │          │  SessionRegistry   │
//! │ (reconnect,  │  │  unix, ws)   │          │  + liveness timer  │
//! │  generation) │  └──────┬───────┘          └─────────▲──────────┘
//! └──────────────┘         │ inbound frames             │
//!                          ▼                            │
//!                   reader task ──► ClientRouter ───────┘
//!                                      └─► joined ──► RoomCorrelator
//! ```
//!
//! # Key Types
//!
//! - [`StreamClient`]: caller-facing facade (`connect`, `ask`, `cancel`)
//! - [`ConnectionManager`]: owns the push channel and its reconnection
//! - [`RoomCorrelator`]: joins conversation rooms before submission
//! - [`SessionRegistry`]: in-flight answers keyed by correlation id
//! - [`CallbackSet`]: per-session `on_update` / `on_complete` / `on_error`
//!
//! # Quick Start
//!
//! ```ignore
//! use relay_core::{AskOutcome, AskRequest, CallbackSet, HttpSubmissionApi, StreamClient};
//!
//! let config = relay_core::load_config()?;
//! let connector = relay_core::transport::create_connector(&config.transport)?;
//! let api = Arc::new(HttpSubmissionApi::new(&config.submission)?);
//! let client = StreamClient::new(connector, api, config.client_options());
//!
//! client.connect("acme").await?;
//! let callbacks = CallbackSet::new()
//!     .on_update(|u| println!("{}", u.content))
//!     .on_complete(|c| println!("done: {}", c.content));
//! client.ask(AskRequest::new(conversation_id, "Which guarantees expire?"), callbacks).await?;
//! ```
//!
//! # Module Overview
//!
//! - [`client`]: the facade and the inbound frame router
//! - [`config`]: TOML / environment / CLI configuration
//! - [`connection`]: connection lifecycle, reconnection, outbound handle
//! - [`error`]: caller-facing and per-session error types
//! - [`ids`]: identifier newtypes
//! - [`protocol`]: wire frames of the push channel
//! - [`rooms`]: room subscriptions and join acknowledgement
//! - [`streaming`]: session state machine, registry, dispatcher
//! - [`submission`]: HTTP submission and synchronous fallback
//! - [`transport`]: connectors for the push channel

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod ids;
pub mod protocol;
pub mod rooms;
pub mod streaming;
pub mod submission;
pub mod transport;

// Re-exports for convenience
pub use client::{AskOutcome, AskRequest, ClientOptions, ClientRouter, StreamClient};
pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectivityState, InboundRouter, Outbox, ReconnectPolicy,
};
pub use error::{RelayError, SessionError};
pub use ids::{ConversationId, ConversationRef, CorrelationId, PlaceholderId, TenantId, UserMessageId};
pub use protocol::{InboundFrame, OutboundFrame, PushEvent, PushKind, SuggestedAction, ToolPhase};
pub use rooms::{AckState, RoomConfig, RoomCorrelator, RoomSubscription};
pub use streaming::{
    Activity, CallbackSet, Completion, DispatcherHandle, SessionFailure, SessionNotice,
    SessionRegistry, SessionSnapshot, SessionStatus, SessionUpdate, StreamConfig,
};
pub use submission::{
    FallbackAnswer, HttpSubmissionApi, SubmissionApi, SubmissionConfig, SubmissionError,
    SubmitReceipt, SubmitRequest,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig,
};
