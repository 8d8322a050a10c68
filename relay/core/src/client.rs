//! Stream Client
//!
//! Caller-facing facade that ties the pieces together:
//!
//! ```text
//!   ask() ──► resolve conversation ──► join room ──► submit ──► begin session
//!               (promote placeholder)    (wait ack)   (HTTP)     (dispatcher)
//!     │
//!     └── channel unavailable ──► complete() over HTTP ──► whole answer
//! ```
//!
//! Inbound frames are split by [`ClientRouter`]: `joined` goes to the room
//! correlator, stream events go to the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{ConnectionConfig, ConnectionManager, InboundRouter, Outbox};
use crate::error::RelayError;
use crate::ids::{ConversationId, ConversationRef, CorrelationId, TenantId, UserMessageId};
use crate::protocol::InboundFrame;
use crate::rooms::{RoomConfig, RoomCorrelator};
use crate::streaming::{
    CallbackSet, Dispatcher, DispatcherHandle, RegistryStats, SessionSnapshot, StreamConfig,
};
use crate::submission::{FallbackAnswer, SubmissionApi, SubmitRequest};
use crate::transport::Connector;

/// Tunables for every component of the client
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientOptions {
    /// Connection lifecycle
    pub connection: ConnectionConfig,
    /// Room joins
    pub rooms: RoomConfig,
    /// Stream sessions
    pub streams: StreamConfig,
}

/// One question for the assistant
#[derive(Clone, Debug, PartialEq)]
pub struct AskRequest {
    /// Conversation to ask in
    pub conversation: ConversationRef,
    /// Message text
    pub content: String,
    /// Title used if the conversation has to be created
    pub title: Option<String>,
    /// Free-form context forwarded with the submission
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AskRequest {
    /// Question without title or metadata
    #[must_use]
    pub fn new(conversation: impl Into<ConversationRef>, content: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            content: content.into(),
            title: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn to_submission(&self, conversation_id: ConversationId) -> SubmitRequest {
        SubmitRequest {
            content: self.content.clone(),
            conversation_id,
            metadata: self.metadata.clone(),
        }
    }
}

/// How an answer is being delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AskOutcome {
    /// A session is streaming; callbacks will report progress
    Streaming {
        /// Session key, usable with [`StreamClient::cancel`]
        correlation_id: CorrelationId,
        /// Server conversation id
        conversation_id: ConversationId,
        /// Persisted user message
        user_message_id: UserMessageId,
    },
    /// Synchronous fallback; callbacks were not used
    Completed(FallbackAnswer),
}

// ============================================================================
// Router
// ============================================================================

/// Splits inbound frames between rooms and sessions
pub struct ClientRouter {
    rooms: Arc<RoomCorrelator>,
    dispatcher: DispatcherHandle,
}

impl ClientRouter {
    /// Route `joined` to `rooms` and stream events to `dispatcher`
    #[must_use]
    pub fn new(rooms: Arc<RoomCorrelator>, dispatcher: DispatcherHandle) -> Self {
        Self { rooms, dispatcher }
    }
}

#[async_trait]
impl InboundRouter for ClientRouter {
    fn route(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Joined { conversation_id } => self.rooms.acknowledge(&conversation_id),
            InboundFrame::Welcome { tenant_id } => {
                tracing::debug!(tenant = %tenant_id, "ignoring repeated welcome");
            }
            event => {
                if let Some(event) = event.into_push_event() {
                    self.dispatcher.route(event);
                }
            }
        }
    }

    async fn connection_lost(&self, reason: &str) {
        self.dispatcher.fail_all_and_wait(reason).await;
        self.rooms.clear();
    }
}

// ============================================================================
// Client
// ============================================================================

struct Inner {
    connection: ConnectionManager,
    rooms: Arc<RoomCorrelator>,
    dispatcher: DispatcherHandle,
    api: Arc<dyn SubmissionApi>,
    room_config: RoomConfig,
}

/// Streaming assistant client; cheap to clone
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("connection", &self.inner.connection)
            .field("rooms", &self.inner.rooms.len())
            .finish()
    }
}

impl StreamClient {
    /// Wire up a client; must be called inside a tokio runtime
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        api: Arc<dyn SubmissionApi>,
        options: ClientOptions,
    ) -> Self {
        let outbox = Outbox::new();
        let dispatcher = Dispatcher::spawn(options.streams, outbox.clone());
        let rooms = Arc::new(RoomCorrelator::new(outbox.clone()));
        let router = Arc::new(ClientRouter::new(rooms.clone(), dispatcher.clone()));
        let connection = ConnectionManager::new(connector, router, outbox, options.connection);

        Self {
            inner: Arc::new(Inner {
                connection,
                rooms,
                dispatcher,
                api,
                room_config: options.rooms,
            }),
        }
    }

    /// Open the push channel for `tenant`
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self, tenant: impl Into<TenantId>) -> Result<(), RelayError> {
        self.inner.connection.connect(tenant.into()).await
    }

    /// Close the push channel; active sessions error with "connection closed"
    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
    }

    /// Whether answers will stream
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Observe connectivity changes
    pub fn on_connectivity_change(&self, observer: impl Fn(bool) + Send + Sync + 'static) {
        self.inner.connection.on_connectivity_change(observer);
    }

    /// The underlying connection
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// The room correlator
    #[must_use]
    pub fn rooms(&self) -> &RoomCorrelator {
        &self.inner.rooms
    }

    /// Ask a question
    ///
    /// Streams when the push channel is live: the room is joined before the
    /// submission and the session is registered as soon as the submission
    /// returns. Otherwise the synchronous fallback answers in one round trip
    /// and `callbacks` is dropped unused.
    ///
    /// # Errors
    ///
    /// Submission failures, `DuplicateSession`, or `Shutdown`. Join
    /// acknowledgement timeouts are absorbed.
    pub async fn ask(
        &self,
        request: AskRequest,
        callbacks: CallbackSet,
    ) -> Result<AskOutcome, RelayError> {
        let connection = &self.inner.connection;
        let tenant = connection.tenant();

        let streaming = connection.is_connected() && connection.has_connected_once();
        let Some(tenant) = tenant.filter(|_| streaming) else {
            return self.fallback(&request).await;
        };

        let conversation_id = self.resolve_conversation(Some(&tenant), &request).await?;

        match self
            .inner
            .rooms
            .join(&conversation_id, self.inner.room_config.ack_timeout)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_soft() => {
                // Best effort: give the server a moment to register the room
                tokio::time::sleep(self.inner.room_config.settle_delay).await;
            }
            Err(RelayError::NotConnected) => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    "channel dropped while joining, answering synchronously"
                );
                return self.fallback(&request).await;
            }
            Err(e) => return Err(e),
        }

        let receipt = self
            .inner
            .api
            .submit(Some(&tenant), &request.to_submission(conversation_id))
            .await?;

        self.inner
            .dispatcher
            .begin(
                receipt.request_correlation_id.clone(),
                receipt.conversation_id.clone(),
                callbacks,
            )
            .await?;

        tracing::info!(
            correlation_id = %receipt.request_correlation_id,
            conversation_id = %receipt.conversation_id,
            "streaming answer"
        );

        Ok(AskOutcome::Streaming {
            correlation_id: receipt.request_correlation_id,
            conversation_id: receipt.conversation_id,
            user_message_id: receipt.user_message_id,
        })
    }

    async fn fallback(&self, request: &AskRequest) -> Result<AskOutcome, RelayError> {
        let tenant = self.inner.connection.tenant();
        tracing::info!(
            tenant = ?tenant.as_ref().map(TenantId::as_str),
            "push channel unavailable, using synchronous answer"
        );

        let conversation_id = self.resolve_conversation(tenant.as_ref(), request).await?;
        let answer = self
            .inner
            .api
            .complete(tenant.as_ref(), &request.to_submission(conversation_id))
            .await?;
        Ok(AskOutcome::Completed(answer))
    }

    async fn resolve_conversation(
        &self,
        tenant: Option<&TenantId>,
        request: &AskRequest,
    ) -> Result<ConversationId, RelayError> {
        let placeholder = match &request.conversation {
            ConversationRef::Server(id) => return Ok(id.clone()),
            ConversationRef::Placeholder(placeholder) => placeholder,
        };
        if let Some(id) = self.inner.rooms.resolve(&request.conversation) {
            return Ok(id);
        }

        let id = self
            .inner
            .api
            .create_conversation(tenant, request.title.as_deref())
            .await?;
        self.inner.rooms.promote(placeholder, id.clone());
        Ok(id)
    }

    /// Cancel a streaming answer; no-op if it already finished
    pub fn cancel(&self, correlation_id: CorrelationId, reason: impl Into<String>) {
        self.inner.dispatcher.cancel(correlation_id, reason);
    }

    /// Number of answers currently streaming
    pub async fn active_sessions(&self) -> usize {
        self.inner.dispatcher.active_sessions().await
    }

    /// Current state of a streaming answer
    pub async fn snapshot(&self, correlation_id: CorrelationId) -> Option<SessionSnapshot> {
        self.inner.dispatcher.snapshot(correlation_id).await
    }

    /// Lifetime session counters
    pub async fn stats(&self) -> RegistryStats {
        self.inner.dispatcher.stats().await
    }
}
