//! Connection Lifecycle
//!
//! Owns the single tenant-scoped duplex channel to the push server.
//!
//! ```text
//!                 connect(tenant)
//!  Disconnected ─────────────────► Connecting ──welcome──► Connected
//!       ▲                              │                      │
//!       │          timeout / failure   │                      │ unexpected close
//!       ├──────────────────────────────┘                      ▼
//!       │                                              Reconnecting{n}
//!       │          attempts exhausted                         │
//!       └─────────────────────────────────────────────────────┘
//! ```
//!
//! A reader task forwards every inbound frame to an [`InboundRouter`].
//! Each successful handshake bumps a generation counter; reader tasks and
//! reconnect timers carry the generation they were started under and do
//! nothing once it has moved on. Connect, disconnect, and reconnect run
//! one at a time behind an async gate.

mod config;
mod outbox;

pub use config::{ConnectionConfig, ReconnectPolicy};
pub use outbox::Outbox;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::RelayError;
use crate::ids::TenantId;
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::transport::{Connector, TransportChannels, TransportError};

/// Reason given to sessions when the caller disconnects
pub const REASON_CLOSED: &str = "connection closed";

/// Reason given to sessions when the channel drops on its own
pub const REASON_LOST: &str = "connection lost";

// ============================================================================
// Public Types
// ============================================================================

/// Where the connection currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No channel and nothing scheduled
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake confirmed, channel live
    Connected,
    /// Waiting to retry after an unexpected closure
    Reconnecting {
        /// 1-based attempt about to be made
        attempt: u32,
    },
}

/// Receives everything the reader task pulls off the channel
#[async_trait]
pub trait InboundRouter: Send + Sync {
    /// Handle one inbound frame; must not block
    fn route(&self, frame: InboundFrame);

    /// The channel is gone; error sessions and forget rooms
    async fn connection_lost(&self, reason: &str);
}

type Observer = Arc<dyn Fn(bool) + Send + Sync>;

// ============================================================================
// Connection Manager
// ============================================================================

struct Shared {
    connector: Arc<dyn Connector>,
    router: Arc<dyn InboundRouter>,
    outbox: Outbox,
    config: ConnectionConfig,

    gate: AsyncMutex<()>,
    state: RwLock<ConnectivityState>,
    tenant: RwLock<Option<TenantId>>,
    generation: AtomicU64,
    reconnect_attempts: AtomicU32,
    connected_once: AtomicBool,

    reader: Mutex<Option<JoinHandle<()>>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    observers: RwLock<Vec<Observer>>,
}

/// Handle to the push channel; cheap to clone
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.connector.endpoint())
            .field("state", &self.state())
            .field("tenant", &self.tenant())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager; nothing is opened until [`connect`](Self::connect)
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        router: Arc<dyn InboundRouter>,
        outbox: Outbox,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                router,
                outbox,
                config,
                gate: AsyncMutex::new(()),
                state: RwLock::new(ConnectivityState::Disconnected),
                tenant: RwLock::new(None),
                generation: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                connected_once: AtomicBool::new(false),
                reader: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Open the channel for `tenant`
    ///
    /// Idempotent while connected to the same tenant. Switching tenants
    /// closes the current channel first, erroring its sessions.
    ///
    /// # Errors
    ///
    /// - `UnknownTenant` for an empty tenant id
    /// - `ConnectFailed` if the transport cannot be opened
    /// - `ConnectTimeout` if `welcome` does not arrive within `connect_timeout`
    pub async fn connect(&self, tenant: TenantId) -> Result<(), RelayError> {
        if tenant.as_str().trim().is_empty() {
            return Err(RelayError::UnknownTenant);
        }

        let _gate = self.shared.gate.lock().await;

        if self.is_connected() && self.tenant().as_ref() == Some(&tenant) {
            tracing::debug!(tenant = %tenant, "already connected");
            return Ok(());
        }

        self.shared.teardown(REASON_CLOSED).await;
        self.shared.establish(&tenant).await
    }

    /// Close the channel deterministically
    ///
    /// Cancels any pending reconnect, errors every active session with
    /// "connection closed", and forgets all room subscriptions.
    pub async fn disconnect(&self) {
        let _gate = self.shared.gate.lock().await;
        self.shared.teardown(REASON_CLOSED).await;
        self.shared.tenant.write().take();
        tracing::info!("disconnected");
    }

    /// Whether the channel is live
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectivityState::Connected && self.shared.outbox.is_open()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.shared.state.read()
    }

    /// Tenant of the current or last attempted connection
    #[must_use]
    pub fn tenant(&self) -> Option<TenantId> {
        self.shared.tenant.read().clone()
    }

    /// Reconnect attempts made since the last successful handshake
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Whether any handshake has ever succeeded
    #[must_use]
    pub fn has_connected_once(&self) -> bool {
        self.shared.connected_once.load(Ordering::SeqCst)
    }

    /// Where the connector points
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.shared.connector.endpoint()
    }

    /// Handle for sending frames over the current channel
    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.shared.outbox
    }

    /// Register an observer called with `true`/`false` on every change
    /// of [`is_connected`](Self::is_connected)
    pub fn on_connectivity_change(&self, observer: impl Fn(bool) + Send + Sync + 'static) {
        self.shared.observers.write().push(Arc::new(observer));
    }
}

// ============================================================================
// Lifecycle internals
// ============================================================================

impl Shared {
    fn set_state(&self, next: ConnectivityState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        let was = previous == ConnectivityState::Connected;
        let now = next == ConnectivityState::Connected;
        if was == now {
            return;
        }

        let observers = self.observers.read().clone();
        for observer in observers {
            observer(now);
        }
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Handshake under the gate; installs the outbox and starts the reader
    async fn establish(self: &Arc<Self>, tenant: &TenantId) -> Result<(), RelayError> {
        *self.tenant.write() = Some(tenant.clone());
        self.set_state(ConnectivityState::Connecting);

        let timeout = self.config.connect_timeout;
        let channels =
            match tokio::time::timeout(timeout, handshake(self.connector.as_ref(), tenant)).await {
                Ok(Ok(channels)) => channels,
                Ok(Err(e)) => {
                    tracing::warn!(tenant = %tenant, error = %e, "connect failed");
                    self.set_state(ConnectivityState::Disconnected);
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(
                        tenant = %tenant,
                        timeout_ms = timeout.as_millis() as u64,
                        "handshake not confirmed in time"
                    );
                    self.set_state(ConnectivityState::Disconnected);
                    return Err(RelayError::ConnectTimeout(timeout));
                }
            };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let TransportChannels { outbound, inbound } = channels;
        self.outbox.install(outbound);

        let reader = tokio::spawn(read_loop(Arc::downgrade(self), inbound, generation));
        if let Some(stale) = self.reader.lock().replace(reader) {
            stale.abort();
        }

        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.connected_once.store(true, Ordering::SeqCst);
        self.set_state(ConnectivityState::Connected);

        tracing::info!(
            tenant = %tenant,
            endpoint = %self.connector.endpoint(),
            generation,
            "connected"
        );
        Ok(())
    }

    /// Close whatever is open under the gate and error its sessions
    async fn teardown(&self, reason: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.outbox.close();
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        self.router.connection_lost(reason).await;
        self.set_state(ConnectivityState::Disconnected);
    }

    /// Reader task saw the channel close on its own
    async fn on_unexpected_close(self: &Arc<Self>, generation: u64) {
        let _gate = self.gate.lock().await;
        if self.current_generation() != generation {
            return;
        }

        tracing::warn!(generation, "push channel closed unexpectedly");
        self.reader.lock().take();
        self.outbox.close();
        self.router.connection_lost(REASON_LOST).await;
        self.set_state(ConnectivityState::Disconnected);
        self.schedule_reconnect(generation);
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let policy = &self.config.reconnect;
        let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
        if !policy.allows(attempts) {
            if policy.enabled {
                tracing::warn!(attempts, "giving up on reconnection");
            }
            return;
        }

        let delay = policy.backoff_for_attempt(attempts);
        self.reconnect_attempts.store(attempts + 1, Ordering::SeqCst);
        self.set_state(ConnectivityState::Reconnecting {
            attempt: attempts + 1,
        });
        tracing::info!(
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.reconnect(generation).await;
            }
        });
        if let Some(stale) = self.reconnect_timer.lock().replace(timer) {
            stale.abort();
        }
    }

    async fn reconnect(self: &Arc<Self>, generation: u64) {
        let _gate = self.gate.lock().await;
        if self.current_generation() != generation {
            return;
        }
        self.reconnect_timer.lock().take();

        let Some(tenant) = self.tenant.read().clone() else {
            return;
        };

        match self.establish(&tenant).await {
            Ok(()) => tracing::info!(tenant = %tenant, "reconnected"),
            Err(e) => {
                tracing::warn!(
                    tenant = %tenant,
                    attempt = self.reconnect_attempts.load(Ordering::SeqCst),
                    error = %e,
                    "reconnect attempt failed"
                );
                self.schedule_reconnect(self.current_generation());
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
        if let Some(timer) = self.reconnect_timer.get_mut().take() {
            timer.abort();
        }
    }
}

async fn handshake(
    connector: &dyn Connector,
    tenant: &TenantId,
) -> Result<TransportChannels, RelayError> {
    let mut channels = connector.open(tenant).await.map_err(RelayError::ConnectFailed)?;

    channels
        .outbound
        .send(OutboundFrame::Hello {
            tenant_id: tenant.clone(),
        })
        .await
        .map_err(|_| RelayError::ConnectFailed(TransportError::ConnectionClosed))?;

    loop {
        match channels.inbound.recv().await {
            Some(InboundFrame::Welcome { tenant_id }) => {
                if &tenant_id != tenant {
                    tracing::warn!(
                        requested = %tenant,
                        confirmed = %tenant_id,
                        "server confirmed a different tenant"
                    );
                }
                return Ok(channels);
            }
            Some(frame) => {
                tracing::debug!(?frame, "ignoring frame before welcome");
            }
            None => return Err(RelayError::ConnectFailed(TransportError::ConnectionClosed)),
        }
    }
}

async fn read_loop(
    shared: Weak<Shared>,
    mut inbound: mpsc::Receiver<InboundFrame>,
    generation: u64,
) {
    while let Some(frame) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.current_generation() != generation {
            return;
        }
        shared.router.route(frame);
    }

    if let Some(shared) = shared.upgrade() {
        shared.on_unexpected_close(generation).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InProcessConnector, PeerEnd};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingRouter {
        frames: Mutex<Vec<InboundFrame>>,
        losses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InboundRouter for RecordingRouter {
        fn route(&self, frame: InboundFrame) {
            self.frames.lock().push(frame);
        }

        async fn connection_lost(&self, reason: &str) {
            self.losses.lock().push(reason.to_string());
        }
    }

    fn manager(
        config: ConnectionConfig,
    ) -> (
        ConnectionManager,
        Arc<RecordingRouter>,
        mpsc::UnboundedReceiver<PeerEnd>,
    ) {
        let (connector, peers) = InProcessConnector::new();
        let router = Arc::new(RecordingRouter::default());
        let manager = ConnectionManager::new(
            Arc::new(connector),
            router.clone(),
            Outbox::new(),
            config,
        );
        (manager, router, peers)
    }

    /// Accept one channel, answer the handshake, and hand the peer back
    async fn accept(peers: &mut mpsc::UnboundedReceiver<PeerEnd>) -> PeerEnd {
        let mut peer = peers.recv().await.unwrap();
        assert!(matches!(
            peer.next_request().await,
            Some(OutboundFrame::Hello { .. })
        ));
        peer.welcome().await.unwrap();
        peer
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_completes_handshake() {
        let (manager, _router, mut peers) = manager(ConnectionConfig::default());
        let server = tokio::spawn(async move { accept(&mut peers).await });

        manager.connect("acme".into()).await.unwrap();
        let _peer = server.await.unwrap();

        assert!(manager.is_connected());
        assert!(manager.has_connected_once());
        assert_eq!(manager.tenant(), Some("acme".into()));
        assert_eq!(manager.state(), ConnectivityState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_welcome() {
        let (manager, _router, mut peers) = manager(ConnectionConfig::default());
        let server = tokio::spawn(async move {
            let peer = peers.recv().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(peer);
        });

        let result = manager.connect("acme".into()).await;
        assert!(matches!(result, Err(RelayError::ConnectTimeout(t)) if t == Duration::from_secs(10)));
        assert!(!manager.is_connected());
        assert!(!manager.has_connected_once());
        server.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_tenant_rejected() {
        let (manager, _router, _peers) = manager(ConnectionConfig::default());
        assert!(matches!(
            manager.connect("  ".into()).await,
            Err(RelayError::UnknownTenant)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_for_same_tenant() {
        let (manager, router, mut peers) = manager(ConnectionConfig::default());
        let server = tokio::spawn(async move { accept(&mut peers).await });
        manager.connect("acme".into()).await.unwrap();
        let _peer = server.await.unwrap();

        let losses_before = router.losses.lock().len();
        manager.connect("acme".into()).await.unwrap();
        assert_eq!(router.losses.lock().len(), losses_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_reach_router() {
        let (manager, router, mut peers) = manager(ConnectionConfig::default());
        let server = tokio::spawn(async move { accept(&mut peers).await });
        manager.connect("acme".into()).await.unwrap();
        let peer = server.await.unwrap();

        peer.ack_join("c-1".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            router.frames.lock().as_slice(),
            &[InboundFrame::Joined {
                conversation_id: "c-1".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_notifies_observers_and_router() {
        let (manager, router, mut peers) = manager(ConnectionConfig::default());
        let changes = Arc::new(Mutex::new(Vec::new()));
        let seen = changes.clone();
        manager.on_connectivity_change(move |up| seen.lock().push(up));

        let server = tokio::spawn(async move { accept(&mut peers).await });
        manager.connect("acme".into()).await.unwrap();
        let _peer = server.await.unwrap();
        manager.disconnect().await;

        assert!(!manager.is_connected());
        assert_eq!(manager.tenant(), None);
        assert_eq!(changes.lock().as_slice(), &[true, false]);
        assert_eq!(router.losses.lock().last().map(String::as_str), Some(REASON_CLOSED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_reconnects_with_same_tenant() {
        let (manager, router, mut peers) = manager(ConnectionConfig::default());
        let (connected, first) = tokio::join!(manager.connect("acme".into()), accept(&mut peers));
        connected.unwrap();

        // Server drops the channel
        drop(first);

        // Backoff for the first attempt is one second
        let second = accept(&mut peers).await;
        assert_eq!(second.tenant_id.as_str(), "acme");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(manager.is_connected());
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(router.losses.lock().iter().any(|r| r == REASON_LOST));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (manager, _router, mut peers) = manager(ConnectionConfig::default());
        let (connected, first) = tokio::join!(manager.connect("acme".into()), accept(&mut peers));
        connected.unwrap();
        drop(first);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            manager.state(),
            ConnectivityState::Reconnecting { attempt: 1 }
        ));

        manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state(), ConnectivityState::Disconnected);
        assert!(peers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_disabled_stays_down() {
        let config = ConnectionConfig {
            reconnect: ReconnectPolicy::disabled(),
            ..Default::default()
        };
        let (manager, _router, mut peers) = manager(config);
        let (connected, first) = tokio::join!(manager.connect("acme".into()), accept(&mut peers));
        connected.unwrap();
        drop(first);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.state(), ConnectivityState::Disconnected);
        assert!(manager.has_connected_once());
    }
}
