//! Room Subscription Correlator
//!
//! A room is the server-side registration that routes push events for one
//! conversation to this connection. Rooms must be joined before the
//! submission call so no push event arrives for a conversation nobody is
//! listening to.
//!
//! ```text
//!   join(c-1) ──► {action: join, conversationId: c-1} ──► server
//!        │                                                  │
//!        │  waits (shared by concurrent joiners)            │
//!        ▼                                                  ▼
//!   Pending ◄──────────── acknowledge(c-1) ◄──── {type: joined, conversationId: c-1}
//!        │
//!        ├── ack ─────► Acked
//!        └── timeout ─► TimedOut  (soft error; request already sent)
//! ```
//!
//! Subscriptions are forgotten whenever the connection goes away; the
//! server drops them too.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::connection::Outbox;
use crate::error::RelayError;
use crate::ids::{ConversationId, ConversationRef, PlaceholderId};
use crate::protocol::OutboundFrame;

/// Room join timing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomConfig {
    /// How long to wait for `joined` before carrying on optimistically
    pub ack_timeout: Duration,

    /// Pause before submitting when the acknowledgement timed out
    pub settle_delay: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(200),
        }
    }
}

/// Acknowledgement state of a join request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckState {
    /// Join sent, no acknowledgement yet
    Pending,
    /// Server confirmed the room
    Acked,
    /// Gave up waiting; the server usually processed the join anyway
    TimedOut,
}

/// Record of one joined room
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomSubscription {
    /// Room key
    pub conversation_id: ConversationId,
    /// Placeholder this room was promoted from, if any
    pub promoted_from: Option<PlaceholderId>,
    /// Acknowledgement state
    pub state: AckState,
    /// When the most recent join was sent
    pub requested_at: Instant,
}

struct Room {
    subscription: RoomSubscription,
    acked: watch::Sender<bool>,
}

/// Tracks joined rooms and their acknowledgements
#[derive(Debug)]
pub struct RoomCorrelator {
    rooms: DashMap<ConversationId, Room>,
    promotions: DashMap<PlaceholderId, ConversationId>,
    outbox: Outbox,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.subscription.fmt(f)
    }
}

impl RoomCorrelator {
    /// Create a correlator sending join requests through `outbox`
    #[must_use]
    pub fn new(outbox: Outbox) -> Self {
        Self {
            rooms: DashMap::new(),
            promotions: DashMap::new(),
            outbox,
        }
    }

    /// Join a room and wait for its acknowledgement
    ///
    /// Returns immediately for a room already acknowledged. Concurrent joins
    /// of the same room send one request and share the acknowledgement.
    ///
    /// # Errors
    ///
    /// - `JoinAckTimeout` (soft) if no acknowledgement arrived in time
    /// - `NotConnected` if the channel is down or closed while waiting
    pub async fn join(
        &self,
        conversation_id: &ConversationId,
        ack_timeout: Duration,
    ) -> Result<(), RelayError> {
        let (mut acked, send_request) = {
            let mut room = self
                .rooms
                .entry(conversation_id.clone())
                .or_insert_with(|| Room {
                    subscription: RoomSubscription {
                        conversation_id: conversation_id.clone(),
                        promoted_from: None,
                        state: AckState::TimedOut,
                        requested_at: Instant::now(),
                    },
                    acked: watch::channel(false).0,
                });

            match room.subscription.state {
                AckState::Acked => return Ok(()),
                AckState::Pending => (room.acked.subscribe(), false),
                AckState::TimedOut => {
                    room.subscription.state = AckState::Pending;
                    room.subscription.requested_at = Instant::now();
                    (room.acked.subscribe(), true)
                }
            }
        };

        if send_request {
            tracing::debug!(conversation_id = %conversation_id, "joining room");
            let request = OutboundFrame::Join {
                conversation_id: conversation_id.clone(),
            };
            if let Err(e) = self.outbox.send(request).await {
                self.rooms.remove(conversation_id);
                return Err(e);
            }
        }

        let waited = tokio::time::timeout(ack_timeout, acked.wait_for(|acked| *acked))
            .await
            .map(|ack| ack.map(|_| ()));

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RelayError::NotConnected),
            Err(_) => {
                if let Some(mut room) = self.rooms.get_mut(conversation_id) {
                    if room.subscription.state == AckState::Pending {
                        room.subscription.state = AckState::TimedOut;
                    }
                }
                tracing::warn!(
                    conversation_id = %conversation_id,
                    timeout_ms = ack_timeout.as_millis() as u64,
                    "room join not acknowledged"
                );
                Err(RelayError::JoinAckTimeout {
                    conversation_id: conversation_id.clone(),
                    timeout: ack_timeout,
                })
            }
        }
    }

    /// Record the server's `joined` acknowledgement
    pub fn acknowledge(&self, conversation_id: &ConversationId) {
        let Some(mut room) = self.rooms.get_mut(conversation_id) else {
            tracing::debug!(conversation_id = %conversation_id, "acknowledgement for unknown room");
            return;
        };
        room.subscription.state = AckState::Acked;
        room.acked.send_replace(true);
        tracing::debug!(conversation_id = %conversation_id, "room joined");
    }

    /// Record that `placeholder` is now known to the server as `server_id`
    pub fn promote(&self, placeholder: &PlaceholderId, server_id: ConversationId) {
        tracing::debug!(
            placeholder = %placeholder,
            conversation_id = %server_id,
            "promoted placeholder conversation"
        );
        if let Some(mut room) = self.rooms.get_mut(&server_id) {
            room.subscription.promoted_from = Some(placeholder.clone());
        }
        self.promotions.insert(placeholder.clone(), server_id);
    }

    /// Server id for a conversation reference, if known
    #[must_use]
    pub fn resolve(&self, conversation: &ConversationRef) -> Option<ConversationId> {
        match conversation {
            ConversationRef::Server(id) => Some(id.clone()),
            ConversationRef::Placeholder(placeholder) => self
                .promotions
                .get(placeholder)
                .map(|id| id.value().clone()),
        }
    }

    /// Current record for a room
    #[must_use]
    pub fn subscription(&self, conversation_id: &ConversationId) -> Option<RoomSubscription> {
        self.rooms.get(conversation_id).map(|room| {
            let mut subscription = room.subscription.clone();
            if subscription.promoted_from.is_none() {
                subscription.promoted_from = self
                    .promotions
                    .iter()
                    .find(|entry| entry.value() == conversation_id)
                    .map(|entry| entry.key().clone());
            }
            subscription
        })
    }

    /// Forget every room; pending joiners see `NotConnected`
    pub fn clear(&self) {
        let dropped = self.rooms.len();
        self.rooms.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "cleared room subscriptions");
        }
    }

    /// Number of tracked rooms
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn correlator() -> (Arc<RoomCorrelator>, mpsc::Receiver<OutboundFrame>) {
        let outbox = Outbox::new();
        let (tx, rx) = mpsc::channel(16);
        outbox.install(tx);
        (Arc::new(RoomCorrelator::new(outbox)), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_waits_for_ack() {
        let (rooms, mut server) = correlator();
        let joiner = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.join(&"c-1".into(), Duration::from_secs(5)).await })
        };

        assert_eq!(
            server.recv().await,
            Some(OutboundFrame::Join {
                conversation_id: "c-1".into()
            })
        );
        assert_eq!(
            rooms.subscription(&"c-1".into()).map(|s| s.state),
            Some(AckState::Pending)
        );

        rooms.acknowledge(&"c-1".into());
        joiner.await.unwrap().unwrap();
        assert_eq!(
            rooms.subscription(&"c-1".into()).map(|s| s.state),
            Some(AckState::Acked)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_is_soft_and_request_was_sent() {
        let (rooms, mut server) = correlator();
        let result = rooms.join(&"c-1".into(), Duration::from_secs(2)).await;

        let err = result.unwrap_err();
        assert!(err.is_soft());
        assert!(matches!(server.try_recv(), Ok(OutboundFrame::Join { .. })));
        assert_eq!(
            rooms.subscription(&"c-1".into()).map(|s| s.state),
            Some(AckState::TimedOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_join_request_releases_concurrent_joiner() {
        let outbox = Outbox::new();
        let (tx, server) = mpsc::channel(1);
        outbox.install(tx);
        outbox
            .try_send(OutboundFrame::Join {
                conversation_id: "c-0".into(),
            })
            .unwrap();
        let rooms = Arc::new(RoomCorrelator::new(outbox));

        // First joiner blocks on the full buffer with the room pending
        let a = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.join(&"c-1".into(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            rooms.subscription(&"c-1".into()).map(|s| s.state),
            Some(AckState::Pending)
        );

        let b = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.join(&"c-1".into(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let started = Instant::now();
        drop(server);

        assert!(matches!(a.await.unwrap(), Err(RelayError::Transport(_))));
        assert!(matches!(b.await.unwrap(), Err(RelayError::NotConnected)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(rooms.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acked_room_returns_immediately() {
        let (rooms, mut server) = correlator();
        let joiner = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.join(&"c-1".into(), Duration::from_secs(5)).await })
        };
        server.recv().await.unwrap();
        rooms.acknowledge(&"c-1".into());
        joiner.await.unwrap().unwrap();

        rooms.join(&"c-1".into(), Duration::from_secs(5)).await.unwrap();
        assert!(server.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_joins_share_one_request() {
        let (rooms, mut server) = correlator();
        let a = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.join(&"c-1".into(), Duration::from_secs(5)).await })
        };
        let b = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.join(&"c-1".into(), Duration::from_secs(5)).await })
        };

        server.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        rooms.acknowledge(&"c-1".into());

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert!(server.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_without_connection() {
        let rooms = RoomCorrelator::new(Outbox::new());
        let result = rooms.join(&"c-1".into(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RelayError::NotConnected)));
        assert!(rooms.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_releases_pending_joiners() {
        let (rooms, mut server) = correlator();
        let joiner = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.join(&"c-1".into(), Duration::from_secs(5)).await })
        };
        server.recv().await.unwrap();
        rooms.clear();

        assert!(matches!(joiner.await.unwrap(), Err(RelayError::NotConnected)));
        assert!(rooms.is_empty());
    }

    #[test]
    fn test_promotion_resolves_placeholder() {
        let rooms = RoomCorrelator::new(Outbox::new());
        let placeholder = PlaceholderId::new();
        let reference = ConversationRef::Placeholder(placeholder.clone());
        assert_eq!(rooms.resolve(&reference), None);

        rooms.promote(&placeholder, "c-42".into());
        assert_eq!(rooms.resolve(&reference), Some("c-42".into()));
        assert_eq!(
            rooms.resolve(&ConversationRef::Server("c-7".into())),
            Some("c-7".into())
        );
    }
}
