//! Stream Session State Machine
//!
//! ```text
//!            ┌──────────────► Completing ──► Completed
//!            │
//!   Active ──┼──────────────► Errored
//!            │
//!            └──────────────► Cancelled
//! ```
//!
//! Terminal states admit no transition. Content is always the latest
//! cumulative snapshot supplied by the server, never a client-side
//! concatenation.

use std::time::Duration;

use tokio::time::Instant;

use crate::ids::{ConversationId, CorrelationId};
use crate::protocol::SuggestedAction;

/// Lifecycle of a stream session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Receiving events
    Active,
    /// Final answer applied, completion callback in flight
    Completing,
    /// Finished successfully
    Completed,
    /// Failed (server error, timeout, connection loss)
    Errored,
    /// Cancelled by the caller
    Cancelled,
}

impl SessionStatus {
    /// Whether no further transition is allowed
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

/// Why an event was not applied to a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Sequence number not greater than the last accepted one
    StaleSequence {
        /// Highest sequence accepted so far
        last_accepted: i64,
        /// Sequence carried by the rejected event
        received: i64,
    },
    /// Session is no longer active
    NotActive(SessionStatus),
}

/// One in-flight streamed answer
#[derive(Clone, Debug)]
pub struct StreamSession {
    correlation_id: CorrelationId,
    conversation_id: ConversationId,
    content: String,
    last_sequence: i64,
    status: SessionStatus,
    suggested_actions: Vec<SuggestedAction>,
    started_at: Instant,
    last_activity: Instant,
    accepted_events: u32,
    rejected_events: u32,
}

impl StreamSession {
    /// Sequence value before any chunk has been accepted
    pub const INITIAL_SEQUENCE: i64 = -1;

    /// Create an active session with empty content
    #[must_use]
    pub fn new(correlation_id: CorrelationId, conversation_id: ConversationId, now: Instant) -> Self {
        Self {
            correlation_id,
            conversation_id,
            content: String::new(),
            last_sequence: Self::INITIAL_SEQUENCE,
            status: SessionStatus::Active,
            suggested_actions: Vec::new(),
            started_at: now,
            last_activity: now,
            accepted_events: 0,
            rejected_events: 0,
        }
    }

    /// Session key
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Conversation the answer belongs to
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Latest cumulative content
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Highest accepted sequence number (−1 before the first chunk)
    #[must_use]
    pub fn last_sequence(&self) -> i64 {
        self.last_sequence
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Follow-ups set at completion
    #[must_use]
    pub fn suggested_actions(&self) -> &[SuggestedAction] {
        &self.suggested_actions
    }

    /// When the liveness window for this session runs out
    #[must_use]
    pub fn deadline(&self, liveness_window: Duration) -> Instant {
        self.last_activity + liveness_window
    }

    /// Time since the session began
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    fn ensure_active(&self) -> Result<(), Rejection> {
        if self.status == SessionStatus::Active {
            Ok(())
        } else {
            Err(Rejection::NotActive(self.status))
        }
    }

    fn advance(&mut self, sequence: i64) -> Result<(), Rejection> {
        if sequence <= self.last_sequence {
            self.rejected_events += 1;
            return Err(Rejection::StaleSequence {
                last_accepted: self.last_sequence,
                received: sequence,
            });
        }
        self.last_sequence = sequence;
        Ok(())
    }

    /// Apply a cumulative content chunk
    ///
    /// Stale sequences leave content untouched.
    pub fn accept_chunk(
        &mut self,
        sequence: i64,
        content: String,
        now: Instant,
    ) -> Result<(), Rejection> {
        self.ensure_active()?;
        self.advance(sequence)?;
        self.content = content;
        self.last_activity = now;
        self.accepted_events += 1;
        Ok(())
    }

    /// Record tool activity
    ///
    /// Numbered tool events obey the same ordering rule as chunks; unnumbered
    /// ones only refresh liveness.
    pub fn accept_tool_event(&mut self, sequence: Option<i64>, now: Instant) -> Result<(), Rejection> {
        self.ensure_active()?;
        if let Some(sequence) = sequence {
            self.advance(sequence)?;
        }
        self.last_activity = now;
        self.accepted_events += 1;
        Ok(())
    }

    /// Apply the definitive answer: `Active → Completing`
    ///
    /// `content` replaces the buffer when present, since the final answer may
    /// differ from the last streamed snapshot.
    pub fn begin_completion(
        &mut self,
        content: Option<String>,
        suggested_actions: Vec<SuggestedAction>,
    ) -> Result<(), Rejection> {
        self.ensure_active()?;
        if let Some(content) = content {
            self.content = content;
        }
        self.suggested_actions = suggested_actions;
        self.status = SessionStatus::Completing;
        Ok(())
    }

    /// `Completing → Completed`
    pub fn finish_completion(&mut self) {
        if self.status == SessionStatus::Completing {
            self.status = SessionStatus::Completed;
        }
    }

    /// `Active → Errored`
    pub fn fail(&mut self) -> Result<(), Rejection> {
        self.ensure_active()?;
        self.status = SessionStatus::Errored;
        Ok(())
    }

    /// `Active → Cancelled`
    pub fn cancel(&mut self) -> Result<(), Rejection> {
        self.ensure_active()?;
        self.status = SessionStatus::Cancelled;
        Ok(())
    }

    /// Point-in-time copy for callers outside the dispatch loop
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            correlation_id: self.correlation_id.clone(),
            conversation_id: self.conversation_id.clone(),
            content: self.content.clone(),
            last_sequence: self.last_sequence,
            status: self.status,
            accepted_events: self.accepted_events,
            rejected_events: self.rejected_events,
        }
    }
}

/// Read-only view of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session key
    pub correlation_id: CorrelationId,
    /// Conversation the answer belongs to
    pub conversation_id: ConversationId,
    /// Latest cumulative content
    pub content: String,
    /// Highest accepted sequence number
    pub last_sequence: i64,
    /// Current status
    pub status: SessionStatus,
    /// Events applied
    pub accepted_events: u32,
    /// Events dropped as duplicate or out of order
    pub rejected_events: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> StreamSession {
        StreamSession::new("r-1".into(), "c-1".into(), Instant::now())
    }

    #[test]
    fn test_new_session_starts_empty() {
        let s = session();
        assert_eq!(s.status(), SessionStatus::Active);
        assert_eq!(s.last_sequence(), -1);
        assert!(s.content().is_empty());
    }

    #[test]
    fn test_chunk_replaces_content() {
        let mut s = session();
        let now = Instant::now();
        s.accept_chunk(0, "Hi".into(), now).unwrap();
        s.accept_chunk(1, "Hi there".into(), now).unwrap();

        assert_eq!(s.content(), "Hi there");
        assert_eq!(s.last_sequence(), 1);
    }

    #[test]
    fn test_duplicate_chunk_is_idempotent() {
        let mut s = session();
        let now = Instant::now();
        s.accept_chunk(0, "Hi".into(), now).unwrap();

        let rejected = s.accept_chunk(0, "garbage".into(), now);
        assert_eq!(
            rejected,
            Err(Rejection::StaleSequence {
                last_accepted: 0,
                received: 0
            })
        );
        assert_eq!(s.content(), "Hi");
        assert_eq!(s.snapshot().rejected_events, 1);
    }

    #[test]
    fn test_sequence_gaps_are_allowed() {
        let mut s = session();
        let now = Instant::now();
        s.accept_chunk(0, "a".into(), now).unwrap();
        s.accept_chunk(5, "abc".into(), now).unwrap();
        assert!(s.accept_chunk(3, "ab".into(), now).is_err());
        assert_eq!(s.content(), "abc");
    }

    #[test]
    fn test_unnumbered_tool_event_keeps_sequence() {
        let mut s = session();
        let now = Instant::now();
        s.accept_chunk(2, "x".into(), now).unwrap();
        s.accept_tool_event(None, now).unwrap();
        assert_eq!(s.last_sequence(), 2);

        assert!(s.accept_tool_event(Some(1), now).is_err());
        s.accept_tool_event(Some(3), now).unwrap();
        assert_eq!(s.last_sequence(), 3);
        assert_eq!(s.content(), "x");
    }

    #[test]
    fn test_completion_without_content_keeps_snapshot() {
        let mut s = session();
        s.accept_chunk(0, "partial".into(), Instant::now()).unwrap();
        s.begin_completion(None, Vec::new()).unwrap();
        assert_eq!(s.status(), SessionStatus::Completing);

        s.finish_completion();
        assert_eq!(s.status(), SessionStatus::Completed);
        assert_eq!(s.content(), "partial");
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let now = Instant::now();

        let mut cancelled = session();
        cancelled.cancel().unwrap();
        assert_eq!(
            cancelled.accept_chunk(0, "late".into(), now),
            Err(Rejection::NotActive(SessionStatus::Cancelled))
        );
        assert!(cancelled.fail().is_err());
        assert!(cancelled.begin_completion(None, Vec::new()).is_err());

        let mut errored = session();
        errored.fail().unwrap();
        assert!(errored.cancel().is_err());
        assert!(SessionStatus::Errored.is_terminal());
        assert!(!SessionStatus::Completing.is_terminal());
    }

    #[test]
    fn test_deadline_moves_with_activity() {
        let start = Instant::now();
        let mut s = StreamSession::new("r-1".into(), "c-1".into(), start);
        let window = Duration::from_secs(30);
        assert_eq!(s.deadline(window), start + window);

        let later = start + Duration::from_secs(10);
        s.accept_chunk(0, "a".into(), later).unwrap();
        assert_eq!(s.deadline(window), later + window);
    }
}
