//! Stream Session Registry
//!
//! Table of in-flight sessions keyed by correlation id. The registry is
//! plain synchronous state owned by the dispatch loop; every method runs
//! to completion before the next event is looked at, which is what makes
//! callback ordering and terminal exclusivity hold.
//!
//! Sessions leave the table on completion, error, timeout, or
//! cancellation, and their callbacks leave with them.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{RelayError, SessionError};
use crate::ids::{ConversationId, CorrelationId};
use crate::protocol::{PushEvent, PushKind};

use super::callbacks::{Activity, CallbackSet, Completion, SessionFailure, SessionUpdate};
use super::session::{Rejection, SessionSnapshot, StreamSession};

/// Configuration for stream sessions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Maximum gap between accepted events before a session times out
    pub liveness_window: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(45),
        }
    }
}

/// Result of feeding one push event to the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Chunk or tool event accepted
    Updated,
    /// Stream ended and the session was removed
    Completed,
    /// Server error applied and the session was removed
    Failed,
    /// Event ignored
    Dropped(DropReason),
}

/// Why an event was ignored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// No active session for the correlation id
    UnknownSession,
    /// Duplicate or out-of-order delivery
    StaleSequence {
        /// Highest sequence accepted so far
        last_accepted: i64,
        /// Sequence carried by the dropped event
        received: i64,
    },
}

/// Lifetime counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions begun
    pub sessions_started: u64,
    /// Sessions that reached `Completed`
    pub completed: u64,
    /// Sessions errored (server error, timeout, connection loss)
    pub errored: u64,
    /// Sessions cancelled by the caller
    pub cancelled: u64,
    /// Events dropped for any reason
    pub dropped_events: u64,
}

struct Entry {
    session: StreamSession,
    callbacks: CallbackSet,
}

/// In-flight sessions keyed by correlation id
pub struct SessionRegistry {
    entries: HashMap<CorrelationId, Entry>,
    config: StreamConfig,
    stats: RegistryStats,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            stats: RegistryStats::default(),
        }
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Number of active sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no session is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `correlation_id` has an active session
    #[must_use]
    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.entries.contains_key(correlation_id)
    }

    /// Copy of a session's current state
    #[must_use]
    pub fn snapshot(&self, correlation_id: &CorrelationId) -> Option<SessionSnapshot> {
        self.entries
            .get(correlation_id)
            .map(|entry| entry.session.snapshot())
    }

    /// Lifetime counters
    #[must_use]
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Register a session and its callbacks
    ///
    /// # Errors
    ///
    /// `DuplicateSession` if the correlation id is already registered. The
    /// existing session is left untouched.
    pub fn begin(
        &mut self,
        correlation_id: CorrelationId,
        conversation_id: ConversationId,
        callbacks: CallbackSet,
        now: Instant,
    ) -> Result<(), RelayError> {
        if self.entries.contains_key(&correlation_id) {
            tracing::error!(
                correlation_id = %correlation_id,
                "correlation id reused while its session is still active"
            );
            return Err(RelayError::DuplicateSession(correlation_id));
        }

        tracing::debug!(
            correlation_id = %correlation_id,
            conversation_id = %conversation_id,
            "session started"
        );
        let session = StreamSession::new(correlation_id.clone(), conversation_id, now);
        self.entries.insert(correlation_id, Entry { session, callbacks });
        self.stats.sessions_started += 1;
        Ok(())
    }

    /// Route one push event to its session
    pub fn dispatch(&mut self, event: PushEvent, now: Instant) -> DispatchOutcome {
        let PushEvent {
            correlation_id,
            conversation_id,
            kind,
        } = event;
        let kind_name = kind.name();

        let Some(entry) = self.entries.get_mut(&correlation_id) else {
            tracing::debug!(
                correlation_id = %correlation_id,
                conversation_id = %conversation_id,
                event = kind_name,
                "dropping event for unknown or finished session"
            );
            self.stats.dropped_events += 1;
            return DispatchOutcome::Dropped(DropReason::UnknownSession);
        };

        match kind {
            PushKind::Chunk {
                sequence,
                content,
                is_final,
            } => match entry.session.accept_chunk(sequence, content, now) {
                Ok(()) => {
                    entry.callbacks.update(SessionUpdate {
                        correlation_id,
                        content: entry.session.content().to_string(),
                        is_final,
                        activity: Activity::Content { sequence },
                    });
                    DispatchOutcome::Updated
                }
                Err(rejection) => self.drop_rejected(&correlation_id, kind_name, rejection),
            },

            PushKind::Tool {
                phase,
                sequence,
                tool_name,
                detail,
            } => match entry.session.accept_tool_event(sequence, now) {
                Ok(()) => {
                    entry.callbacks.update(SessionUpdate {
                        correlation_id,
                        content: entry.session.content().to_string(),
                        is_final: false,
                        activity: Activity::Tool {
                            phase,
                            tool_name,
                            detail,
                        },
                    });
                    DispatchOutcome::Updated
                }
                Err(rejection) => self.drop_rejected(&correlation_id, kind_name, rejection),
            },

            PushKind::End {
                content,
                suggested_actions,
            } => {
                let Some(Entry {
                    mut session,
                    callbacks,
                }) = self.entries.remove(&correlation_id)
                else {
                    return DispatchOutcome::Dropped(DropReason::UnknownSession);
                };
                if let Err(rejection) = session.begin_completion(content, suggested_actions) {
                    return self.drop_rejected(&correlation_id, kind_name, rejection);
                }

                tracing::debug!(
                    correlation_id = %correlation_id,
                    elapsed_ms = session.age(now).as_millis() as u64,
                    "session completed"
                );
                callbacks.complete(Completion {
                    correlation_id,
                    content: session.content().to_string(),
                    suggested_actions: session.suggested_actions().to_vec(),
                });
                session.finish_completion();
                self.stats.completed += 1;
                DispatchOutcome::Completed
            }

            PushKind::Error { message } => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %message,
                    "server reported stream failure"
                );
                self.terminate(&correlation_id, SessionError::StreamError(message));
                DispatchOutcome::Failed
            }
        }
    }

    fn drop_rejected(
        &mut self,
        correlation_id: &CorrelationId,
        event: &'static str,
        rejection: Rejection,
    ) -> DispatchOutcome {
        self.stats.dropped_events += 1;
        match rejection {
            Rejection::StaleSequence {
                last_accepted,
                received,
            } => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    event,
                    last_accepted,
                    received,
                    "dropping duplicate or out-of-order event"
                );
                DispatchOutcome::Dropped(DropReason::StaleSequence {
                    last_accepted,
                    received,
                })
            }
            Rejection::NotActive(status) => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    event,
                    ?status,
                    "dropping event for inactive session"
                );
                DispatchOutcome::Dropped(DropReason::UnknownSession)
            }
        }
    }

    /// Remove a session with a failure, firing `on_error` once
    ///
    /// Returns the conversation id if a session was active.
    fn terminate(
        &mut self,
        correlation_id: &CorrelationId,
        error: SessionError,
    ) -> Option<ConversationId> {
        let Entry {
            mut session,
            callbacks,
        } = self.entries.remove(correlation_id)?;

        let transition = if error.is_cancellation() {
            session.cancel()
        } else {
            session.fail()
        };
        if transition.is_err() {
            return None;
        }

        if error.is_cancellation() {
            self.stats.cancelled += 1;
        } else {
            self.stats.errored += 1;
        }

        let conversation_id = session.conversation_id().clone();
        callbacks.fail(SessionFailure {
            correlation_id: correlation_id.clone(),
            error,
            partial_content: session.content().to_string(),
        });
        Some(conversation_id)
    }

    /// Cancel an active session
    ///
    /// Returns the session's conversation id so the caller can notify the
    /// server, or `None` (no-op) when there was nothing to cancel.
    pub fn cancel(&mut self, correlation_id: &CorrelationId, reason: &str) -> Option<ConversationId> {
        let conversation_id =
            self.terminate(correlation_id, SessionError::Cancelled(reason.to_string()))?;
        tracing::info!(correlation_id = %correlation_id, reason, "session cancelled");
        Some(conversation_id)
    }

    /// Earliest liveness deadline among active sessions
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let window = self.config.liveness_window;
        self.entries
            .values()
            .map(|entry| entry.session.deadline(window))
            .min()
    }

    /// Error out every session whose liveness window has run out
    pub fn expire(&mut self, now: Instant) -> Vec<CorrelationId> {
        let window = self.config.liveness_window;
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.session.deadline(window) <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for correlation_id in &expired {
            tracing::warn!(
                correlation_id = %correlation_id,
                window_ms = window.as_millis() as u64,
                "stream timed out"
            );
            self.terminate(correlation_id, SessionError::StreamTimeout(window));
        }

        expired
    }

    /// Error out every active session, e.g. when the connection goes away
    ///
    /// Returns how many sessions were errored.
    pub fn fail_all(&mut self, reason: &str) -> usize {
        let ids: Vec<CorrelationId> = self.entries.keys().cloned().collect();
        ids.iter()
            .filter(|id| {
                self.terminate(id, SessionError::ConnectionClosed(reason.to_string()))
                    .is_some()
            })
            .count()
    }
}
