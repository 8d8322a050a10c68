//! Chunk Dispatcher
//!
//! One task owns the [`SessionRegistry`] and processes commands strictly
//! in arrival order. Inbound push events, session registration,
//! cancellation, and connection loss all travel through the same queue,
//! so whichever of two racing commands arrives first wins and the other
//! finds no session.
//!
//! ```text
//!   reader task ──route()──┐
//!   client ─────begin()────┼──► [ command queue ] ──► Dispatcher ──► callbacks
//!   client ─────cancel()───┤                             │
//!   connection ─fail_all()─┘                             └──► Outbox (cancel notice)
//!
//!   liveness: the loop also sleeps until the earliest session deadline
//! ```

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::connection::Outbox;
use crate::error::RelayError;
use crate::ids::{ConversationId, CorrelationId};
use crate::protocol::{OutboundFrame, PushEvent};

use super::callbacks::CallbackSet;
use super::registry::{RegistryStats, SessionRegistry, StreamConfig};
use super::session::SessionSnapshot;

enum Command {
    Push(PushEvent),
    Begin {
        correlation_id: CorrelationId,
        conversation_id: ConversationId,
        callbacks: CallbackSet,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    Cancel {
        correlation_id: CorrelationId,
        reason: String,
    },
    FailAll {
        reason: String,
        reply: Option<oneshot::Sender<usize>>,
    },
    Snapshot {
        correlation_id: CorrelationId,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Count(oneshot::Sender<usize>),
    Stats(oneshot::Sender<RegistryStats>),
}

/// Owner of all stream sessions
pub struct Dispatcher {
    registry: SessionRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
    outbox: Outbox,
}

impl Dispatcher {
    /// Start the dispatch loop on the current runtime
    ///
    /// The loop ends when every handle has been dropped; sessions still
    /// active at that point are errored.
    #[must_use]
    pub fn spawn(config: StreamConfig, outbox: Outbox) -> DispatcherHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            registry: SessionRegistry::new(config),
            commands: rx,
            outbox,
        };
        tokio::spawn(dispatcher.run());
        DispatcherHandle { commands: tx }
    }

    async fn run(mut self) {
        tracing::debug!(
            liveness_window_ms = self.registry.config().liveness_window.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            let deadline = self.registry.next_deadline();
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },

                () = wait_until(deadline) => {
                    self.registry.expire(Instant::now());
                }
            }
        }

        let orphaned = self.registry.fail_all("client shut down");
        tracing::debug!(orphaned, "dispatcher stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Push(event) => {
                self.registry.dispatch(event, Instant::now());
            }

            Command::Begin {
                correlation_id,
                conversation_id,
                callbacks,
                reply,
            } => {
                let result =
                    self.registry
                        .begin(correlation_id, conversation_id, callbacks, Instant::now());
                let _ = reply.send(result);
            }

            Command::Cancel {
                correlation_id,
                reason,
            } => {
                let Some(conversation_id) = self.registry.cancel(&correlation_id, &reason) else {
                    return;
                };
                let notice = OutboundFrame::Cancel {
                    conversation_id,
                    request_correlation_id: Some(correlation_id.clone()),
                    reason,
                };
                if let Err(e) = self.outbox.try_send(notice) {
                    tracing::debug!(
                        correlation_id = %correlation_id,
                        error = %e,
                        "cancel notice not delivered"
                    );
                }
            }

            Command::FailAll { reason, reply } => {
                let failed = self.registry.fail_all(&reason);
                if failed > 0 {
                    tracing::info!(failed, reason = %reason, "errored active sessions");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(failed);
                }
            }

            Command::Snapshot {
                correlation_id,
                reply,
            } => {
                let _ = reply.send(self.registry.snapshot(&correlation_id));
            }

            Command::Count(reply) => {
                let _ = reply.send(self.registry.len());
            }

            Command::Stats(reply) => {
                let _ = reply.send(self.registry.stats().clone());
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to the dispatch loop
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Push(_) => "Push",
            Self::Begin { .. } => "Begin",
            Self::Cancel { .. } => "Cancel",
            Self::FailAll { .. } => "FailAll",
            Self::Snapshot { .. } => "Snapshot",
            Self::Count(_) => "Count",
            Self::Stats(_) => "Stats",
        };
        f.write_str(name)
    }
}

impl DispatcherHandle {
    fn send(&self, command: Command) -> Result<(), RelayError> {
        self.commands.send(command).map_err(|_| RelayError::Shutdown)
    }

    /// Register a session
    ///
    /// Call as soon as the submission returns its correlation id; push
    /// events processed before this are dropped as unknown.
    ///
    /// # Errors
    ///
    /// `DuplicateSession` if the id is active, `Shutdown` if the loop is gone.
    pub async fn begin(
        &self,
        correlation_id: CorrelationId,
        conversation_id: ConversationId,
        callbacks: CallbackSet,
    ) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Begin {
            correlation_id,
            conversation_id,
            callbacks,
            reply,
        })?;
        rx.await.map_err(|_| RelayError::Shutdown)?
    }

    /// Cancel a session; no-op for unknown or finished ids
    pub fn cancel(&self, correlation_id: CorrelationId, reason: impl Into<String>) {
        let _ = self.send(Command::Cancel {
            correlation_id,
            reason: reason.into(),
        });
    }

    /// Hand an inbound push event to the loop
    pub fn route(&self, event: PushEvent) {
        let _ = self.send(Command::Push(event));
    }

    /// Error every active session without waiting
    pub fn fail_all(&self, reason: impl Into<String>) {
        let _ = self.send(Command::FailAll {
            reason: reason.into(),
            reply: None,
        });
    }

    /// Error every active session and wait until their callbacks have run
    ///
    /// Returns how many sessions were errored; zero if the loop is gone.
    pub async fn fail_all_and_wait(&self, reason: impl Into<String>) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .send(Command::FailAll {
                reason: reason.into(),
                reply: Some(reply),
            })
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Copy of a session's current state
    pub async fn snapshot(&self, correlation_id: CorrelationId) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot {
            correlation_id,
            reply,
        })
        .ok()?;
        rx.await.ok().flatten()
    }

    /// Number of active sessions
    pub async fn active_sessions(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Count(reply)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Lifetime counters
    pub async fn stats(&self) -> RegistryStats {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Stats(reply)).is_err() {
            return RegistryStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Whether the loop has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
