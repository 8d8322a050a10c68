//! Per-Session Callbacks
//!
//! A [`CallbackSet`] is moved into the registry together with its session
//! and dropped in the same operation that removes the session, so a late
//! event can never reach a stale closure.
//!
//! Callbacks run on the dispatch loop. They must not block; handing work
//! to a channel or spawning is fine, and so is calling back into the
//! client (e.g. cancelling), since that only enqueues a command.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::ids::CorrelationId;
use crate::protocol::{SuggestedAction, ToolPhase};

/// What produced an update
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Activity {
    /// New content snapshot
    Content {
        /// Sequence number of the accepted chunk
        sequence: i64,
    },
    /// The assistant is using an auxiliary capability
    Tool {
        /// Call or result
        phase: ToolPhase,
        /// Capability name
        tool_name: Option<String>,
        /// Free-form detail for display
        detail: Option<String>,
    },
}

/// Payload of `on_update`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUpdate {
    /// Session key
    pub correlation_id: CorrelationId,
    /// Latest cumulative content
    pub content: String,
    /// Server marked this as the last content chunk
    pub is_final: bool,
    /// What produced the update
    pub activity: Activity,
}

/// Payload of `on_complete`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Session key
    pub correlation_id: CorrelationId,
    /// Definitive answer
    pub content: String,
    /// Follow-up suggestions
    pub suggested_actions: Vec<SuggestedAction>,
}

/// Payload of `on_error`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionFailure {
    /// Session key
    pub correlation_id: CorrelationId,
    /// Why the session ended
    pub error: SessionError,
    /// Content accumulated before the failure; preserved, not discarded
    pub partial_content: String,
}

impl SessionFailure {
    /// Partial content with a trailing marker suitable for display
    #[must_use]
    pub fn annotated_content(&self) -> String {
        let marker = match &self.error {
            SessionError::Cancelled(_) => "[cancelled]",
            SessionError::StreamTimeout(_) | SessionError::ConnectionClosed(_) => "[interrupted]",
            SessionError::StreamError(_) => "[failed]",
        };
        if self.partial_content.is_empty() {
            marker.to_string()
        } else {
            format!("{}\n\n{marker}", self.partial_content)
        }
    }
}

/// Everything a session can report, for channel-based consumers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionNotice {
    /// `on_update`
    Update(SessionUpdate),
    /// `on_complete`
    Completed(Completion),
    /// `on_error`
    Failed(SessionFailure),
}

type UpdateFn = Box<dyn FnMut(SessionUpdate) + Send>;
type CompleteFn = Box<dyn FnOnce(Completion) + Send>;
type ErrorFn = Box<dyn FnOnce(SessionFailure) + Send>;

/// Optional subscribers for one session
#[derive(Default)]
pub struct CallbackSet {
    on_update: Option<UpdateFn>,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl CallbackSet {
    /// Empty set; every event is still tracked, just not reported
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every accepted chunk or tool event, in sequence order
    #[must_use]
    pub fn on_update(mut self, f: impl FnMut(SessionUpdate) + Send + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    /// Called once when the server ends the stream
    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce(Completion) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called once on error, timeout, cancellation, or connection loss
    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(SessionFailure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Forward all three callbacks into a channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let update_tx = tx.clone();
        let complete_tx = tx.clone();

        let set = Self::new()
            .on_update(move |update| {
                let _ = update_tx.send(SessionNotice::Update(update));
            })
            .on_complete(move |completion| {
                let _ = complete_tx.send(SessionNotice::Completed(completion));
            })
            .on_error(move |failure| {
                let _ = tx.send(SessionNotice::Failed(failure));
            });

        (set, rx)
    }

    pub(crate) fn update(&mut self, update: SessionUpdate) {
        if let Some(f) = self.on_update.as_mut() {
            f(update);
        }
    }

    pub(crate) fn complete(self, completion: Completion) {
        if let Some(f) = self.on_complete {
            f(completion);
        }
    }

    pub(crate) fn fail(self, failure: SessionFailure) {
        if let Some(f) = self.on_error {
            f(failure);
        }
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("on_update", &self.on_update.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_channel_adapter_forwards_in_order() {
        let (mut set, mut rx) = CallbackSet::channel();
        set.update(SessionUpdate {
            correlation_id: "r-1".into(),
            content: "Hi".into(),
            is_final: false,
            activity: Activity::Content { sequence: 0 },
        });
        set.complete(Completion {
            correlation_id: "r-1".into(),
            content: "Hi!".into(),
            suggested_actions: Vec::new(),
        });

        assert!(matches!(rx.try_recv(), Ok(SessionNotice::Update(_))));
        assert!(matches!(rx.try_recv(), Ok(SessionNotice::Completed(_))));
        // Every sender was consumed with the set
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_missing_callbacks_are_skipped() {
        let mut set = CallbackSet::new();
        set.update(SessionUpdate {
            correlation_id: "r-1".into(),
            content: String::new(),
            is_final: false,
            activity: Activity::Content { sequence: 0 },
        });
        set.fail(SessionFailure {
            correlation_id: "r-1".into(),
            error: SessionError::StreamError("boom".into()),
            partial_content: String::new(),
        });
    }

    #[test]
    fn test_annotated_content_keeps_partial_answer() {
        let failure = SessionFailure {
            correlation_id: "r-1".into(),
            error: SessionError::StreamTimeout(Duration::from_secs(45)),
            partial_content: "The guarantee expires".into(),
        };
        assert_eq!(
            failure.annotated_content(),
            "The guarantee expires\n\n[interrupted]"
        );

        let empty = SessionFailure {
            partial_content: String::new(),
            error: SessionError::Cancelled("user".into()),
            ..failure
        };
        assert_eq!(empty.annotated_content(), "[cancelled]");
    }

    #[test]
    fn test_debug_reports_presence_only() {
        let set = CallbackSet::new().on_complete(|_| {});
        let debug = format!("{set:?}");
        assert!(debug.contains("on_complete: true"));
        assert!(debug.contains("on_update: false"));
    }
}
