//! Stream Sessions
//!
//! Everything that happens to a streamed answer after its submission has
//! been accepted: the per-session state machine, the registry that owns
//! sessions and their callbacks, and the dispatch loop that feeds push
//! events into the registry one at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Dispatcher task                        │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                   SessionRegistry                       │  │
//! │  │  ┌──────────────────────┐  ┌──────────────────────┐     │  │
//! │  │  │ StreamSession (r-1)  │  │ StreamSession (r-2)  │ ... │  │
//! │  │  │ + CallbackSet        │  │ + CallbackSet        │     │  │
//! │  │  └──────────────────────┘  └──────────────────────┘     │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │        ▲ commands (in order)           │ earliest deadline    │
//! └────────┼───────────────────────────────┼──────────────────────┘
//!          │                               ▼
//!   DispatcherHandle                 StreamTimeout
//! ```
//!
//! # Guarantees
//!
//! - **Monotonic**: a chunk is applied only if its sequence exceeds the
//!   last accepted one; duplicates are idempotent
//! - **Exclusive termination**: each session ends exactly once, with
//!   either `on_complete` or `on_error`
//! - **Scoped callbacks**: a session's callbacks are dropped with it

mod callbacks;
mod dispatcher;
mod registry;
mod session;

pub use callbacks::{
    Activity, CallbackSet, Completion, SessionFailure, SessionNotice, SessionUpdate,
};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use registry::{DispatchOutcome, DropReason, RegistryStats, SessionRegistry, StreamConfig};
pub use session::{Rejection, SessionSnapshot, SessionStatus, StreamSession};
