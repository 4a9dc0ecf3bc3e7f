//! Status confirmation engine.
//!
//! Turns noisy raw poll snapshots into debounced, notification-worthy status
//! transitions. The engine itself is pure in-memory state; the caller
//! persists each tick's [`TickOutcome`] through
//! [`StatusRepository::persist_tick`](crate::database::repositories::StatusRepository)
//! in one transaction, so a storage failure never leaves a tick half-applied.

mod engine;

pub use engine::{ConfirmationEngine, ConfirmedTransition, TickOutcome};
