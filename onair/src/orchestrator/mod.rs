//! Single-threaded event loop tying everything together.
//!
//! All mutable state lives on one task: the confirmation engine, the image
//! URL cache, the error rings and the period counters. Every other component
//! talks to the loop over channels, so none of the state needs locks.

mod events;
mod fanout;
mod service;

pub use events::{Event, MailEvent, PaymentEvent, PaymentStatus};
pub use fanout::{plan_notifications, PlannedNotification};
pub use service::{Channels, Orchestrator};
