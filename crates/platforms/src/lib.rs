//! Online-model pollers for cam platforms.
//!
//! Each supported platform implements the [`OnlinePoller`] trait: one call
//! returns the complete set of currently-online models (a *snapshot*), another
//! probes a single model by ID. The concrete poller is selected once at
//! startup from the configured platform name via [`factory::for_platform`].
//!
//! The [`runner::PollerRunner`] owns the polling cadence and the channel pair
//! that hands snapshots (or error signals) to the consumer, so platform I/O
//! never runs on the consumer's thread of control.

pub mod error;
pub mod factory;
pub mod platforms;
pub mod poller;
pub mod runner;
pub mod status;

pub use error::PollerError;
pub use rustc_hash::FxHashMap;
pub use factory::for_platform;
pub use poller::{OnlinePoller, PollerContext};
pub use runner::{PollOutcome, PollRequest, PollRequester, PollerHandle, PollerRunner};
pub use status::{MODEL_ID_REGEX, OnlineModel, Snapshot, StatusKind, canonical_model_id};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, PollerError>;
