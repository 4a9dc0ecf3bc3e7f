//! Concrete platform pollers.

pub mod bongacams;
pub mod chaturbate;
pub mod livejasmin;
pub mod mock;
pub mod stripchat;

pub use bongacams::BongaCams;
pub use chaturbate::Chaturbate;
pub use livejasmin::LiveJasmin;
pub use mock::MockPlatform;
pub use stripchat::Stripchat;
