//! Telegram presence-notification bot.
//!
//! Polls an adult-cam platform for its online model list, debounces the raw
//! flips into confirmed status transitions and notifies subscribed chats
//! through a rate-limit-aware two-lane delivery pipeline. One orchestrator
//! task owns all mutable state; everything else talks to it over channels.

pub mod api;
pub mod commands;
pub mod config;
pub mod confirm;
pub mod database;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod payments;
pub mod stats;
pub mod telegram;

pub use error::{Error, Result};
