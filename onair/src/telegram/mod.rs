//! Telegram Bot API surface.
//!
//! Outbound: [`TelegramClient`] implements the delivery pipeline's
//! [`MessageTransport`](crate::delivery::MessageTransport) plus the webhook
//! management calls done at startup and shutdown. Inbound: the update types
//! deserialized by the webhook route.

mod client;
mod types;

pub use client::{TelegramClient, USER_COMMANDS};
pub use types::{BotCommand, BotInfo, CallbackQuery, Chat, Message, TgUser, Update};
