//! Database row models.

use platforms_poller::StatusKind;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One raw status flip: the unit of the append-only history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: StatusKind,
    /// Unix seconds of the flip into `status`.
    pub timestamp: i64,
}

/// A user (chat) known to the bot.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserRow {
    pub chat_id: i64,
    pub max_models: i32,
    pub reports: i32,
    pub blacklist: bool,
    pub show_images: bool,
    pub offline_notifications: bool,
}

/// A fan-out target for one model: the chat plus the preference bits the
/// notifier needs, joined in one query.
#[derive(Debug, Clone, FromRow)]
pub struct NotifyTarget {
    pub model_id: String,
    pub chat_id: i64,
    pub endpoint: String,
    pub offline_notifications: bool,
    pub show_images: bool,
}

/// A payment transaction row.
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub local_id: String,
    pub status: i32,
    pub kind: String,
    pub chat_id: i64,
    pub endpoint: String,
    pub model_number: i32,
    pub timestamp: i64,
}

/// Terminal (and intermediate) payment transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[repr(i32)]
pub enum TransactionStatus {
    Unknown = 0,
    Created = 1,
    Pending = 2,
    Finished = 3,
    Canceled = 4,
}

impl TransactionStatus {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => Self::Created,
            2 => Self::Pending,
            3 => Self::Finished,
            4 => Self::Canceled,
            _ => Self::Unknown,
        }
    }
}
