//! Delivery outcome classification.

use std::time::Duration;

/// Classified result of one send attempt.
///
/// The integer codes follow the Telegram HTTP statuses where one exists and
/// are what the `interactions` table stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendOutcome {
    /// Delivered.
    Sent,
    /// The destination rejected the bot permanently (HTTP 403).
    Blocked,
    /// Non-retryable request failure (HTTP 400).
    BadRequest,
    /// The group migrated to a new chat ID; the old ID is dead.
    ChatMigrated,
    /// The chat does not exist.
    ChatNotFound,
    /// HTTP 429; retry after a longer pause.
    RateLimited,
    /// The request timed out.
    Timeout,
    /// Some other network-level failure.
    NetworkError,
    /// Anything unclassifiable; treated as terminal.
    Unknown,
}

impl SendOutcome {
    pub fn as_code(self) -> i32 {
        match self {
            SendOutcome::Sent => 200,
            SendOutcome::BadRequest => 400,
            SendOutcome::Blocked => 403,
            SendOutcome::RateLimited => 429,
            SendOutcome::Unknown => -1,
            SendOutcome::NetworkError => -2,
            SendOutcome::Timeout => -3,
            SendOutcome::ChatMigrated => -4,
            SendOutcome::ChatNotFound => -5,
        }
    }

    /// Delay before retrying the same message, or `None` for terminal
    /// outcomes.
    pub fn retry_delay(self) -> Option<Duration> {
        match self {
            SendOutcome::Timeout | SendOutcome::NetworkError => Some(Duration::from_secs(1)),
            SendOutcome::RateLimited => Some(Duration::from_secs(8)),
            _ => None,
        }
    }

    /// Whether this outcome should bump the destination's block counter.
    pub fn is_permanent_block(self) -> bool {
        matches!(self, SendOutcome::Blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_classes_retry() {
        assert!(SendOutcome::Timeout.retry_delay().is_some());
        assert!(SendOutcome::NetworkError.retry_delay().is_some());
        assert!(SendOutcome::RateLimited.retry_delay().is_some());
        for terminal in [
            SendOutcome::Sent,
            SendOutcome::Blocked,
            SendOutcome::BadRequest,
            SendOutcome::ChatMigrated,
            SendOutcome::ChatNotFound,
            SendOutcome::Unknown,
        ] {
            assert!(terminal.retry_delay().is_none());
        }
    }

    #[test]
    fn rate_limit_backs_off_longer_than_transport_errors() {
        assert!(
            SendOutcome::RateLimited.retry_delay().unwrap()
                > SendOutcome::Timeout.retry_delay().unwrap()
        );
    }
}
