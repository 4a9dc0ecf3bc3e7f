//! Outbound delivery pipeline.
//!
//! Two independent priority lanes, each drained by one strictly sequential
//! worker. Workers classify every send through [`SendOutcome`], retry
//! transient classes in place (the retried message keeps its position, so
//! lane FIFO order survives retries), and report one [`DeliveryResult`] per
//! terminal attempt back to the orchestrator.

mod lane;
mod outcome;

pub use lane::{DeliveryPipeline, LaneWorker};
pub use outcome::SendOutcome;

use std::time::Instant;

use async_trait::async_trait;

/// Priority lane of the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Interactive replies and mail forwards.
    High,
    /// Notifications and broadcasts.
    Low,
}

impl Lane {
    pub fn as_i32(self) -> i32 {
        match self {
            Lane::High => 0,
            Lane::Low => 1,
        }
    }
}

/// Message body of an outgoing Telegram message.
#[derive(Debug, Clone)]
pub enum MessagePayload {
    Text {
        text: String,
        /// "HTML", "Markdown", or empty for plain text.
        parse_mode: String,
        notify: bool,
        disable_preview: bool,
    },
    Photo {
        image: Vec<u8>,
        caption: String,
        parse_mode: String,
        notify: bool,
    },
}

/// One message bound for a chat.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub endpoint: String,
    pub chat_id: i64,
    pub payload: MessagePayload,
    /// Unix seconds at enqueue, reported in the delivery result.
    pub enqueued_at: i64,
    /// Wall-clock enqueue instant, for latency measurement.
    pub requested: Instant,
}

impl OutgoingMessage {
    pub fn text(endpoint: impl Into<String>, chat_id: i64, text: impl Into<String>) -> Self {
        Self::new(
            endpoint,
            chat_id,
            MessagePayload::Text {
                text: text.into(),
                parse_mode: String::new(),
                notify: true,
                disable_preview: true,
            },
        )
    }

    pub fn new(endpoint: impl Into<String>, chat_id: i64, payload: MessagePayload) -> Self {
        Self {
            endpoint: endpoint.into(),
            chat_id,
            payload,
            enqueued_at: crate::database::now_ts(),
            requested: Instant::now(),
        }
    }
}

/// One terminal delivery attempt, reported to the orchestrator.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub lane: Lane,
    pub endpoint: String,
    pub chat_id: i64,
    pub outcome: SendOutcome,
    pub enqueued_at: i64,
    pub latency_ms: i64,
}

/// Abstraction over the outbound transport, so lane workers can be tested
/// without a network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> SendOutcome;
}
