//! Events delivered to the orchestrator loop by the HTTP surface.

use tokio::sync::oneshot;

use crate::stats::Stat;
use crate::telegram::Update;

/// One message into the orchestrator's event channel.
#[derive(Debug)]
pub enum Event {
    /// Telegram webhook update for one endpoint.
    ChatUpdate { endpoint: String, update: Update },
    /// Inbound mail forwarded by the external SMTP listener.
    Mail(MailEvent),
    /// /stat snapshot request; the handler awaits the reply.
    Stat { reply: oneshot::Sender<Stat> },
    /// Payment gateway callback, already signature-verified upstream.
    Payment {
        event: PaymentEvent,
        /// `true` when the transaction was known and the state recorded.
        reply: oneshot::Sender<bool>,
    },
}

/// Mail addressed to a user's generated inbox.
#[derive(Debug, Clone)]
pub struct MailEvent {
    /// Local part of the receiving address (the user's inbox UUID).
    pub inbox: String,
    pub subject: String,
    pub text: String,
}

/// Terminal or intermediate state reported by the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Finished,
    Canceled,
    Pending,
}

#[derive(Debug, Clone)]
pub struct PaymentEvent {
    /// Our transaction UUID, echoed back by the gateway.
    pub local_id: String,
    pub status: PaymentStatus,
}
