//! Lane queues and their workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DeliveryResult, Lane, MessageTransport, OutgoingMessage};

/// Pause between consecutive messages in one lane, to avoid flooding.
const INTER_MESSAGE_PACING: Duration = Duration::from_millis(60);

/// Producer side of the two lane queues.
#[derive(Clone)]
pub struct DeliveryPipeline {
    high: mpsc::Sender<OutgoingMessage>,
    low: mpsc::Sender<OutgoingMessage>,
}

impl DeliveryPipeline {
    /// Create both lanes and spawn their workers.
    ///
    /// Terminal attempt results flow into `results`; queue overflow drops the
    /// message with a warning rather than backpressuring the producer.
    pub fn spawn(
        transport: Arc<dyn MessageTransport>,
        capacity: usize,
        results: mpsc::Sender<DeliveryResult>,
        cancel: CancellationToken,
    ) -> Self {
        let (high_tx, high_rx) = mpsc::channel(capacity);
        let (low_tx, low_rx) = mpsc::channel(capacity);

        for (lane, rx) in [(Lane::High, high_rx), (Lane::Low, low_rx)] {
            let worker = LaneWorker {
                lane,
                transport: transport.clone(),
                results: results.clone(),
                cancel: cancel.clone(),
            };
            tokio::spawn(worker.run(rx));
        }

        Self {
            high: high_tx,
            low: low_tx,
        }
    }

    /// Non-blocking enqueue; a saturated lane drops the message.
    pub fn enqueue(&self, lane: Lane, message: OutgoingMessage) {
        let sender = match lane {
            Lane::High => &self.high,
            Lane::Low => &self.low,
        };
        if let Err(e) = sender.try_send(message) {
            warn!(?lane, "outgoing message queue is full, dropping: {e}");
        }
    }

    /// Messages currently queued in a lane, for the /stat snapshot.
    pub fn depth(&self, lane: Lane) -> usize {
        let sender = match lane {
            Lane::High => &self.high,
            Lane::Low => &self.low,
        };
        sender.max_capacity() - sender.capacity()
    }
}

/// One lane's sequential send worker.
pub struct LaneWorker {
    lane: Lane,
    transport: Arc<dyn MessageTransport>,
    results: mpsc::Sender<DeliveryResult>,
    cancel: CancellationToken,
}

impl LaneWorker {
    /// Drain the lane until shutdown. Strictly one in-flight send: a retried
    /// message blocks everything queued behind it in this lane (an accepted
    /// trade-off; the other lane is unaffected).
    pub async fn run(self, mut queue: mpsc::Receiver<OutgoingMessage>) {
        info!(lane = ?self.lane, "lane worker started");
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.deliver(message).await;
        }
        info!(lane = ?self.lane, "lane worker stopped");
    }

    async fn deliver(&self, message: OutgoingMessage) {
        loop {
            let outcome = self.transport.send(&message).await;
            if let Some(delay) = outcome.retry_delay() {
                debug!(
                    lane = ?self.lane,
                    chat_id = message.chat_id,
                    ?outcome,
                    "transient send failure, retrying in {delay:?}"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }

            let result = DeliveryResult {
                lane: self.lane,
                endpoint: message.endpoint.clone(),
                chat_id: message.chat_id,
                outcome,
                enqueued_at: message.enqueued_at,
                latency_ms: message.requested.elapsed().as_millis() as i64,
            };
            if self.results.send(result).await.is_err() {
                return;
            }
            tokio::time::sleep(INTER_MESSAGE_PACING).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{MockMessageTransport, SendOutcome};

    fn message(chat_id: i64) -> OutgoingMessage {
        OutgoingMessage::text("main", chat_id, "hi")
    }

    fn pipeline(
        transport: MockMessageTransport,
        capacity: usize,
    ) -> (DeliveryPipeline, mpsc::Receiver<DeliveryResult>, CancellationToken) {
        let (results_tx, results_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let pipeline =
            DeliveryPipeline::spawn(Arc::new(transport), capacity, results_tx, cancel.clone());
        (pipeline, results_rx, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_outcome_sends_exactly_once() {
        let mut transport = MockMessageTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| SendOutcome::Blocked);

        let (pipeline, mut results, _cancel) = pipeline(transport, 16);
        pipeline.enqueue(Lane::High, message(1));

        let result = results.recv().await.unwrap();
        assert_eq!(result.outcome, SendOutcome::Blocked);
        assert_eq!(result.lane, Lane::High);
        // The mock's `times(1)` would panic on a second attempt.
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_until_success_with_one_result() {
        let mut transport = MockMessageTransport::new();
        let mut attempts = 0;
        transport.expect_send().times(3).returning(move |_| {
            attempts += 1;
            match attempts {
                1 => SendOutcome::Timeout,
                2 => SendOutcome::RateLimited,
                _ => SendOutcome::Sent,
            }
        });

        let (pipeline, mut results, _cancel) = pipeline(transport, 16);
        pipeline.enqueue(Lane::Low, message(2));

        let result = results.recv().await.unwrap();
        assert_eq!(result.outcome, SendOutcome::Sent);
        // Retries are invisible: only the terminal attempt reports.
        assert!(results.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn a_stalled_high_lane_does_not_delay_the_low_lane() {
        let mut transport = MockMessageTransport::new();
        transport.expect_send().returning(|message| {
            if message.chat_id == 1 {
                // Permanently failing transient class: retries forever.
                SendOutcome::Timeout
            } else {
                SendOutcome::Sent
            }
        });

        let (pipeline, mut results, _cancel) = pipeline(transport, 16);
        pipeline.enqueue(Lane::High, message(1));
        pipeline.enqueue(Lane::Low, message(2));

        let result = results.recv().await.unwrap();
        assert_eq!(result.chat_id, 2);
        assert_eq!(result.outcome, SendOutcome::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_order_within_a_lane_survives_retries() {
        let mut transport = MockMessageTransport::new();
        let mut first_attempts = 0;
        transport.expect_send().returning(move |message| {
            if message.chat_id == 1 {
                first_attempts += 1;
                if first_attempts < 3 {
                    return SendOutcome::NetworkError;
                }
            }
            SendOutcome::Sent
        });

        let (pipeline, mut results, _cancel) = pipeline(transport, 16);
        pipeline.enqueue(Lane::High, message(1));
        pipeline.enqueue(Lane::High, message(2));

        assert_eq!(results.recv().await.unwrap().chat_id, 1);
        assert_eq!(results.recv().await.unwrap().chat_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_lane_drops_instead_of_blocking() {
        // No worker consumption needed: capacity 1, second message dropped.
        let transport = MockMessageTransport::new();
        let (results_tx, _results_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel(); // workers exit immediately, nothing drains
        let pipeline =
            DeliveryPipeline::spawn(Arc::new(transport), 1, results_tx, cancel);

        pipeline.enqueue(Lane::Low, message(1));
        pipeline.enqueue(Lane::Low, message(2)); // dropped, no panic, no block
        assert_eq!(pipeline.depth(Lane::Low), 1);
    }
}
