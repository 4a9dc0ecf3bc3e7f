//! Payment gateway callback handling.
//!
//! Signature verification happens upstream of the HTTP route; by the time an
//! event reaches here it is trusted. `finished` is the only state that grants
//! anything; the rest is bookkeeping plus an admin note.

use tracing::{info, warn};

use crate::database::models::TransactionStatus;
use crate::database::repositories::{TransactionRepository, UserRepository};
use crate::delivery::{DeliveryPipeline, Lane, OutgoingMessage};
use crate::orchestrator::{PaymentEvent, PaymentStatus};
use crate::Result;

pub struct PaymentProcessor {
    pub transactions: TransactionRepository,
    pub users: UserRepository,
    pub pipeline: DeliveryPipeline,
    pub admin_endpoint: String,
    pub admin_id: i64,
}

impl PaymentProcessor {
    /// Apply one gateway callback. Returns false for an unknown transaction
    /// (the route answers 404 so the gateway stops retrying a bogus ID).
    pub async fn apply(&self, event: &PaymentEvent) -> Result<bool> {
        let Some(transaction) = self.transactions.get(&event.local_id).await? else {
            warn!(local_id = %event.local_id, "callback for an unknown transaction");
            return Ok(false);
        };

        let status = match event.status {
            PaymentStatus::Finished => TransactionStatus::Finished,
            PaymentStatus::Canceled => TransactionStatus::Canceled,
            PaymentStatus::Pending => TransactionStatus::Pending,
        };
        // Terminal states never regress; a late "pending" after "finished"
        // is dropped.
        if TransactionStatus::from_i32(transaction.status) == TransactionStatus::Finished
            && status != TransactionStatus::Finished
        {
            warn!(local_id = %event.local_id, ?status, "ignoring regression of a finished transaction");
            return Ok(true);
        }
        self.transactions.set_status(&event.local_id, status).await?;

        match event.status {
            PaymentStatus::Finished => {
                self.users
                    .credit_max_models(transaction.chat_id, transaction.model_number)
                    .await?;
                info!(
                    local_id = %event.local_id,
                    chat_id = transaction.chat_id,
                    slots = transaction.model_number,
                    "payment finished"
                );
                self.pipeline.enqueue(
                    Lane::Low,
                    OutgoingMessage::text(
                        &transaction.endpoint,
                        transaction.chat_id,
                        format!(
                            "Payment received, {} more subscription slots are yours",
                            transaction.model_number
                        ),
                    ),
                );
                self.notify_admin(format!(
                    "payment finished: {} for {}:{}",
                    event.local_id, transaction.endpoint, transaction.chat_id
                ));
            }
            PaymentStatus::Canceled => {
                self.notify_admin(format!("payment canceled: {}", event.local_id));
            }
            PaymentStatus::Pending => {
                info!(local_id = %event.local_id, "payment pending");
            }
        }
        Ok(true)
    }

    fn notify_admin(&self, text: String) {
        self.pipeline.enqueue(
            Lane::High,
            OutgoingMessage::text(&self.admin_endpoint, self.admin_id, text),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::database::now_ts;
    use crate::database::repositories::testing;
    use crate::delivery::{MockMessageTransport, SendOutcome};

    async fn processor() -> (PaymentProcessor, mpsc::Receiver<crate::delivery::DeliveryResult>) {
        let pool = testing::pool().await;
        let mut transport = MockMessageTransport::new();
        transport.expect_send().returning(|_| SendOutcome::Sent);
        let (results_tx, results_rx) = mpsc::channel(16);
        let pipeline = DeliveryPipeline::spawn(
            Arc::new(transport),
            16,
            results_tx,
            CancellationToken::new(),
        );
        let processor = PaymentProcessor {
            transactions: TransactionRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            pipeline,
            admin_endpoint: "main".to_owned(),
            admin_id: 99,
        };
        (processor, results_rx)
    }

    #[tokio::test]
    async fn finished_payment_credits_slots() {
        let (processor, _results) = processor().await;
        processor.users.ensure("main", 42, 5).await.unwrap();
        processor
            .transactions
            .create("tx-1", "packet", 42, "main", 10, now_ts())
            .await
            .unwrap();

        let applied = processor
            .apply(&PaymentEvent {
                local_id: "tx-1".to_owned(),
                status: PaymentStatus::Finished,
            })
            .await
            .unwrap();
        assert!(applied);

        let user = processor.users.get(42).await.unwrap().unwrap();
        assert_eq!(user.max_models, 15);
        let row = processor.transactions.get("tx-1").await.unwrap().unwrap();
        assert_eq!(
            TransactionStatus::from_i32(row.status),
            TransactionStatus::Finished
        );
    }

    #[tokio::test]
    async fn unknown_transaction_is_rejected() {
        let (processor, _results) = processor().await;
        let applied = processor
            .apply(&PaymentEvent {
                local_id: "missing".to_owned(),
                status: PaymentStatus::Finished,
            })
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn finished_state_never_regresses() {
        let (processor, _results) = processor().await;
        processor.users.ensure("main", 42, 5).await.unwrap();
        processor
            .transactions
            .create("tx-1", "packet", 42, "main", 10, now_ts())
            .await
            .unwrap();
        for status in [PaymentStatus::Finished, PaymentStatus::Pending] {
            processor
                .apply(&PaymentEvent {
                    local_id: "tx-1".to_owned(),
                    status,
                })
                .await
                .unwrap();
        }
        let row = processor.transactions.get("tx-1").await.unwrap().unwrap();
        assert_eq!(
            TransactionStatus::from_i32(row.status),
            TransactionStatus::Finished
        );
    }
}
