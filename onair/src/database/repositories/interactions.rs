//! Interaction repository: one analytics row per terminal delivery attempt.

use std::collections::HashMap;

use sqlx::Row;

use crate::Result;
use crate::database::DbPool;
use crate::delivery::DeliveryResult;

pub struct InteractionRepository {
    pool: DbPool,
}

impl InteractionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, result: &DeliveryResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO interactions (timestamp, chat_id, result, endpoint, priority, delay) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(result.enqueued_at)
        .bind(result.chat_id)
        .bind(result.outcome.as_code())
        .bind(&result.endpoint)
        .bind(result.lane.as_i32())
        .bind(result.latency_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Outcome-code histogram over the trailing 24 hours.
    pub async fn histogram_24h(&self, endpoint: &str, now: i64) -> Result<HashMap<i32, i64>> {
        let rows = sqlx::query(
            "SELECT result, COUNT(*) AS n FROM interactions \
             WHERE endpoint = ? AND timestamp > ? GROUP BY result",
        )
        .bind(endpoint)
        .bind(now - 24 * 3600)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("result"), row.get("n")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::testing;
    use crate::delivery::{Lane, SendOutcome};

    #[tokio::test]
    async fn histogram_counts_recent_outcomes_only() {
        let pool = testing::pool().await;
        let repo = InteractionRepository::new(pool);

        let result = |enqueued_at, outcome| DeliveryResult {
            lane: Lane::High,
            endpoint: "main".to_string(),
            chat_id: 1,
            outcome,
            enqueued_at,
            latency_ms: 12,
        };
        repo.record(&result(100_000, SendOutcome::Sent)).await.unwrap();
        repo.record(&result(100_001, SendOutcome::Sent)).await.unwrap();
        repo.record(&result(100_002, SendOutcome::Blocked)).await.unwrap();
        // Too old for a 24 h window ending at 100_010.
        repo.record(&result(100_010 - 25 * 3600, SendOutcome::Sent))
            .await
            .unwrap();

        let histogram = repo.histogram_24h("main", 100_010).await.unwrap();
        assert_eq!(histogram[&SendOutcome::Sent.as_code()], 2);
        assert_eq!(histogram[&SendOutcome::Blocked.as_code()], 1);
    }
}
