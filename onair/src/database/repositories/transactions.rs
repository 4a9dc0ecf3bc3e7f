//! Payment transaction repository.

use sqlx::Row;

use crate::Result;
use crate::database::DbPool;
use crate::database::models::{TransactionRow, TransactionStatus};

pub struct TransactionRepository {
    pool: DbPool,
}

impl TransactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        local_id: &str,
        kind: &str,
        chat_id: i64,
        endpoint: &str,
        model_number: i32,
        timestamp: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (local_id, status, kind, chat_id, endpoint, model_number, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(local_id)
        .bind(TransactionStatus::Created.as_i32())
        .bind(kind)
        .bind(chat_id)
        .bind(endpoint)
        .bind(model_number)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, local_id: &str) -> Result<Option<TransactionRow>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT local_id, status, kind, chat_id, endpoint, model_number, timestamp \
             FROM transactions WHERE local_id = ?",
        )
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_status(&self, local_id: &str, status: TransactionStatus) -> Result<()> {
        sqlx::query("UPDATE transactions SET status = ? WHERE local_id = ?")
            .bind(status.as_i32())
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self, endpoint: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM transactions WHERE endpoint = ?")
            .bind(endpoint)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_finished(&self, endpoint: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM transactions WHERE endpoint = ? AND status = ?",
        )
        .bind(endpoint)
        .bind(TransactionStatus::Finished.as_i32())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::testing;

    #[tokio::test]
    async fn transaction_lifecycle() {
        let pool = testing::pool().await;
        let repo = TransactionRepository::new(pool);

        repo.create("tx-1", "coinpayments", 7, "main", 50, 1000)
            .await
            .unwrap();
        let tx = repo.get("tx-1").await.unwrap().unwrap();
        assert_eq!(TransactionStatus::from_i32(tx.status), TransactionStatus::Created);
        assert_eq!(tx.model_number, 50);

        repo.set_status("tx-1", TransactionStatus::Finished).await.unwrap();
        let tx = repo.get("tx-1").await.unwrap().unwrap();
        assert_eq!(TransactionStatus::from_i32(tx.status), TransactionStatus::Finished);

        assert_eq!(repo.count("main").await.unwrap(), 1);
        assert_eq!(repo.count_finished("main").await.unwrap(), 1);
        assert!(repo.get("missing").await.unwrap().is_none());
    }
}
