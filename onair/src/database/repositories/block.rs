//! Block-counter repository: per (endpoint, chat) permanent-failure tally.

use sqlx::Row;

use crate::Result;
use crate::database::DbPool;

pub struct BlockRepository {
    pool: DbPool,
}

impl BlockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn increment(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO block (endpoint, chat_id, block) VALUES (?, ?, 1) \
             ON CONFLICT (chat_id, endpoint) DO UPDATE SET block = block + 1",
        )
        .bind(endpoint)
        .bind(chat_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reset(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        sqlx::query("UPDATE block SET block = 0 WHERE endpoint = ? AND chat_id = ?")
            .bind(endpoint)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, endpoint: &str, chat_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(block), 0) AS n FROM block WHERE endpoint = ? AND chat_id = ?",
        )
        .bind(endpoint)
        .bind(chat_id)
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
    async fn increment_accumulates_and_reset_zeroes() {
        let pool = testing::pool().await;
        let repo = BlockRepository::new(pool);

        assert_eq!(repo.get("main", 5).await.unwrap(), 0);
        repo.increment("main", 5).await.unwrap();
        repo.increment("main", 5).await.unwrap();
        repo.increment("main", 5).await.unwrap();
        assert_eq!(repo.get("main", 5).await.unwrap(), 3);

        repo.reset("main", 5).await.unwrap();
        assert_eq!(repo.get("main", 5).await.unwrap(), 0);

        // Counters are per endpoint.
        repo.increment("other", 5).await.unwrap();
        assert_eq!(repo.get("main", 5).await.unwrap(), 0);
        assert_eq!(repo.get("other", 5).await.unwrap(), 1);
    }
}
