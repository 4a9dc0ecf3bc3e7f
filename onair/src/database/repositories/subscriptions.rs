//! Subscription (signal) repository: who watches which model, and the
//! derived fan-out / polling target lists.

use platforms_poller::StatusKind;
use sqlx::Row;

use crate::Result;
use crate::database::DbPool;
use crate::database::models::NotifyTarget;

pub struct SubscriptionRepository {
    pool: DbPool,
}

impl SubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn exists(&self, endpoint: &str, chat_id: i64, model_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM signals WHERE chat_id = ? AND model_id = ? AND endpoint = ?",
        )
        .bind(chat_id)
        .bind(model_id)
        .bind(endpoint)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") != 0)
    }

    pub async fn count_for_chat(&self, endpoint: &str, chat_id: i64) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM signals WHERE chat_id = ? AND endpoint = ?")
                .bind(chat_id)
                .bind(endpoint)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("n"))
    }

    pub async fn subscribe(&self, endpoint: &str, chat_id: i64, model_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO signals (chat_id, model_id, endpoint) VALUES (?, ?, ?)")
            .bind(chat_id)
            .bind(model_id)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, endpoint: &str, chat_id: i64, model_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM signals WHERE chat_id = ? AND model_id = ? AND endpoint = ?")
            .bind(chat_id)
            .bind(model_id)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_all(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM signals WHERE chat_id = ? AND endpoint = ?")
            .bind(chat_id)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn models_for_chat(&self, endpoint: &str, chat_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT model_id FROM signals WHERE chat_id = ? AND endpoint = ? ORDER BY model_id",
        )
        .bind(chat_id)
        .bind(endpoint)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("model_id")).collect())
    }

    /// Models and their confirmed statuses for one chat's list view.
    pub async fn statuses_for_chat(
        &self,
        endpoint: &str,
        chat_id: i64,
    ) -> Result<Vec<(String, StatusKind)>> {
        let rows = sqlx::query(
            "SELECT models.model_id, models.status FROM models \
             JOIN signals ON signals.model_id = models.model_id \
             WHERE signals.chat_id = ? AND signals.endpoint = ? ORDER BY models.model_id",
        )
        .bind(chat_id)
        .bind(endpoint)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("model_id"),
                    StatusKind::from_i32(row.get("status")),
                )
            })
            .collect())
    }

    /// Fan-out targets for confirmed transitions: every subscriber binding
    /// joined with the user's preference bits, excluding chats whose block
    /// counter reached the threshold.
    pub async fn notify_targets(&self, block_threshold: i64) -> Result<Vec<NotifyTarget>> {
        let rows = sqlx::query_as::<_, NotifyTarget>(
            "SELECT signals.model_id, signals.chat_id, signals.endpoint, \
                    users.offline_notifications, users.show_images \
             FROM signals \
             JOIN users ON users.chat_id = signals.chat_id \
             LEFT JOIN block ON signals.chat_id = block.chat_id \
                  AND signals.endpoint = block.endpoint \
             WHERE block.block IS NULL OR block.block < ?",
        )
        .bind(block_threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct chats on one endpoint, for admin broadcasts.
    pub async fn broadcast_chats(&self, endpoint: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT DISTINCT chat_id FROM signals WHERE endpoint = ? ORDER BY chat_id",
        )
        .bind(endpoint)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("chat_id")).collect())
    }

    pub async fn users_count(&self, endpoint: &str) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(DISTINCT chat_id) AS n FROM signals WHERE endpoint = ?")
                .bind(endpoint)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("n"))
    }

    pub async fn groups_count(&self, endpoint: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT chat_id) AS n FROM signals WHERE endpoint = ? AND chat_id < 0",
        )
        .bind(endpoint)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    pub async fn active_users_count(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT signals.chat_id) AS n FROM signals \
             LEFT JOIN block ON signals.chat_id = block.chat_id \
                  AND signals.endpoint = block.endpoint \
             WHERE block.block IS NULL OR block.block = 0",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    pub async fn models_count(&self, endpoint: &str) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(DISTINCT model_id) AS n FROM signals WHERE endpoint = ?")
                .bind(endpoint)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("n"))
    }

    pub async fn models_to_poll_count(&self, block_threshold: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT signals.model_id) AS n FROM signals \
             LEFT JOIN block ON signals.chat_id = block.chat_id \
                  AND signals.endpoint = block.endpoint \
             WHERE block.block IS NULL OR block.block < ?",
        )
        .bind(block_threshold)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    pub async fn heavy_users_count(
        &self,
        endpoint: &str,
        at_least: i64,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM ( \
                SELECT 1 FROM signals \
                LEFT JOIN block ON signals.chat_id = block.chat_id \
                     AND signals.endpoint = block.endpoint \
                WHERE (block.block IS NULL OR block.block = 0) AND signals.endpoint = ? \
                GROUP BY signals.chat_id HAVING COUNT(*) >= ?)",
        )
        .bind(endpoint)
        .bind(at_least)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }
}
