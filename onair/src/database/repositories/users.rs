//! User repository.

use sqlx::Row;
use uuid::Uuid;

use crate::Result;
use crate::database::DbPool;
use crate::database::models::UserRow;

pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, chat_id: i64) -> Result<Option<UserRow>> {
        let user = sqlx::query_as::<_, UserRow>(
            "SELECT chat_id, max_models, reports, blacklist, show_images, \
                    offline_notifications FROM users WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Register a chat on first contact; also provisions its inbox address.
    /// Idempotent.
    pub async fn ensure(&self, endpoint: &str, chat_id: i64, max_models: i32) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO users (chat_id, max_models) VALUES (?, ?)")
            .bind(chat_id)
            .bind(max_models)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT OR IGNORE INTO emails (endpoint, chat_id, email) VALUES (?, ?, ?)")
            .bind(endpoint)
            .bind(chat_id)
            .bind(Uuid::new_v4().to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_max_models(&self, chat_id: i64, max_models: i32) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (chat_id, max_models) VALUES (?, ?) \
             ON CONFLICT (chat_id) DO UPDATE SET max_models = excluded.max_models",
        )
        .bind(chat_id)
        .bind(max_models)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn credit_max_models(&self, chat_id: i64, amount: i32) -> Result<()> {
        sqlx::query("UPDATE users SET max_models = max_models + ? WHERE chat_id = ?")
            .bind(amount)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn increment_reports(&self, chat_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET reports = reports + 1 WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_show_images(&self, chat_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE users SET show_images = ? WHERE chat_id = ?")
            .bind(enabled)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_offline_notifications(&self, chat_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE users SET offline_notifications = ? WHERE chat_id = ?")
            .bind(enabled)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_blacklisted(&self, chat_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET blacklist = 1 WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn reports_sum(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(reports), 0) AS n FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn record_feedback(&self, endpoint: &str, chat_id: i64, text: &str) -> Result<()> {
        sqlx::query("INSERT INTO feedback (endpoint, chat_id, text) VALUES (?, ?, ?)")
            .bind(endpoint)
            .bind(chat_id)
            .bind(text)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The chat bound to an inbox address, if any.
    pub async fn chat_for_email(&self, email: &str) -> Result<Option<(String, i64)>> {
        let row = sqlx::query("SELECT endpoint, chat_id FROM emails WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| (row.get("endpoint"), row.get("chat_id"))))
    }

    pub async fn email_for_chat(&self, endpoint: &str, chat_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT email FROM emails WHERE endpoint = ? AND chat_id = ?")
            .bind(endpoint)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("email")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::testing;

    #[tokio::test]
    async fn ensure_is_idempotent_and_preferences_stick() {
        let pool = testing::pool().await;
        let repo = UserRepository::new(pool);

        repo.ensure("main", 42, 5).await.unwrap();
        repo.ensure("main", 42, 99).await.unwrap();

        let user = repo.get(42).await.unwrap().unwrap();
        assert_eq!(user.max_models, 5);
        assert!(user.show_images);
        assert!(!user.offline_notifications);

        repo.set_offline_notifications(42, true).await.unwrap();
        repo.set_show_images(42, false).await.unwrap();
        repo.credit_max_models(42, 10).await.unwrap();

        let user = repo.get(42).await.unwrap().unwrap();
        assert!(user.offline_notifications);
        assert!(!user.show_images);
        assert_eq!(user.max_models, 15);

        let email = repo.email_for_chat("main", 42).await.unwrap().unwrap();
        let bound = repo.chat_for_email(&email).await.unwrap().unwrap();
        assert_eq!(bound, ("main".to_string(), 42));
    }
}
