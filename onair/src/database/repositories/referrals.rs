//! Referral repository.

use rand::RngExt;
use sqlx::Row;

use crate::Result;
use crate::database::DbPool;

pub struct ReferralRepository {
    pool: DbPool,
}

impl ReferralRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn referral_id(&self, chat_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT referral_id FROM referrals WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("referral_id")))
    }

    pub async fn chat_for_referral_id(&self, referral_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT chat_id FROM referrals WHERE referral_id = ?")
            .bind(referral_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("chat_id")))
    }

    /// Existing referral ID for a chat, minting a fresh unique one if needed.
    pub async fn ensure_referral_id(&self, chat_id: i64) -> Result<String> {
        if let Some(id) = self.referral_id(chat_id).await? {
            return Ok(id);
        }
        loop {
            let candidate = random_referral_id();
            if self.chat_for_referral_id(&candidate).await?.is_none() {
                sqlx::query("INSERT INTO referrals (chat_id, referral_id) VALUES (?, ?)")
                    .bind(chat_id)
                    .bind(&candidate)
                    .execute(&self.pool)
                    .await?;
                return Ok(candidate);
            }
        }
    }

    pub async fn increment_referred(&self, chat_id: i64) -> Result<()> {
        sqlx::query("UPDATE referrals SET referred_users = referred_users + 1 WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn increment_model_referred(&self, model_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO models (model_id) VALUES (?)")
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE models SET referred_users = referred_users + 1 WHERE model_id = ?")
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_referrals_sum(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(referred_users), 0) AS n FROM referrals")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn model_referrals_sum(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(referred_users), 0) AS n FROM models")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn random_referral_id() -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..5)
        .map(|_| LETTERS[rng.random_range(0..LETTERS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::testing;

    #[tokio::test]
    async fn referral_ids_are_stable_per_chat() {
        let pool = testing::pool().await;
        let repo = ReferralRepository::new(pool);

        let id = repo.ensure_referral_id(1).await.unwrap();
        assert_eq!(id.len(), 5);
        assert_eq!(repo.ensure_referral_id(1).await.unwrap(), id);
        assert_eq!(repo.chat_for_referral_id(&id).await.unwrap(), Some(1));
        assert_eq!(repo.chat_for_referral_id("nope!").await.unwrap(), None);

        repo.increment_referred(1).await.unwrap();
        repo.increment_referred(1).await.unwrap();
        assert_eq!(repo.user_referrals_sum().await.unwrap(), 2);

        repo.increment_model_referred("alice").await.unwrap();
        assert_eq!(repo.model_referrals_sum().await.unwrap(), 1);
    }
}
