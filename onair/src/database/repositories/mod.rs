//! Repositories over the SQLite schema, one per aggregate.

mod block;
mod interactions;
mod referrals;
mod statuses;
mod subscriptions;
mod transactions;
mod users;

pub use block::BlockRepository;
pub use interactions::InteractionRepository;
pub use referrals::ReferralRepository;
pub use statuses::StatusRepository;
pub use subscriptions::SubscriptionRepository;
pub use transactions::TransactionRepository;
pub use users::UserRepository;

#[cfg(test)]
pub(crate) mod testing {
    use crate::database::DbPool;
    use sqlx::sqlite::SqlitePoolOptions;

    /// In-memory pool for repository tests. A single connection keeps the
    /// `:memory:` database alive and shared across queries.
    pub async fn pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }
}
