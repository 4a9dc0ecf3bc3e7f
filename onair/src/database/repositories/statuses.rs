//! Status history repository: the append-only flip log, the last-flip cache
//! table, and the confirmed model statuses.

use std::collections::{HashMap, HashSet};

use platforms_poller::StatusKind;
use sqlx::Row;

use crate::Result;
use crate::confirm::TickOutcome;
use crate::database::DbPool;
use crate::database::models::StatusChange;

pub struct StatusRepository {
    pool: DbPool,
}

impl StatusRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Last raw flip per model, for engine hydration.
    pub async fn load_last_statuses(&self) -> Result<HashMap<String, StatusChange>> {
        let rows = sqlx::query("SELECT model_id, status, timestamp FROM last_status_changes")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get::<String, _>("model_id"),
                    StatusChange {
                        status: StatusKind::from_i32(row.get("status")),
                        timestamp: row.get("timestamp"),
                    },
                )
            })
            .collect())
    }

    /// Confirmed-online and special model sets, for engine/orchestrator boot.
    pub async fn load_confirmed(&self) -> Result<(HashSet<String>, HashSet<String>)> {
        let rows = sqlx::query("SELECT model_id, status, special FROM models")
            .fetch_all(&self.pool)
            .await?;
        let mut online = HashSet::new();
        let mut special = HashSet::new();
        for row in rows {
            let model_id: String = row.get("model_id");
            if StatusKind::from_i32(row.get("status")) == StatusKind::Online {
                online.insert(model_id.clone());
            }
            if row.get::<bool, _>("special") {
                special.insert(model_id);
            }
        }
        Ok((online, special))
    }

    /// Persist one tick's outcome in a single transaction.
    ///
    /// A failed write rolls the whole tick back; partial confirmation is
    /// never observable.
    pub async fn persist_tick(&self, outcome: &TickOutcome) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (model_id, change) in &outcome.appended {
            sqlx::query("INSERT INTO status_changes (model_id, status, timestamp) VALUES (?, ?, ?)")
                .bind(model_id)
                .bind(change.status.as_i32())
                .bind(change.timestamp)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO last_status_changes (model_id, status, timestamp) VALUES (?, ?, ?) \
                 ON CONFLICT (model_id) DO UPDATE SET status = excluded.status, \
                 timestamp = excluded.timestamp",
            )
            .bind(model_id)
            .bind(change.status.as_i32())
            .bind(change.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        for transition in &outcome.confirmed {
            sqlx::query(
                "INSERT INTO models (model_id, status) VALUES (?, ?) \
                 ON CONFLICT (model_id) DO UPDATE SET status = excluded.status",
            )
            .bind(&transition.model_id)
            .bind(transition.status.as_i32())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Register a model with an initial confirmed status (first subscription).
    pub async fn upsert_model_status(&self, model_id: &str, status: StatusKind) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO models (model_id, status) VALUES (?, ?)")
            .bind(model_id)
            .bind(status.as_i32())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every model we watch; the raw snapshot is intersected with this set so
    /// the whole platform's online list never floods the engine.
    pub async fn tracked_models(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT model_id FROM models")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("model_id")).collect())
    }

    pub async fn special_models_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM models WHERE special = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn confirmed_status(&self, model_id: &str) -> Result<Option<StatusKind>> {
        let row = sqlx::query("SELECT status FROM models WHERE model_id = ?")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| StatusKind::from_i32(row.get("status"))))
    }

    pub async fn model_known(&self, model_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM models WHERE model_id = ?")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Mark a model as special (polled regardless of subscriber block state).
    pub async fn set_special(&self, model_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO models (model_id, special) VALUES (?, 1) \
             ON CONFLICT (model_id) DO UPDATE SET special = 1",
        )
        .bind(model_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// When the model's latest online span began and ended (0 = still open),
    /// used for the "last seen" part of notifications and listings.
    pub async fn last_seen_info(&self, model_id: &str) -> Result<Option<(i64, i64)>> {
        let row = sqlx::query(
            "SELECT timestamp, ended FROM ( \
                SELECT *, LEAD(timestamp) OVER (ORDER BY timestamp) AS ended \
                FROM status_changes WHERE model_id = ?) \
             WHERE status = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(model_id)
        .bind(StatusKind::Online.as_i32())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| {
            (
                row.get::<i64, _>("timestamp"),
                row.get::<Option<i64>, _>("ended").unwrap_or(0),
            )
        }))
    }

    /// Hour-granularity online histogram for the trailing seven days, oldest
    /// hour first, plus the window start timestamp.
    pub async fn week(&self, model_id: &str, now: i64) -> Result<(Vec<bool>, i64)> {
        let week_start = (now - now % 86_400) - 6 * 86_400;
        let rows = sqlx::query(
            "SELECT status, timestamp, prev_status, prev_timestamp FROM ( \
                SELECT *, LAG(status) OVER (ORDER BY timestamp) AS prev_status, \
                       LAG(timestamp) OVER (ORDER BY timestamp) AS prev_timestamp \
                FROM status_changes WHERE model_id = ?) \
             WHERE timestamp >= ? ORDER BY timestamp",
        )
        .bind(model_id)
        .bind(week_start)
        .fetch_all(&self.pool)
        .await?;

        let mut changes: Vec<(StatusKind, i64)> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if i == 0 {
                // The span that was already open when the window started.
                if let (Some(status), Some(_)) = (
                    row.get::<Option<i32>, _>("prev_status"),
                    row.get::<Option<i64>, _>("prev_timestamp"),
                ) {
                    changes.push((StatusKind::from_i32(status), week_start));
                }
            }
            changes.push((
                StatusKind::from_i32(row.get("status")),
                row.get("timestamp"),
            ));
        }
        changes.push((StatusKind::Unknown, now));

        let mut hours = vec![false; ((now - week_start + 3599) / 3600) as usize];
        for pair in changes.windows(2) {
            let ((status, begin), (_, end)) = (pair[0], pair[1]);
            if status != StatusKind::Online {
                continue;
            }
            let first = ((begin - week_start).max(0) / 3600) as usize;
            let last = (((end - week_start + 3599) / 3600) as usize).min(hours.len());
            for slot in hours.iter_mut().take(last).skip(first) {
                *slot = true;
            }
        }
        Ok((hours, week_start))
    }

    pub async fn status_changes_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM status_changes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmedTransition;
    use crate::database::repositories::testing;

    fn tick(appends: &[(&str, StatusKind, i64)], confirmed: &[(&str, StatusKind)]) -> TickOutcome {
        TickOutcome {
            appended: appends
                .iter()
                .map(|(id, status, ts)| {
                    (
                        id.to_string(),
                        StatusChange {
                            status: *status,
                            timestamp: *ts,
                        },
                    )
                })
                .collect(),
            confirmed: confirmed
                .iter()
                .map(|(id, status)| ConfirmedTransition {
                    model_id: id.to_string(),
                    status: *status,
                })
                .collect(),
            changes: appends.len(),
        }
    }

    #[tokio::test]
    async fn persist_tick_round_trips_through_hydration_queries() {
        let pool = testing::pool().await;
        let repo = StatusRepository::new(pool);

        repo.persist_tick(&tick(
            &[("a", StatusKind::Online, 100), ("b", StatusKind::Offline, 100)],
            &[("a", StatusKind::Online)],
        ))
        .await
        .unwrap();
        repo.persist_tick(&tick(&[("a", StatusKind::Offline, 200)], &[]))
            .await
            .unwrap();

        let last = repo.load_last_statuses().await.unwrap();
        assert_eq!(last["a"].status, StatusKind::Offline);
        assert_eq!(last["a"].timestamp, 200);
        assert_eq!(last["b"].status, StatusKind::Offline);

        let (online, special) = repo.load_confirmed().await.unwrap();
        assert!(online.contains("a"));
        assert!(special.is_empty());
        assert_eq!(repo.status_changes_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn last_seen_reports_the_latest_online_span() {
        let pool = testing::pool().await;
        let repo = StatusRepository::new(pool);
        repo.persist_tick(&tick(
            &[("m", StatusKind::Online, 1000)],
            &[],
        ))
        .await
        .unwrap();
        repo.persist_tick(&tick(&[("m", StatusKind::Offline, 2000)], &[]))
            .await
            .unwrap();

        let (begin, end) = repo.last_seen_info("m").await.unwrap().unwrap();
        assert_eq!((begin, end), (1000, 2000));
        assert!(repo.last_seen_info("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn week_marks_online_hours() {
        let pool = testing::pool().await;
        let repo = StatusRepository::new(pool);
        let now = 86_400 * 10; // midnight, ten days in
        let week_start = (now - now % 86_400) - 6 * 86_400;

        // Online for the first two hours of the window.
        repo.persist_tick(&tick(&[("m", StatusKind::Online, week_start)], &[]))
            .await
            .unwrap();
        repo.persist_tick(&tick(
            &[("m", StatusKind::Offline, week_start + 2 * 3600)],
            &[],
        ))
        .await
        .unwrap();

        let (hours, start) = repo.week("m", now).await.unwrap();
        assert_eq!(start, week_start);
        assert!(hours[0] && hours[1]);
        assert!(!hours[2]);
        // `now` is exactly midnight, so the window spans six whole days.
        assert_eq!(hours.len(), 6 * 24);
    }
}
