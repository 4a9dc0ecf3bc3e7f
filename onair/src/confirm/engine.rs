use std::collections::{HashMap, HashSet};

use platforms_poller::StatusKind;

use crate::config::ConfirmationSeconds;
use crate::database::models::StatusChange;

/// One confirmed status transition, the unit that drives notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTransition {
    pub model_id: String,
    /// The *new* confirmed status.
    pub status: StatusKind,
}

/// Everything one tick changed, for batch persistence.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// New history records, in append order.
    pub appended: Vec<(String, StatusChange)>,
    /// Models whose confirmed status changed this tick.
    pub confirmed: Vec<ConfirmedTransition>,
    /// Raw flip candidates observed this tick (for the /stat counters).
    pub changes: usize,
}

/// Debounced status-confirmation state machine.
///
/// Owns the raw-status cache (`site_statuses` / `site_online`) and the
/// confirmed-online set. Only the orchestrator calls into it, so none of this
/// needs synchronization.
pub struct ConfirmationEngine {
    durations: ConfirmationSeconds,
    /// Last logged raw flip per model.
    site_statuses: HashMap<String, StatusChange>,
    /// Models whose last raw status is online.
    site_online: HashSet<String>,
    /// Models whose *confirmed* status is online.
    confirmed_online: HashSet<String>,
}

impl ConfirmationEngine {
    pub fn new(durations: ConfirmationSeconds) -> Self {
        Self {
            durations,
            site_statuses: HashMap::new(),
            site_online: HashSet::new(),
            confirmed_online: HashSet::new(),
        }
    }

    /// Rebuild the caches from persisted state on boot.
    pub fn hydrate(
        &mut self,
        last_statuses: HashMap<String, StatusChange>,
        confirmed_online: HashSet<String>,
    ) {
        self.site_online = last_statuses
            .iter()
            .filter(|(_, change)| change.status == StatusKind::Online)
            .map(|(id, _)| id.clone())
            .collect();
        self.site_statuses = last_statuses;
        self.confirmed_online = confirmed_online;
    }

    /// Record one raw observation for a model.
    ///
    /// Appends a history record only when the status differs from the last
    /// logged one; repeated same-state observations leave the original flip
    /// timestamp in place, so the confirmation window keeps counting from the
    /// first occurrence of the state.
    fn observe(&mut self, outcome: &mut TickOutcome, model_id: &str, status: StatusKind, now: i64) {
        let last = self.site_statuses.get(model_id).map(|change| change.status);
        if last == Some(status) {
            return;
        }
        let change = StatusChange {
            status,
            timestamp: now,
        };
        outcome.appended.push((model_id.to_string(), change));
        self.site_statuses.insert(model_id.to_string(), change);
        if status == StatusKind::Online {
            self.site_online.insert(model_id.to_string());
        } else {
            self.site_online.remove(model_id);
        }
    }

    /// Apply one poll snapshot and return everything it changed.
    ///
    /// Models absent from both the snapshot and the previous raw-online set
    /// are untouched; the flip candidates are exactly the symmetric
    /// difference of the two sets.
    pub fn apply_snapshot(&mut self, live_now: &HashSet<String>, now: i64) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let candidates: Vec<String> = self
            .site_online
            .symmetric_difference(live_now)
            .cloned()
            .collect();
        outcome.changes = candidates.len();

        for model_id in candidates {
            let status = if live_now.contains(&model_id) {
                StatusKind::Online
            } else {
                StatusKind::Offline
            };
            self.observe(&mut outcome, &model_id, status, now);
        }

        self.confirm(&mut outcome, now);
        outcome
    }

    /// Promote raw states that have held for their configured window.
    fn confirm(&mut self, outcome: &mut TickOutcome, now: i64) {
        let disagreeing: Vec<String> = self
            .confirmed_online
            .symmetric_difference(&self.site_online)
            .cloned()
            .collect();

        for model_id in disagreeing {
            let Some(change) = self.site_statuses.get(&model_id) else {
                continue;
            };
            let window = self.durations.for_status(change.status);
            if window == 0 || now - change.timestamp >= window {
                if change.status == StatusKind::Online {
                    self.confirmed_online.insert(model_id.clone());
                } else {
                    self.confirmed_online.remove(&model_id);
                }
                outcome.confirmed.push(ConfirmedTransition {
                    model_id,
                    status: change.status,
                });
            }
        }
    }

    pub fn is_confirmed_online(&self, model_id: &str) -> bool {
        self.confirmed_online.contains(model_id)
    }

    pub fn confirmed_online_count(&self) -> usize {
        self.confirmed_online.len()
    }

    pub fn known_models_count(&self) -> usize {
        self.site_statuses.len()
    }

    /// Last logged raw flip for a model, if any.
    pub fn last_status(&self, model_id: &str) -> Option<StatusChange> {
        self.site_statuses.get(model_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn engine(online_window: i64) -> ConfirmationEngine {
        ConfirmationEngine::new(ConfirmationSeconds {
            online: online_window,
            offline: 0,
            not_found: 0,
            denied: 0,
        })
    }

    fn live(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn zero_window_confirms_immediately() {
        let mut engine = engine(0);
        let outcome = engine.apply_snapshot(&live(&["m"]), 0);
        assert_eq!(outcome.changes, 1);
        assert_eq!(outcome.appended.len(), 1);
        assert_eq!(
            outcome.confirmed,
            vec![ConfirmedTransition {
                model_id: "m".into(),
                status: StatusKind::Online
            }]
        );
        assert!(engine.is_confirmed_online("m"));
    }

    #[rstest]
    #[case(59, false)]
    #[case(60, true)]
    #[case(61, true)]
    fn online_window_is_inclusive_at_the_boundary(#[case] at: i64, #[case] confirmed: bool) {
        let mut engine = engine(60);
        let outcome = engine.apply_snapshot(&live(&["m"]), 0);
        assert!(outcome.confirmed.is_empty());

        let outcome = engine.apply_snapshot(&live(&["m"]), at);
        assert_eq!(outcome.confirmed.is_empty(), !confirmed);
        assert_eq!(engine.is_confirmed_online("m"), confirmed);
    }

    #[test]
    fn reflip_resets_the_window_to_the_new_flip() {
        let mut engine = engine(60);
        engine.apply_snapshot(&live(&["m"]), 0);
        // Goes offline before the window elapses: never confirmed online.
        let outcome = engine.apply_snapshot(&live(&[]), 30);
        assert!(outcome.confirmed.is_empty());
        assert!(!engine.is_confirmed_online("m"));
        // Back online at t=40: window restarts from 40.
        engine.apply_snapshot(&live(&["m"]), 40);
        let outcome = engine.apply_snapshot(&live(&["m"]), 99);
        assert!(outcome.confirmed.is_empty());
        let outcome = engine.apply_snapshot(&live(&["m"]), 100);
        assert_eq!(outcome.confirmed.len(), 1);
        assert!(engine.is_confirmed_online("m"));
    }

    #[test]
    fn repeated_same_state_observations_keep_the_original_timestamp() {
        let mut engine = engine(60);
        engine.apply_snapshot(&live(&["m"]), 0);
        // Same snapshot again later: no new history, window measured from 0.
        let outcome = engine.apply_snapshot(&live(&["m"]), 45);
        assert!(outcome.appended.is_empty());
        let outcome = engine.apply_snapshot(&live(&["m"]), 60);
        assert_eq!(outcome.confirmed.len(), 1);
    }

    #[test]
    fn identical_snapshot_without_time_passing_is_a_noop() {
        let mut engine = engine(0);
        let first = engine.apply_snapshot(&live(&["a", "b"]), 10);
        assert_eq!(first.appended.len(), 2);
        let second = engine.apply_snapshot(&live(&["a", "b"]), 10);
        assert_eq!(second.changes, 0);
        assert!(second.appended.is_empty());
        assert!(second.confirmed.is_empty());
    }

    #[test]
    fn consecutive_history_records_never_repeat_a_status() {
        let mut engine = engine(0);
        let mut history: Vec<StatusChange> = Vec::new();
        let snapshots: &[&[&str]] = &[&["m"], &["m"], &[], &[], &["m"], &[]];
        for (tick, snapshot) in snapshots.iter().enumerate() {
            let outcome = engine.apply_snapshot(&live(snapshot), tick as i64);
            history.extend(outcome.appended.into_iter().map(|(_, change)| change));
        }
        for pair in history.windows(2) {
            assert_ne!(pair[0].status, pair[1].status);
        }
    }

    #[test]
    fn offline_transition_confirms_with_its_own_window() {
        let mut engine = ConfirmationEngine::new(ConfirmationSeconds {
            online: 0,
            offline: 20,
            not_found: 0,
            denied: 0,
        });
        engine.apply_snapshot(&live(&["m"]), 0);
        assert!(engine.is_confirmed_online("m"));

        let outcome = engine.apply_snapshot(&live(&[]), 10);
        assert!(outcome.confirmed.is_empty());
        let outcome = engine.apply_snapshot(&live(&[]), 30);
        assert_eq!(
            outcome.confirmed,
            vec![ConfirmedTransition {
                model_id: "m".into(),
                status: StatusKind::Offline
            }]
        );
        assert!(!engine.is_confirmed_online("m"));
    }

    #[test]
    fn hydration_restores_raw_and_confirmed_state() {
        let mut engine = engine(60);
        let mut last = HashMap::new();
        last.insert(
            "a".to_string(),
            StatusChange {
                status: StatusKind::Online,
                timestamp: 100,
            },
        );
        last.insert(
            "b".to_string(),
            StatusChange {
                status: StatusKind::Offline,
                timestamp: 50,
            },
        );
        engine.hydrate(last, HashSet::from(["a".to_string()]));

        assert!(engine.is_confirmed_online("a"));
        assert_eq!(engine.known_models_count(), 2);
        // "a" already online and confirmed: a matching snapshot changes nothing.
        let outcome = engine.apply_snapshot(&live(&["a"]), 200);
        assert!(outcome.appended.is_empty());
        assert!(outcome.confirmed.is_empty());
    }
}
