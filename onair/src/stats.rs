//! Operational counters and the /stat snapshot.

use serde::Serialize;

/// Rolling window of success/failure marks for poll and download attempts.
///
/// A fixed-size circular buffer of bools; `count()` is the number of failures
/// currently inside the window.
pub struct ErrorRing {
    slots: Vec<bool>,
    next: usize,
    failures: usize,
}

impl ErrorRing {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "error window must not be empty");
        Self {
            slots: vec![false; size],
            next: 0,
            failures: 0,
        }
    }

    pub fn push(&mut self, failed: bool) {
        if self.slots[self.next] {
            self.failures -= 1;
        }
        self.slots[self.next] = failed;
        if failed {
            self.failures += 1;
        }
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Failures inside the current window.
    pub fn count(&self) -> usize {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// JSON body served by `/stat`.
#[derive(Debug, Default, Serialize)]
pub struct Stat {
    pub users_count: i64,
    pub groups_count: i64,
    pub active_users_count: i64,
    pub heavy_users_count: i64,
    pub models_count: i64,
    pub models_to_poll_count: i64,
    pub online_models_count: usize,
    pub known_models_count: usize,
    pub special_models_count: i64,
    pub status_changes_count: i64,
    pub transactions_on_endpoint_count: i64,
    pub transactions_on_endpoint_finished_count: i64,
    pub reports_count: i64,
    pub user_referrals_count: i64,
    pub model_referrals_count: i64,

    pub queries_duration_milliseconds: i64,
    pub updates_duration_milliseconds: i64,
    pub error_rate: (usize, usize),
    pub download_error_rate: (usize, usize),
    pub rss_kib: u64,

    /// Raw and confirmed status flips seen during the last stat period.
    pub changes_in_period: usize,
    pub confirmed_changes_in_period: usize,

    /// Delivery outcome code -> count over the last 24 hours.
    pub interactions_by_result: Vec<(i64, i64)>,

    pub high_lane_depth: usize,
    pub low_lane_depth: usize,
}

/// Resident set size of this process, in KiB. Zero if the process cannot be
/// inspected.
pub fn rss_kib() -> u64 {
    let pid = sysinfo::Pid::from_u32(std::process::id());
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .map(|p| p.memory() / 1024)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_counts_zero() {
        let ring = ErrorRing::new(10);
        assert_eq!(ring.count(), 0);
    }

    #[test]
    fn count_tracks_failures_in_window() {
        let mut ring = ErrorRing::new(3);
        ring.push(true);
        ring.push(false);
        ring.push(true);
        assert_eq!(ring.count(), 2);
    }

    #[test]
    fn old_failures_fall_out_of_the_window() {
        let mut ring = ErrorRing::new(2);
        ring.push(true);
        ring.push(true);
        assert_eq!(ring.count(), 2);
        ring.push(false); // overwrites the first failure
        assert_eq!(ring.count(), 1);
        ring.push(false);
        assert_eq!(ring.count(), 0);
    }

    #[test]
    fn count_never_exceeds_window_size() {
        let mut ring = ErrorRing::new(4);
        for _ in 0..100 {
            ring.push(true);
        }
        assert_eq!(ring.count(), 4);
    }
}
