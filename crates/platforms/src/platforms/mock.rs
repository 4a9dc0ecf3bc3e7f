//! In-process mock platform for tests and local development.
//!
//! Snapshots are scripted ahead of time; each poll pops the next one, and the
//! last snapshot repeats once the script runs out. Model probes answer from
//! the current snapshot.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::Result;
use crate::poller::OnlinePoller;
use crate::status::{OnlineModel, Snapshot, StatusKind};

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Snapshot>,
    current: Snapshot,
}

#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a snapshot of online model IDs for a future poll.
    pub fn push_snapshot<I, S>(&self, online: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let snapshot = online.into_iter().map(|id| OnlineModel::new(id)).collect();
        self.state.lock().unwrap().script.push_back(snapshot);
    }
}

#[async_trait]
impl OnlinePoller for MockPlatform {
    fn platform_name(&self) -> &'static str {
        "mock"
    }

    async fn online_models(&self) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        if let Some(next) = state.script.pop_front() {
            state.current = next;
        }
        Ok(state.current.clone())
    }

    async fn check_model(&self, model_id: &str) -> Result<StatusKind> {
        let state = self.state.lock().unwrap();
        Ok(if state.current.iter().any(|m| m.model_id == model_id) {
            StatusKind::Online
        } else {
            StatusKind::Offline
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_snapshots_pop_in_order_then_repeat() {
        let mock = MockPlatform::new();
        mock.push_snapshot(["a", "b"]);
        mock.push_snapshot(["b"]);

        let first = mock.online_models().await.unwrap();
        assert_eq!(first.len(), 2);
        let second = mock.online_models().await.unwrap();
        assert_eq!(second.len(), 1);
        // Script exhausted: last snapshot repeats.
        let third = mock.online_models().await.unwrap();
        assert_eq!(third, second);

        assert_eq!(mock.check_model("b").await.unwrap(), StatusKind::Online);
        assert_eq!(mock.check_model("a").await.unwrap(), StatusKind::Offline);
    }
}
