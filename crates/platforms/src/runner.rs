//! Polling runner task.
//!
//! Platform queries run on their own task so a slow or wedged upstream never
//! blocks the consumer. The consumer requests a poll by sending a
//! [`PollRequest`]; the runner paces actual platform queries to the configured
//! minimum interval and answers with a [`PollOutcome`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::poller::OnlinePoller;
use crate::status::Snapshot;

/// Request for one poll cycle.
#[derive(Debug, Default)]
pub struct PollRequest;

/// Result of one poll cycle.
#[derive(Debug)]
pub enum PollOutcome {
    /// The platform answered; the complete online set and query latency.
    Snapshot { models: Snapshot, elapsed: Duration },
    /// The platform query failed; the consumer tracks the error rate.
    Error,
}

/// Channel pair connecting the consumer to the runner task.
pub struct PollerHandle {
    pub requests: PollRequester,
    pub outcomes: mpsc::Receiver<PollOutcome>,
}

/// Request side of the runner; cheap to clone.
#[derive(Clone)]
pub struct PollRequester {
    requests: mpsc::Sender<PollRequest>,
}

impl PollRequester {
    /// Request a poll without blocking; a cycle already in flight absorbs the
    /// request.
    pub fn request_poll(&self) {
        if self.requests.try_send(PollRequest).is_err() {
            debug!("poll request dropped: a cycle is already queued");
        }
    }
}

/// Owns the polling loop for one platform.
pub struct PollerRunner {
    poller: Arc<dyn OnlinePoller>,
    min_interval: Duration,
    cancel: CancellationToken,
}

impl PollerRunner {
    pub fn new(
        poller: Arc<dyn OnlinePoller>,
        min_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            poller,
            min_interval,
            cancel,
        }
    }

    /// Spawn the runner task and return the consumer-side handle.
    pub fn spawn(self) -> PollerHandle {
        let (request_tx, mut request_rx) = mpsc::channel::<PollRequest>(1);
        let (outcome_tx, outcome_rx) = mpsc::channel::<PollOutcome>(4);

        tokio::spawn(async move {
            info!(platform = self.poller.platform_name(), "poller runner started");
            let mut last_query: Option<Instant> = None;
            loop {
                let request = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    request = request_rx.recv() => request,
                };
                if request.is_none() {
                    break;
                }
                if let Some(last) = last_query {
                    let since = last.elapsed();
                    if since < self.min_interval {
                        tokio::time::sleep(self.min_interval - since).await;
                    }
                }
                last_query = Some(Instant::now());

                let started = Instant::now();
                let outcome = match self.poller.online_models().await {
                    Ok(models) => {
                        debug!(
                            platform = self.poller.platform_name(),
                            online = models.len(),
                            "poll cycle completed"
                        );
                        PollOutcome::Snapshot {
                            models,
                            elapsed: started.elapsed(),
                        }
                    }
                    Err(e) => {
                        warn!(platform = self.poller.platform_name(), "poll cycle failed: {e}");
                        PollOutcome::Error
                    }
                };
                if outcome_tx.send(outcome).await.is_err() {
                    break;
                }
            }
            info!(platform = self.poller.platform_name(), "poller runner stopped");
        });

        PollerHandle {
            requests: PollRequester {
                requests: request_tx,
            },
            outcomes: outcome_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::MockPlatform;

    #[tokio::test]
    async fn runner_answers_requests_and_stops_on_cancel() {
        let mock = Arc::new(MockPlatform::new());
        mock.push_snapshot(["a", "b", "c"]);

        let cancel = CancellationToken::new();
        let runner = PollerRunner::new(mock, Duration::from_millis(0), cancel.clone());
        let mut handle = runner.spawn();

        handle.requests.request_poll();
        match handle.outcomes.recv().await.unwrap() {
            PollOutcome::Snapshot { models, .. } => assert_eq!(models.len(), 3),
            PollOutcome::Error => panic!("expected a snapshot"),
        }

        cancel.cancel();
        handle.requests.request_poll();
        // After cancellation the runner exits and the outcome side closes.
        assert!(handle.outcomes.recv().await.is_none());
    }
}
