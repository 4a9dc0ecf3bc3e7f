//! The event loop itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use platforms_poller::{OnlinePoller, PollOutcome, PollRequester};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::{parse_command, CommandHandler};
use crate::config::Config;
use crate::database::now_ts;
use crate::database::repositories::{
    BlockRepository, InteractionRepository, ReferralRepository, StatusRepository,
    SubscriptionRepository, TransactionRepository, UserRepository,
};
use crate::database::DbPool;
use crate::confirm::ConfirmationEngine;
use crate::delivery::{DeliveryPipeline, DeliveryResult, Lane, OutgoingMessage};
use crate::orchestrator::{fanout, Event, MailEvent};
use crate::payments::PaymentProcessor;
use crate::stats::{rss_kib, ErrorRing, Stat};
use crate::telegram::{Message, TelegramClient, USER_COMMANDS};
use crate::{Error, Result};

/// Receivers the loop drains; handed to [`Orchestrator::run`] separately so
/// the select arms and the handlers do not fight over `self`.
pub struct Channels {
    pub poll_outcomes: mpsc::Receiver<PollOutcome>,
    pub events: mpsc::Receiver<Event>,
    pub delivery_results: mpsc::Receiver<DeliveryResult>,
}

/// Everything the loop owns. Single task, no locks.
pub struct Orchestrator {
    config: Arc<Config>,
    engine: ConfirmationEngine,
    pipeline: DeliveryPipeline,
    telegram: Arc<TelegramClient>,
    commands: CommandHandler,
    payments: PaymentProcessor,
    poll_requests: PollRequester,
    http: reqwest::Client,

    statuses: StatusRepository,
    subscriptions: SubscriptionRepository,
    users: UserRepository,
    blocks: BlockRepository,
    interactions: InteractionRepository,
    referrals: ReferralRepository,
    transactions: TransactionRepository,

    /// Latest preview image URL per model, refreshed from every snapshot.
    image_urls: HashMap<String, String>,
    poll_errors: ErrorRing,
    download_errors: ErrorRing,
    changes_in_period: usize,
    confirmed_changes_in_period: usize,
    last_poll_ms: i64,
    last_update_ms: i64,
    last_error_report: i64,

    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        pool: DbPool,
        pipeline: DeliveryPipeline,
        telegram: Arc<TelegramClient>,
        poller: Arc<dyn OnlinePoller>,
        poll_requests: PollRequester,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let commands = CommandHandler {
            config: config.clone(),
            poller,
            pipeline: pipeline.clone(),
            users: UserRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            statuses: StatusRepository::new(pool.clone()),
            referrals: ReferralRepository::new(pool.clone()),
            blocks: BlockRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool.clone()),
        };
        let payments = PaymentProcessor {
            transactions: TransactionRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            pipeline: pipeline.clone(),
            admin_endpoint: config.admin_endpoint.clone(),
            admin_id: config.admin_id,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            engine: ConfirmationEngine::new(config.status_confirmation_seconds),
            poll_errors: ErrorRing::new(config.error_denominator),
            download_errors: ErrorRing::new(config.error_denominator),
            statuses: StatusRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            blocks: BlockRepository::new(pool.clone()),
            interactions: InteractionRepository::new(pool.clone()),
            referrals: ReferralRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool),
            commands,
            payments,
            config,
            pipeline,
            telegram,
            poll_requests,
            http,
            image_urls: HashMap::new(),
            changes_in_period: 0,
            confirmed_changes_in_period: 0,
            last_poll_ms: 0,
            last_update_ms: 0,
            last_error_report: 0,
            cancel,
        })
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self, channels: Channels) -> Result<()> {
        let Channels {
            mut poll_outcomes,
            mut events,
            mut delivery_results,
        } = channels;

        self.startup().await?;

        let mut tick = tokio::time::interval(Duration::from_secs(self.config.period_seconds));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => self.on_tick().await,
                Some(outcome) = poll_outcomes.recv() => self.on_poll_outcome(outcome).await,
                Some(event) = events.recv() => self.on_event(event).await,
                Some(result) = delivery_results.recv() => self.on_delivery_result(result).await,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Introduce ourselves to Telegram and hydrate the engine.
    async fn startup(&mut self) -> Result<()> {
        for name in self.config.endpoints.keys() {
            match self.telegram.get_me(name).await {
                Ok(me) => info!(endpoint = name.as_str(), bot = %me.username, "endpoint ready"),
                Err(e) => warn!(endpoint = name.as_str(), "getMe failed: {e}"),
            }
            if let Err(e) = self.telegram.set_my_commands(name, USER_COMMANDS).await {
                warn!(endpoint = name.as_str(), "setMyCommands failed: {e}");
            }
            if let Err(e) = self.telegram.set_webhook(name).await {
                warn!(endpoint = name.as_str(), "setWebhook failed: {e}");
            }
        }

        let last_statuses = self.statuses.load_last_statuses().await?;
        let (confirmed_online, _special) = self.statuses.load_confirmed().await?;
        info!(
            known = last_statuses.len(),
            online = confirmed_online.len(),
            "engine hydrated"
        );
        self.engine.hydrate(last_statuses, confirmed_online);
        Ok(())
    }

    async fn shutdown(&self) {
        info!("shutting down, removing webhooks");
        for name in self.config.endpoints.keys() {
            if let Err(e) = self.telegram.delete_webhook(name).await {
                warn!(endpoint = name.as_str(), "deleteWebhook failed: {e}");
            }
        }
    }

    async fn on_tick(&mut self) {
        self.poll_requests.request_poll();
        self.maybe_report_errors();
    }

    /// Rate-limited admin alert when the rolling error rate crosses the
    /// configured threshold.
    fn maybe_report_errors(&mut self) {
        let now = now_ts();
        if now - self.last_error_report < self.config.error_reporting_period_minutes * 60 {
            return;
        }
        let polls = self.poll_errors.count();
        let downloads = self.download_errors.count();
        if polls < self.config.error_threshold && downloads < self.config.error_threshold {
            return;
        }
        self.last_error_report = now;
        self.pipeline.enqueue(
            Lane::High,
            OutgoingMessage::text(
                &self.config.admin_endpoint,
                self.config.admin_id,
                format!(
                    "High error rate: {polls}/{} poll errors, {downloads}/{} download errors",
                    self.poll_errors.len(),
                    self.download_errors.len()
                ),
            ),
        );
    }

    async fn on_poll_outcome(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Error => self.poll_errors.push(true),
            PollOutcome::Snapshot { models, elapsed } => {
                self.poll_errors.push(false);
                self.last_poll_ms = elapsed.as_millis() as i64;
                if let Err(e) = self.apply_snapshot(models).await {
                    error!("tick failed: {e}");
                    // The engine may have advanced past what the store
                    // recorded; rebuild it so the next tick starts clean.
                    if let Err(e) = self.rehydrate().await {
                        error!("engine rehydration failed: {e}");
                    }
                }
            }
        }
    }

    async fn apply_snapshot(&mut self, models: platforms_poller::Snapshot) -> Result<()> {
        let started = std::time::Instant::now();

        for model in &models {
            if let Some(url) = &model.image_url {
                self.image_urls.insert(model.model_id.clone(), url.clone());
            }
        }

        // The platform reports its whole online list; only watched models
        // feed the engine.
        let tracked = self.statuses.tracked_models().await?;
        let live_now: HashSet<String> = models
            .into_iter()
            .map(|model| model.model_id)
            .filter(|model_id| tracked.contains(model_id))
            .collect();

        let outcome = self.engine.apply_snapshot(&live_now, now_ts());
        self.statuses.persist_tick(&outcome).await?;
        self.changes_in_period += outcome.changes;
        self.confirmed_changes_in_period += outcome.confirmed.len();

        if !outcome.confirmed.is_empty() {
            debug!(confirmed = outcome.confirmed.len(), "confirmed transitions");
            let targets = self
                .subscriptions
                .notify_targets(self.config.block_threshold)
                .await?;
            let planned = fanout::plan_notifications(
                &outcome.confirmed,
                &targets,
                self.config.offline_notifications,
            );
            let marks =
                fanout::dispatch(&self.pipeline, &self.http, &planned, &self.image_urls).await;
            for (model_id, failed) in marks {
                if failed {
                    debug!(%model_id, "image download failed");
                }
                self.download_errors.push(failed);
            }
            for notification in &planned {
                self.users.increment_reports(notification.chat_id).await?;
            }
        }

        self.last_update_ms = started.elapsed().as_millis() as i64;
        Ok(())
    }

    async fn rehydrate(&mut self) -> Result<()> {
        let last_statuses = self.statuses.load_last_statuses().await?;
        let (confirmed_online, _special) = self.statuses.load_confirmed().await?;
        self.engine = ConfirmationEngine::new(self.config.status_confirmation_seconds);
        self.engine.hydrate(last_statuses, confirmed_online);
        Ok(())
    }

    async fn on_event(&mut self, event: Event) {
        match event {
            Event::ChatUpdate { endpoint, update } => {
                if let Some(message) = update.message {
                    if let Err(e) = self.on_chat_message(&endpoint, &message).await {
                        error!(endpoint = endpoint.as_str(), chat_id = message.chat.id, "update failed: {e}");
                    }
                }
                if let Some(callback) = update.callback_query {
                    if let Err(e) = self
                        .telegram
                        .answer_callback_query(&endpoint, &callback.id)
                        .await
                    {
                        debug!("answerCallbackQuery failed: {e}");
                    }
                    if let Some(message) = callback.into_command_message() {
                        if let Err(e) = self.on_chat_message(&endpoint, &message).await {
                            error!(endpoint = endpoint.as_str(), chat_id = message.chat.id, "callback failed: {e}");
                        }
                    }
                }
            }
            Event::Mail(mail) => {
                if let Err(e) = self.on_mail(&mail).await {
                    error!("mail event failed: {e}");
                }
            }
            Event::Stat { reply } => {
                let stat = match self.snapshot_stat().await {
                    Ok(stat) => stat,
                    Err(e) => {
                        error!("stat collection failed: {e}");
                        Stat::default()
                    }
                };
                let _ = reply.send(stat);
            }
            Event::Payment { event, reply } => {
                let applied = match self.payments.apply(&event).await {
                    Ok(applied) => applied,
                    Err(e) => {
                        error!(local_id = %event.local_id, "payment event failed: {e}");
                        false
                    }
                };
                let _ = reply.send(applied);
            }
        }
    }

    async fn on_chat_message(&mut self, endpoint: &str, message: &Message) -> Result<()> {
        let is_admin =
            endpoint == self.config.admin_endpoint && message.chat.id == self.config.admin_id;
        if is_admin {
            if let Some(command) = message.text.as_deref().and_then(parse_command) {
                if command.name == "stat" {
                    let stat = self.snapshot_stat().await?;
                    self.pipeline.enqueue(
                        Lane::High,
                        OutgoingMessage::text(
                            endpoint,
                            message.chat.id,
                            serde_json::to_string_pretty(&stat)?,
                        ),
                    );
                    return Ok(());
                }
                if self
                    .commands
                    .handle_admin(endpoint, message.chat.id, command.name, command.args)
                    .await?
                {
                    return Ok(());
                }
            }
        }
        self.commands.handle(endpoint, message).await
    }

    async fn on_mail(&mut self, mail: &MailEvent) -> Result<()> {
        let Some((endpoint, chat_id)) = self.users.chat_for_email(&mail.inbox).await? else {
            debug!(inbox = %mail.inbox, "mail for an unknown inbox");
            return Ok(());
        };
        self.pipeline.enqueue(
            Lane::High,
            OutgoingMessage::text(
                &endpoint,
                chat_id,
                format!("{}\n\n{}", mail.subject, mail.text),
            ),
        );
        Ok(())
    }

    async fn on_delivery_result(&mut self, result: DeliveryResult) {
        if let Err(e) = self.interactions.record(&result).await {
            error!("interaction insert failed: {e}");
        }
        let updated = if result.outcome.is_permanent_block() {
            self.blocks.increment(&result.endpoint, result.chat_id).await
        } else if result.outcome == crate::delivery::SendOutcome::Sent {
            self.blocks.reset(&result.endpoint, result.chat_id).await
        } else {
            Ok(())
        };
        if let Err(e) = updated {
            error!(chat_id = result.chat_id, "block counter update failed: {e}");
        }
    }

    /// Gather the /stat snapshot; also resets the per-period flip counters.
    async fn snapshot_stat(&mut self) -> Result<Stat> {
        let mut stat = Stat {
            online_models_count: self.engine.confirmed_online_count(),
            known_models_count: self.engine.known_models_count(),
            special_models_count: self.statuses.special_models_count().await?,
            status_changes_count: self.statuses.status_changes_count().await?,
            active_users_count: self.subscriptions.active_users_count().await?,
            models_to_poll_count: self
                .subscriptions
                .models_to_poll_count(self.config.block_threshold)
                .await?,
            reports_count: self.users.reports_sum().await?,
            user_referrals_count: self.referrals.user_referrals_sum().await?,
            model_referrals_count: self.referrals.model_referrals_sum().await?,
            queries_duration_milliseconds: self.last_poll_ms,
            updates_duration_milliseconds: self.last_update_ms,
            error_rate: (self.poll_errors.count(), self.poll_errors.len()),
            download_error_rate: (self.download_errors.count(), self.download_errors.len()),
            rss_kib: rss_kib(),
            changes_in_period: self.changes_in_period,
            confirmed_changes_in_period: self.confirmed_changes_in_period,
            high_lane_depth: self.pipeline.depth(Lane::High),
            low_lane_depth: self.pipeline.depth(Lane::Low),
            ..Stat::default()
        };

        let heavy_floor =
            i64::from(self.config.max_models - self.config.heavy_user_remainder);
        let mut interactions: HashMap<i32, i64> = HashMap::new();
        for name in self.config.endpoints.keys() {
            stat.users_count += self.subscriptions.users_count(name).await?;
            stat.groups_count += self.subscriptions.groups_count(name).await?;
            stat.models_count += self.subscriptions.models_count(name).await?;
            stat.heavy_users_count += self
                .subscriptions
                .heavy_users_count(name, heavy_floor)
                .await?;
            stat.transactions_on_endpoint_count += self.transactions.count(name).await?;
            stat.transactions_on_endpoint_finished_count +=
                self.transactions.count_finished(name).await?;
            for (code, count) in self.interactions.histogram_24h(name, now_ts()).await? {
                *interactions.entry(code).or_default() += count;
            }
        }
        let mut histogram: Vec<(i64, i64)> = interactions
            .into_iter()
            .map(|(code, count)| (i64::from(code), count))
            .collect();
        histogram.sort_unstable();
        stat.interactions_by_result = histogram;

        self.changes_in_period = 0;
        self.confirmed_changes_in_period = 0;
        Ok(stat)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use platforms_poller::platforms::MockPlatform;
    use platforms_poller::{OnlineModel, PollerRunner, StatusKind};

    use super::*;
    use crate::database::repositories::testing;
    use crate::delivery::{MockMessageTransport, SendOutcome};

    fn test_config() -> Arc<Config> {
        Arc::new(
            serde_json::from_value(serde_json::json!({
                "platform": "mock",
                "database_url": "sqlite::memory:",
                "listen_address": "127.0.0.1:0",
                "admin_id": 1,
                "admin_endpoint": "main",
                "stat_password": "secret",
                "endpoints": {
                    "main": {"bot_token": "123:abc", "listen_path": "/tg/main"}
                }
            }))
            .unwrap(),
        )
    }

    async fn orchestrator(pool: DbPool) -> (Orchestrator, mpsc::Receiver<DeliveryResult>) {
        let config = test_config();
        let cancel = CancellationToken::new();
        let mut transport = MockMessageTransport::new();
        transport.expect_send().returning(|_| SendOutcome::Sent);
        let (results_tx, results_rx) = mpsc::channel(64);
        let pipeline = DeliveryPipeline::spawn(
            Arc::new(transport),
            64,
            results_tx,
            cancel.clone(),
        );
        let telegram = Arc::new(
            TelegramClient::new(Duration::from_secs(1), &config.endpoints).unwrap(),
        );
        let runner_handle = PollerRunner::new(
            Arc::new(MockPlatform::new()),
            Duration::from_secs(3600),
            cancel.clone(),
        )
        .spawn();
        let orchestrator = Orchestrator::new(
            config,
            pool,
            pipeline,
            telegram,
            Arc::new(MockPlatform::new()),
            runner_handle.requests,
            cancel,
        )
        .unwrap();
        (orchestrator, results_rx)
    }

    #[tokio::test]
    async fn a_confirmed_transition_bumps_the_subscriber_report_count() {
        let pool = testing::pool().await;
        let (mut orchestrator, _results) = orchestrator(pool).await;
        orchestrator
            .users
            .ensure("main", 7, 5)
            .await
            .unwrap();
        orchestrator
            .subscriptions
            .subscribe("main", 7, "alice")
            .await
            .unwrap();
        orchestrator
            .statuses
            .upsert_model_status("alice", StatusKind::Offline)
            .await
            .unwrap();

        orchestrator
            .apply_snapshot(vec![OnlineModel::new("alice")])
            .await
            .unwrap();

        let user = orchestrator.users.get(7).await.unwrap().unwrap();
        assert_eq!(user.reports, 1);
        assert_eq!(orchestrator.users.reports_sum().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn models_off_the_watch_list_do_not_reach_the_engine() {
        let pool = testing::pool().await;
        let (mut orchestrator, _results) = orchestrator(pool).await;

        orchestrator
            .apply_snapshot(vec![OnlineModel::new("stranger")])
            .await
            .unwrap();

        assert_eq!(orchestrator.engine.known_models_count(), 0);
        assert_eq!(orchestrator.statuses.status_changes_count().await.unwrap(), 0);
    }
}
