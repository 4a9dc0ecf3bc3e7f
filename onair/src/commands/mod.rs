//! Inbound chat command dispatch.
//!
//! Parsing and the thin business rules around subscriptions live here; the
//! heavy lifting (confirmation, fan-out, delivery) stays in the other
//! modules. Replies always go through the high lane so user interactions
//! stay snappy while a notification storm drains on the low lane.

use std::sync::Arc;

use platforms_poller::{OnlinePoller, StatusKind, MODEL_ID_REGEX};
use tracing::{info, warn};

use crate::config::Config;
use crate::database::repositories::{
    BlockRepository, ReferralRepository, StatusRepository, SubscriptionRepository,
    TransactionRepository, UserRepository,
};
use crate::database::now_ts;
use crate::delivery::{DeliveryPipeline, Lane, OutgoingMessage};
use crate::telegram::Message;
use crate::Result;

const HELP_TEXT: &str = "\
/add model_id — subscribe to a model\n\
/remove model_id — unsubscribe\n\
/list — your subscriptions and their statuses\n\
/online — which of your subscriptions are online now\n\
/week model_id — online hours over the last week\n\
/settings — your current settings\n\
/enable_images, /disable_images — preview photos in notifications\n\
/enable_offline_notifications, /disable_offline_notifications\n\
/feedback text — write to the author\n\
/remove_all — unsubscribe from everything";

/// Parsed `/command args` pair.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub name: &'a str,
    pub args: &'a str,
}

/// Split an inbound text into command and arguments.
///
/// Accepts a leading slash and a `@botname` suffix on the command, both
/// optional, so "add aaa", "/add aaa" and "/add@our_bot aaa" all parse the
/// same way.
pub fn parse_command(text: &str) -> Option<ParsedCommand<'_>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (head, args) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };
    let head = head.strip_prefix('/').unwrap_or(head);
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand { name, args })
}

/// Everything command handling needs, bundled for the orchestrator.
pub struct CommandHandler {
    pub config: Arc<Config>,
    pub poller: Arc<dyn OnlinePoller>,
    pub pipeline: DeliveryPipeline,
    pub users: UserRepository,
    pub subscriptions: SubscriptionRepository,
    pub statuses: StatusRepository,
    pub referrals: ReferralRepository,
    pub blocks: BlockRepository,
    pub transactions: TransactionRepository,
}

impl CommandHandler {
    fn reply(&self, endpoint: &str, chat_id: i64, text: impl Into<String>) {
        self.pipeline
            .enqueue(Lane::High, OutgoingMessage::text(endpoint, chat_id, text.into()));
    }

    /// Handle one inbound message. Unknown commands get the help text in
    /// private chats and are ignored in groups.
    pub async fn handle(&self, endpoint: &str, message: &Message) -> Result<()> {
        let chat_id = message.chat.id;
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        let Some(command) = parse_command(text) else {
            return Ok(());
        };

        if let Some(user) = self.users.get(chat_id).await? {
            if user.blacklist {
                return Ok(());
            }
        }

        info!(endpoint, chat_id, command = command.name, "command");
        match command.name {
            "start" => self.start(endpoint, chat_id, command.args).await?,
            "add" => self.add(endpoint, chat_id, command.args).await?,
            "remove" => self.remove(endpoint, chat_id, command.args).await?,
            "remove_all" => {
                self.reply(endpoint, chat_id, "Send /sure_remove_all to confirm")
            }
            "sure_remove_all" => {
                self.subscriptions.unsubscribe_all(endpoint, chat_id).await?;
                self.reply(endpoint, chat_id, "Removed all subscriptions");
            }
            "list" => self.list(endpoint, chat_id).await?,
            "online" => self.online(endpoint, chat_id).await?,
            "week" => self.week(endpoint, chat_id, command.args).await?,
            "settings" => self.settings(endpoint, chat_id).await?,
            "enable_images" => {
                self.users.set_show_images(chat_id, true).await?;
                self.reply(endpoint, chat_id, "Images enabled");
            }
            "disable_images" => {
                self.users.set_show_images(chat_id, false).await?;
                self.reply(endpoint, chat_id, "Images disabled");
            }
            "enable_offline_notifications" => {
                self.users.set_offline_notifications(chat_id, true).await?;
                self.reply(endpoint, chat_id, "Offline notifications enabled");
            }
            "disable_offline_notifications" => {
                self.users.set_offline_notifications(chat_id, false).await?;
                self.reply(endpoint, chat_id, "Offline notifications disabled");
            }
            "feedback" => self.feedback(endpoint, chat_id, command.args).await?,
            "buy" => self.buy(endpoint, chat_id).await?,
            "referral" => self.referral(endpoint, chat_id).await?,
            "help" => self.reply(endpoint, chat_id, HELP_TEXT),
            _ => {
                if message.chat.kind == "private" {
                    self.reply(endpoint, chat_id, HELP_TEXT);
                }
            }
        }
        Ok(())
    }

    /// Admin-only commands; returns false when the name is not one of them.
    pub async fn handle_admin(
        &self,
        endpoint: &str,
        chat_id: i64,
        name: &str,
        args: &str,
    ) -> Result<bool> {
        match name {
            "broadcast" => {
                // broadcast <endpoint> <text>
                let Some((target_endpoint, text)) = args.split_once(char::is_whitespace) else {
                    self.reply(endpoint, chat_id, "Usage: /broadcast endpoint text");
                    return Ok(true);
                };
                let chats = self.subscriptions.broadcast_chats(target_endpoint).await?;
                let count = chats.len();
                for chat in chats {
                    self.pipeline.enqueue(
                        Lane::Low,
                        OutgoingMessage::text(target_endpoint, chat, text.trim()),
                    );
                }
                self.reply(endpoint, chat_id, format!("Broadcasting to {count} chats"));
            }
            "direct" => {
                // direct <endpoint:chat_id> <text>
                let parsed = args
                    .split_once(char::is_whitespace)
                    .and_then(|(address, text)| {
                        let (target_endpoint, chat) = address.split_once(':')?;
                        Some((target_endpoint, chat.parse::<i64>().ok()?, text.trim()))
                    });
                let Some((target_endpoint, target_chat, text)) = parsed else {
                    self.reply(endpoint, chat_id, "Usage: /direct endpoint:chat_id text");
                    return Ok(true);
                };
                self.pipeline
                    .enqueue(Lane::High, OutgoingMessage::text(target_endpoint, target_chat, text));
                self.reply(endpoint, chat_id, "Sent");
            }
            "special" => {
                let model_id = self.poller.canonical_model_id(args);
                if !MODEL_ID_REGEX.is_match(&model_id) {
                    self.reply(endpoint, chat_id, "Invalid model ID");
                    return Ok(true);
                }
                self.statuses.set_special(&model_id).await?;
                self.reply(endpoint, chat_id, format!("{model_id} marked as special"));
            }
            "set_max_models" => {
                // set_max_models <chat_id> <n>
                let parsed = args.split_once(char::is_whitespace).and_then(|(chat, n)| {
                    Some((chat.parse::<i64>().ok()?, n.trim().parse::<i32>().ok()?))
                });
                let Some((target_chat, max_models)) = parsed else {
                    self.reply(endpoint, chat_id, "Usage: /set_max_models chat_id n");
                    return Ok(true);
                };
                self.users.set_max_models(target_chat, max_models).await?;
                self.reply(endpoint, chat_id, "Done");
            }
            "blacklist" => {
                let Ok(target_chat) = args.trim().parse::<i64>() else {
                    self.reply(endpoint, chat_id, "Usage: /blacklist chat_id");
                    return Ok(true);
                };
                self.users.set_blacklisted(target_chat).await?;
                self.reply(endpoint, chat_id, "Blacklisted");
            }
            "unblock" => {
                let Ok(target_chat) = args.trim().parse::<i64>() else {
                    self.reply(endpoint, chat_id, "Usage: /unblock chat_id");
                    return Ok(true);
                };
                self.blocks.reset(endpoint, target_chat).await?;
                self.reply(endpoint, chat_id, "Unblocked");
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    async fn start(&self, endpoint: &str, chat_id: i64, args: &str) -> Result<()> {
        let new_user = self.users.get(chat_id).await?.is_none();
        self.users
            .ensure(endpoint, chat_id, self.config.max_models)
            .await?;

        // A /start payload is either "m-<model>" (a model's own link) or a
        // user referral ID; user bonuses apply to new users only.
        let payload = args.trim();
        if let Some(model_id) = payload.strip_prefix("m-") {
            if self.subscribe_model(endpoint, chat_id, model_id).await? {
                let model_id = self.poller.canonical_model_id(model_id);
                self.referrals.increment_model_referred(&model_id).await?;
                info!(chat_id, %model_id, "model referral applied");
            }
        } else if new_user && !payload.is_empty() {
            match self.referrals.chat_for_referral_id(payload).await? {
                Some(referrer) if referrer != chat_id => {
                    self.users
                        .credit_max_models(chat_id, self.config.follower_bonus)
                        .await?;
                    self.users
                        .credit_max_models(referrer, self.config.referral_bonus)
                        .await?;
                    self.referrals.increment_referred(referrer).await?;
                    info!(chat_id, referrer, "referral applied");
                }
                Some(_) => {}
                None => warn!(chat_id, referral_id = payload, "unknown referral ID in /start"),
            }
        }
        self.reply(endpoint, chat_id, HELP_TEXT);
        Ok(())
    }

    async fn add(&self, endpoint: &str, chat_id: i64, args: &str) -> Result<()> {
        self.subscribe_model(endpoint, chat_id, args).await?;
        Ok(())
    }

    /// The /add flow; returns whether a new subscription was created.
    async fn subscribe_model(&self, endpoint: &str, chat_id: i64, args: &str) -> Result<bool> {
        let model_id = self.poller.canonical_model_id(args);
        if !MODEL_ID_REGEX.is_match(&model_id) {
            self.reply(endpoint, chat_id, "Usage: /add model_id");
            return Ok(false);
        }
        self.users
            .ensure(endpoint, chat_id, self.config.max_models)
            .await?;
        if self.subscriptions.exists(endpoint, chat_id, &model_id).await? {
            self.reply(endpoint, chat_id, format!("You are already subscribed to {model_id}"));
            return Ok(false);
        }

        let max_models = self
            .users
            .get(chat_id)
            .await?
            .map(|user| user.max_models)
            .unwrap_or(self.config.max_models);
        let subscribed = self.subscriptions.count_for_chat(endpoint, chat_id).await?;
        if subscribed >= i64::from(max_models) {
            self.reply(
                endpoint,
                chat_id,
                format!("You can watch up to {max_models} models"),
            );
            return Ok(false);
        }

        // First subscriber of a model: ask the platform before accepting.
        if !self.statuses.model_known(&model_id).await? {
            let status = match self.poller.check_model(&model_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(%model_id, "model status check failed: {e}");
                    self.reply(endpoint, chat_id, "The site did not answer, try again later");
                    return Ok(false);
                }
            };
            if !matches!(status, StatusKind::Online | StatusKind::Offline) {
                self.reply(endpoint, chat_id, format!("Model {model_id} was not found"));
                return Ok(false);
            }
            self.statuses.upsert_model_status(&model_id, status).await?;
        }

        self.subscriptions.subscribe(endpoint, chat_id, &model_id).await?;
        let status = self
            .statuses
            .confirmed_status(&model_id)
            .await?
            .unwrap_or(StatusKind::Unknown);
        let suffix = match status {
            StatusKind::Online => " She is online now".to_string(),
            _ => match self.statuses.last_seen_info(&model_id).await? {
                Some((begin, ended)) => {
                    let seen = if ended > 0 { ended } else { begin };
                    let hours = (now_ts() - seen).max(0) / 3600;
                    format!(" She was last online {hours} hours ago")
                }
                None => String::new(),
            },
        };
        self.reply(endpoint, chat_id, format!("Subscribed to {model_id}.{suffix}"));
        Ok(true)
    }

    async fn remove(&self, endpoint: &str, chat_id: i64, args: &str) -> Result<()> {
        let model_id = self.poller.canonical_model_id(args);
        if !MODEL_ID_REGEX.is_match(&model_id) {
            self.reply(endpoint, chat_id, "Usage: /remove model_id");
            return Ok(());
        }
        if !self.subscriptions.exists(endpoint, chat_id, &model_id).await? {
            self.reply(endpoint, chat_id, format!("You are not subscribed to {model_id}"));
            return Ok(());
        }
        self.subscriptions.unsubscribe(endpoint, chat_id, &model_id).await?;
        self.reply(endpoint, chat_id, format!("Unsubscribed from {model_id}"));
        Ok(())
    }

    async fn list(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        let statuses = self.subscriptions.statuses_for_chat(endpoint, chat_id).await?;
        if statuses.is_empty() {
            self.reply(endpoint, chat_id, "You have no subscriptions, try /add");
            return Ok(());
        }
        let lines: Vec<String> = statuses
            .iter()
            .map(|(model_id, status)| {
                let mark = if *status == StatusKind::Online { "●" } else { "○" };
                format!("{mark} {model_id}")
            })
            .collect();
        self.reply(endpoint, chat_id, lines.join("\n"));
        Ok(())
    }

    async fn online(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        let statuses = self.subscriptions.statuses_for_chat(endpoint, chat_id).await?;
        let online: Vec<String> = statuses
            .into_iter()
            .filter(|(_, status)| *status == StatusKind::Online)
            .map(|(model_id, _)| model_id)
            .collect();
        if online.is_empty() {
            self.reply(endpoint, chat_id, "None of your subscriptions are online");
        } else {
            self.reply(endpoint, chat_id, online.join("\n"));
        }
        Ok(())
    }

    async fn week(&self, endpoint: &str, chat_id: i64, args: &str) -> Result<()> {
        let model_id = self.poller.canonical_model_id(args);
        if !MODEL_ID_REGEX.is_match(&model_id) {
            self.reply(endpoint, chat_id, "Usage: /week model_id");
            return Ok(());
        }
        let (hours, start) = self.statuses.week(&model_id, now_ts()).await?;
        let mut lines = Vec::new();
        for day in hours.chunks(24) {
            let row: String = day
                .iter()
                .map(|online| if *online { '■' } else { '·' })
                .collect();
            lines.push(row);
        }
        lines.push(format!("hours of {model_id} being online, starting {start}"));
        self.reply(endpoint, chat_id, lines.join("\n"));
        Ok(())
    }

    async fn settings(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        self.users
            .ensure(endpoint, chat_id, self.config.max_models)
            .await?;
        let Some(user) = self.users.get(chat_id).await? else {
            return Ok(());
        };
        let subscribed = self.subscriptions.count_for_chat(endpoint, chat_id).await?;
        let mut text = format!(
            "Subscriptions: {subscribed} of {}\nImages: {}\nOffline notifications: {}",
            user.max_models,
            if user.show_images { "on" } else { "off" },
            if user.offline_notifications { "on" } else { "off" },
        );
        if let Some(mail) = &self.config.mail {
            if let Some(inbox) = self.users.email_for_chat(endpoint, chat_id).await? {
                text.push_str(&format!("\nYour inbox: {inbox}@{}", mail.host));
            }
        }
        self.reply(endpoint, chat_id, text);
        Ok(())
    }

    async fn feedback(&self, endpoint: &str, chat_id: i64, args: &str) -> Result<()> {
        if args.is_empty() {
            self.reply(endpoint, chat_id, "Usage: /feedback your words");
            return Ok(());
        }
        self.users.record_feedback(endpoint, chat_id, args).await?;
        self.reply(endpoint, chat_id, "Thank you for your feedback");
        let admin_endpoint = self.config.admin_endpoint.clone();
        self.reply(
            &admin_endpoint,
            self.config.admin_id,
            format!("Feedback from {endpoint}:{chat_id}: {args}"),
        );
        Ok(())
    }

    async fn buy(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        let Some(payments) = &self.config.payments else {
            self.reply(endpoint, chat_id, "Purchases are not available");
            return Ok(());
        };
        self.users
            .ensure(endpoint, chat_id, self.config.max_models)
            .await?;
        let local_id = uuid::Uuid::new_v4().to_string();
        self.transactions
            .create(
                &local_id,
                "packet",
                chat_id,
                endpoint,
                payments.packet_model_number,
                now_ts(),
            )
            .await?;
        self.reply(
            endpoint,
            chat_id,
            format!(
                "{} more subscription slots for ${}:\n{}/buy?tx={local_id}",
                payments.packet_model_number, payments.packet_price, self.config.website_link,
            ),
        );
        Ok(())
    }

    async fn referral(&self, endpoint: &str, chat_id: i64) -> Result<()> {
        self.users
            .ensure(endpoint, chat_id, self.config.max_models)
            .await?;
        let referral_id = self.referrals.ensure_referral_id(chat_id).await?;
        self.reply(
            endpoint,
            chat_id,
            format!(
                "Your referral link gives both of you {} extra subscription slots:\n{}?start={referral_id}",
                self.config.follower_bonus, self.config.website_link,
            ),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_slash_forms() {
        assert_eq!(
            parse_command("/add aaa"),
            Some(ParsedCommand { name: "add", args: "aaa" })
        );
        assert_eq!(
            parse_command("add aaa"),
            Some(ParsedCommand { name: "add", args: "aaa" })
        );
        assert_eq!(
            parse_command("  /list  "),
            Some(ParsedCommand { name: "list", args: "" })
        );
    }

    #[test]
    fn strips_bot_mention() {
        assert_eq!(
            parse_command("/add@our_bot aaa"),
            Some(ParsedCommand { name: "add", args: "aaa" })
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn keeps_multi_word_args() {
        assert_eq!(
            parse_command("/feedback love the bot"),
            Some(ParsedCommand { name: "feedback", args: "love the bot" })
        );
    }

    mod handler {
        use std::sync::Arc;

        use platforms_poller::platforms::MockPlatform;
        use tokio::sync::mpsc;
        use tokio_util::sync::CancellationToken;

        use super::super::*;
        use crate::database::repositories::testing;
        use crate::delivery::{DeliveryResult, MockMessageTransport, SendOutcome};

        async fn handler() -> (CommandHandler, mpsc::Receiver<DeliveryResult>) {
            let pool = testing::pool().await;
            let mut transport = MockMessageTransport::new();
            transport.expect_send().returning(|_| SendOutcome::Sent);
            let (results_tx, results_rx) = mpsc::channel(64);
            let pipeline = DeliveryPipeline::spawn(
                Arc::new(transport),
                64,
                results_tx,
                CancellationToken::new(),
            );
            let config: Arc<Config> = Arc::new(
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
            );
            let handler = CommandHandler {
                config,
                poller: Arc::new(MockPlatform::new()),
                pipeline,
                users: UserRepository::new(pool.clone()),
                subscriptions: SubscriptionRepository::new(pool.clone()),
                statuses: StatusRepository::new(pool.clone()),
                referrals: ReferralRepository::new(pool.clone()),
                blocks: BlockRepository::new(pool.clone()),
                transactions: TransactionRepository::new(pool),
            };
            (handler, results_rx)
        }

        #[tokio::test]
        async fn start_with_a_model_link_subscribes_and_credits_the_model() {
            let (handler, _results) = handler().await;

            handler.start("main", 7, "m-Alice").await.unwrap();
            assert!(handler.subscriptions.exists("main", 7, "alice").await.unwrap());
            assert_eq!(handler.referrals.model_referrals_sum().await.unwrap(), 1);

            // An already-subscribed follower does not move the counter again.
            handler.start("main", 7, "m-alice").await.unwrap();
            assert_eq!(handler.referrals.model_referrals_sum().await.unwrap(), 1);
        }

        #[tokio::test]
        async fn start_with_a_user_referral_credits_both_sides() {
            let (handler, _results) = handler().await;

            handler.start("main", 1, "").await.unwrap();
            let referral_id = handler.referrals.ensure_referral_id(1).await.unwrap();

            handler.start("main", 2, &referral_id).await.unwrap();
            assert_eq!(handler.referrals.user_referrals_sum().await.unwrap(), 1);
        }
    }
}
