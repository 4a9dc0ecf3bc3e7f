//! Bot API client for all configured endpoints.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::config::EndpointConfig;
use crate::delivery::{MessagePayload, MessageTransport, OutgoingMessage, SendOutcome};
use crate::{Error, Result};

use super::types::{ApiResponse, BotCommand, BotInfo};

const API_BASE: &str = "https://api.telegram.org";

/// Commands advertised to Telegram clients via setMyCommands.
pub const USER_COMMANDS: &[BotCommand] = &[
    BotCommand { command: "add", description: "Subscribe to a model" },
    BotCommand { command: "remove", description: "Unsubscribe from a model" },
    BotCommand { command: "list", description: "List subscriptions" },
    BotCommand { command: "online", description: "Subscriptions currently online" },
    BotCommand { command: "week", description: "Weekly online hours of a model" },
    BotCommand { command: "settings", description: "Show current settings" },
    BotCommand { command: "feedback", description: "Send feedback to the author" },
    BotCommand { command: "help", description: "Show help" },
];

/// Outbound Bot API client; one instance serves every configured endpoint.
pub struct TelegramClient {
    client: reqwest::Client,
    /// Endpoint name -> bot token.
    tokens: HashMap<String, String>,
    /// Endpoint name -> (public webhook domain, listen path); empty domain
    /// means webhook registration is skipped for that endpoint.
    webhooks: HashMap<String, (String, String)>,
}

impl TelegramClient {
    pub fn new(timeout: Duration, endpoints: &HashMap<String, EndpointConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        let tokens = endpoints
            .iter()
            .map(|(name, e)| (name.clone(), e.bot_token.clone()))
            .collect();
        let webhooks = endpoints
            .iter()
            .map(|(name, e)| {
                (
                    name.clone(),
                    (e.webhook_domain.clone(), e.listen_path.clone()),
                )
            })
            .collect();
        Ok(Self {
            client,
            tokens,
            webhooks,
        })
    }

    fn method_url(&self, endpoint: &str, method: &str) -> Result<String> {
        let token = self
            .tokens
            .get(endpoint)
            .ok_or_else(|| Error::not_found("endpoint", endpoint))?;
        Ok(format!("{API_BASE}/bot{token}/{method}"))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let url = self.method_url(endpoint, method)?;
        let response: ApiResponse<T> = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;
        if response.ok {
            response.result.ok_or_else(|| Error::Telegram {
                code: 0,
                description: format!("{method}: ok response without a result"),
            })
        } else {
            Err(Error::Telegram {
                code: response.error_code.unwrap_or(0),
                description: response
                    .description
                    .unwrap_or_else(|| "unknown error".to_owned()),
            })
        }
    }

    pub async fn get_me(&self, endpoint: &str) -> Result<BotInfo> {
        self.call(endpoint, "getMe", &serde_json::json!({})).await
    }

    /// Register the endpoint's webhook URL; skipped when no domain is set.
    pub async fn set_webhook(&self, endpoint: &str) -> Result<()> {
        let (domain, path) = self
            .webhooks
            .get(endpoint)
            .ok_or_else(|| Error::not_found("endpoint", endpoint))?;
        if domain.is_empty() {
            info!(endpoint, "no webhook domain configured, skipping registration");
            return Ok(());
        }
        let url = format!("https://{domain}{path}");
        let _: bool = self
            .call(
                endpoint,
                "setWebhook",
                &serde_json::json!({ "url": url, "allowed_updates": ["message", "callback_query"] }),
            )
            .await?;
        info!(endpoint, %url, "webhook registered");
        Ok(())
    }

    pub async fn delete_webhook(&self, endpoint: &str) -> Result<()> {
        let _: bool = self
            .call(endpoint, "deleteWebhook", &serde_json::json!({}))
            .await?;
        info!(endpoint, "webhook deleted");
        Ok(())
    }

    /// Stop the client-side spinner on a pressed inline button.
    pub async fn answer_callback_query(&self, endpoint: &str, callback_id: &str) -> Result<()> {
        let _: bool = self
            .call(
                endpoint,
                "answerCallbackQuery",
                &serde_json::json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn set_my_commands(&self, endpoint: &str, commands: &[BotCommand]) -> Result<()> {
        let _: bool = self
            .call(
                endpoint,
                "setMyCommands",
                &serde_json::json!({ "commands": commands }),
            )
            .await?;
        Ok(())
    }

    async fn send_text(
        &self,
        endpoint: &str,
        chat_id: i64,
        text: &str,
        parse_mode: &str,
        notify: bool,
        disable_preview: bool,
    ) -> SendOutcome {
        let url = match self.method_url(endpoint, "sendMessage") {
            Ok(url) => url,
            Err(e) => {
                error!(endpoint, "cannot send message: {e}");
                return SendOutcome::Unknown;
            }
        };
        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "disable_notification": !notify,
            "disable_web_page_preview": disable_preview,
        });
        if !parse_mode.is_empty() {
            payload["parse_mode"] = parse_mode.into();
        }
        let result = self.client.post(&url).json(&payload).send().await;
        self.classify(result).await
    }

    async fn send_photo(
        &self,
        endpoint: &str,
        chat_id: i64,
        image: &[u8],
        caption: &str,
        parse_mode: &str,
        notify: bool,
    ) -> SendOutcome {
        let url = match self.method_url(endpoint, "sendPhoto") {
            Ok(url) => url,
            Err(e) => {
                error!(endpoint, "cannot send photo: {e}");
                return SendOutcome::Unknown;
            }
        };
        let photo = multipart::Part::bytes(image.to_vec()).file_name("preview.jpg");
        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("disable_notification", (!notify).to_string())
            .part("photo", photo);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_owned());
        }
        if !parse_mode.is_empty() {
            form = form.text("parse_mode", parse_mode.to_owned());
        }
        let result = self.client.post(&url).multipart(form).send().await;
        self.classify(result).await
    }

    /// Map an HTTP send attempt to the pipeline's outcome classes.
    async fn classify(
        &self,
        result: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> SendOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return SendOutcome::Timeout,
            Err(e) => {
                debug!("transport error: {e}");
                return SendOutcome::NetworkError;
            }
        };
        let status = response.status().as_u16();
        let body: ApiResponse<serde_json::Value> = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return SendOutcome::Timeout,
            Err(e) => {
                warn!("unreadable Bot API response: {e}");
                return SendOutcome::Unknown;
            }
        };
        if body.ok {
            return SendOutcome::Sent;
        }
        let code = body.error_code.unwrap_or(i64::from(status));
        let description = body.description.unwrap_or_default();
        match code {
            403 => SendOutcome::Blocked,
            429 => SendOutcome::RateLimited,
            400 => {
                if let Some(chat_id) = body.parameters.and_then(|p| p.migrate_to_chat_id) {
                    debug!(chat_id, "chat migrated to a supergroup");
                    return SendOutcome::ChatMigrated;
                }
                if description == "Bad Request: chat not found" {
                    return SendOutcome::ChatNotFound;
                }
                warn!(%description, "bad request");
                SendOutcome::BadRequest
            }
            _ => {
                warn!(code, %description, "unexpected Bot API error");
                SendOutcome::Unknown
            }
        }
    }
}

#[async_trait]
impl MessageTransport for TelegramClient {
    async fn send(&self, message: &OutgoingMessage) -> SendOutcome {
        match &message.payload {
            MessagePayload::Text {
                text,
                parse_mode,
                notify,
                disable_preview,
            } => {
                self.send_text(
                    &message.endpoint,
                    message.chat_id,
                    text,
                    parse_mode,
                    *notify,
                    *disable_preview,
                )
                .await
            }
            MessagePayload::Photo {
                image,
                caption,
                parse_mode,
                notify,
            } => {
                self.send_photo(
                    &message.endpoint,
                    message.chat_id,
                    image,
                    caption,
                    parse_mode,
                    *notify,
                )
                .await
            }
        }
    }
}
