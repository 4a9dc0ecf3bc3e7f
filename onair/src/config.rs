//! Configuration loading and validation.
//!
//! The bot takes a single JSON config file as its CLI argument. Missing
//! optional fields fall back to defaults; the loaded config is validated
//! before anything else starts.

use std::collections::HashMap;
use std::path::Path;

use platforms_poller::StatusKind;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One Telegram bot endpoint (the bot can run several localized bots at once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Telegram Bot API token.
    pub bot_token: String,
    /// Webhook path this endpoint listens on (e.g. "/tg/en").
    pub listen_path: String,
    /// Public domain Telegram delivers webhooks to; empty disables webhook
    /// registration for this endpoint.
    #[serde(default)]
    pub webhook_domain: String,
}

/// Per-status debounce windows, in seconds. Zero confirms immediately.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationSeconds {
    pub online: i64,
    pub offline: i64,
    pub not_found: i64,
    pub denied: i64,
}

impl ConfirmationSeconds {
    pub fn for_status(&self, status: StatusKind) -> i64 {
        match status {
            StatusKind::Online => self.online,
            StatusKind::Offline => self.offline,
            StatusKind::NotFound => self.not_found,
            StatusKind::Denied => self.denied,
            StatusKind::Unknown => 0,
        }
    }
}

/// Inbound-mail bridge settings (the SMTP listener itself is external).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Mail domain inbox addresses live under.
    pub host: String,
}

/// Payment-gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// HTTP path the gateway posts terminal-state callbacks to.
    pub callback_path: String,
    /// Price of one subscription packet, in dollars.
    pub packet_price: f64,
    /// Subscription slots granted per packet.
    pub packet_model_number: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Watched platform name (see `platforms_poller::factory`).
    pub platform: String,
    /// SQLite database URL, e.g. "sqlite:onair.db?mode=rwc".
    pub database_url: String,
    /// Bind address of the HTTP surface (webhooks, /stat, payment callback).
    pub listen_address: String,
    /// Telegram endpoints keyed by endpoint name.
    pub endpoints: HashMap<String, EndpointConfig>,
    /// Admin chat and the endpoint used to reach it.
    pub admin_id: i64,
    pub admin_endpoint: String,
    /// Password gating the /stat read endpoint.
    pub stat_password: String,

    #[serde(default = "default_period_seconds")]
    pub period_seconds: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub status_confirmation_seconds: ConfirmationSeconds,

    #[serde(default = "default_max_models")]
    pub max_models: i32,
    #[serde(default = "default_block_threshold")]
    pub block_threshold: i64,
    #[serde(default = "default_heavy_user_remainder")]
    pub heavy_user_remainder: i32,
    /// Global switch for offline notifications; the per-user flag must also
    /// be set for an offline transition to notify.
    #[serde(default)]
    pub offline_notifications: bool,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Size of the rolling poll/download error windows.
    #[serde(default = "default_error_denominator")]
    pub error_denominator: usize,
    /// Errors within the window that trigger an admin alert.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: usize,
    #[serde(default = "default_error_report_minutes")]
    pub error_reporting_period_minutes: i64,

    #[serde(default)]
    pub referral_bonus: i32,
    #[serde(default)]
    pub follower_bonus: i32,
    #[serde(default)]
    pub website_link: String,

    /// Free-form per-platform options (API keys and the like).
    #[serde(default)]
    pub specific_config: HashMap<String, String>,

    #[serde(default)]
    pub mail: Option<MailConfig>,
    #[serde(default)]
    pub payments: Option<PaymentsConfig>,
}

fn default_period_seconds() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_models() -> i32 {
    5
}
fn default_block_threshold() -> i64 {
    3
}
fn default_heavy_user_remainder() -> i32 {
    1
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_error_denominator() -> usize {
    100
}
fn default_error_threshold() -> usize {
    10
}
fn default_error_report_minutes() -> i64 {
    60
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.platform.is_empty() {
            return Err(Error::config("platform must be set"));
        }
        if self.endpoints.is_empty() {
            return Err(Error::config("at least one endpoint is required"));
        }
        if !self.endpoints.contains_key(&self.admin_endpoint) {
            return Err(Error::config(format!(
                "admin_endpoint '{}' is not a configured endpoint",
                self.admin_endpoint
            )));
        }
        for (name, endpoint) in &self.endpoints {
            if endpoint.bot_token.is_empty() {
                return Err(Error::config(format!("endpoint '{name}' has an empty bot_token")));
            }
            if !endpoint.listen_path.starts_with('/') {
                return Err(Error::config(format!(
                    "endpoint '{name}' listen_path must start with '/'"
                )));
            }
            if !endpoint.webhook_domain.is_empty() {
                url::Url::parse(&format!("https://{}", endpoint.webhook_domain)).map_err(|e| {
                    Error::config(format!("endpoint '{name}' webhook_domain: {e}"))
                })?;
            }
        }
        if self.period_seconds == 0 {
            return Err(Error::config("period_seconds must be positive"));
        }
        if self.error_denominator == 0 {
            return Err(Error::config("error_denominator must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "platform": "mock",
            "database_url": "sqlite::memory:",
            "listen_address": "127.0.0.1:8080",
            "admin_id": 1,
            "admin_endpoint": "main",
            "stat_password": "secret",
            "endpoints": {
                "main": {"bot_token": "123:abc", "listen_path": "/tg/main"}
            }
        })
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = serde_json::from_value(minimal_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.period_seconds, 30);
        assert_eq!(config.block_threshold, 3);
        assert_eq!(config.status_confirmation_seconds.online, 0);
        assert!(!config.offline_notifications);
    }

    #[test]
    fn admin_endpoint_must_exist() {
        let mut raw = minimal_json();
        raw["admin_endpoint"] = "missing".into();
        let config: Config = serde_json::from_value(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn listen_path_must_be_absolute() {
        let mut raw = minimal_json();
        raw["endpoints"]["main"]["listen_path"] = "tg".into();
        let config: Config = serde_json::from_value(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn confirmation_seconds_per_status() {
        let seconds = ConfirmationSeconds {
            online: 60,
            offline: 10,
            not_found: 5,
            denied: 5,
        };
        assert_eq!(seconds.for_status(StatusKind::Online), 60);
        assert_eq!(seconds.for_status(StatusKind::Offline), 10);
        assert_eq!(seconds.for_status(StatusKind::Unknown), 0);
    }
}
