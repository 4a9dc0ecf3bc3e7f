//! The platform poller trait and shared request plumbing.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rustc_hash::FxHashMap;

use crate::Result;
use crate::status::{Snapshot, StatusKind, canonical_model_id};

/// Default desktop user agent used for platform API queries.
pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Shared state every concrete poller embeds.
///
/// Carries the HTTP client, the default header set, and the free-form
/// platform-specific configuration from the config file (endpoints, API keys
/// and the like, keyed by lowercase option name).
#[derive(Debug, Clone)]
pub struct PollerContext {
    pub client: Client,
    headers: HeaderMap,
    pub specific: FxHashMap<String, String>,
}

impl PollerContext {
    pub fn new(client: Client, specific: FxHashMap<String, String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        Self {
            client,
            headers,
            specific,
        }
    }

    /// Override or extend the default header set.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Build a GET request with the default headers applied.
    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.get(url).headers(self.headers.clone())
    }

    /// Platform-specific config value, if present.
    pub fn specific(&self, key: &str) -> Option<&str> {
        self.specific.get(key).map(String::as_str)
    }
}

/// A platform-specific online-list poller.
///
/// Implementations are stateless beyond their [`PollerContext`]; one instance
/// is created at startup and shared by the polling runner for the lifetime of
/// the process.
#[async_trait]
pub trait OnlinePoller: Send + Sync + std::fmt::Debug {
    /// Platform name as used in configuration and logs.
    fn platform_name(&self) -> &'static str;

    /// Fetch the complete set of currently-online models.
    async fn online_models(&self) -> Result<Snapshot>;

    /// Probe a single model's current status.
    ///
    /// Used when a chat subscribes to a model the bot has never observed, to
    /// reject nonexistent IDs up front.
    async fn check_model(&self, model_id: &str) -> Result<StatusKind>;

    /// Platform-specific ID normalization; the default lowercases and trims.
    fn canonical_model_id(&self, raw: &str) -> String {
        canonical_model_id(raw)
    }
}
