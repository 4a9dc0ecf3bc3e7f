//! Poller selection by configured platform name.

use std::sync::Arc;

use reqwest::Client;
use rustc_hash::FxHashMap;

use crate::platforms::{BongaCams, Chaturbate, LiveJasmin, MockPlatform, Stripchat};
use crate::poller::{OnlinePoller, PollerContext};
use crate::{PollerError, Result};

/// Build the poller for the configured platform.
///
/// The platform set is closed and resolved once at startup; an unknown name
/// is a configuration error, not a runtime fallback.
pub fn for_platform(
    name: &str,
    client: Client,
    specific: FxHashMap<String, String>,
) -> Result<Arc<dyn OnlinePoller>> {
    let ctx = PollerContext::new(client, specific);
    Ok(match name {
        "chaturbate" => Arc::new(Chaturbate::new(ctx)),
        "bongacams" => Arc::new(BongaCams::new(ctx)),
        "stripchat" => Arc::new(Stripchat::new(ctx)),
        "livejasmin" => Arc::new(LiveJasmin::new(ctx)?),
        "mock" => Arc::new(MockPlatform::new()),
        other => return Err(PollerError::UnsupportedPlatform(other.to_string())),
    })
}
