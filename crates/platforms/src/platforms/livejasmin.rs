//! LiveJasmin poller.
//!
//! Requires partner credentials (`psid` and `access_key`) from the
//! platform-specific configuration; the feed endpoint returns the full
//! online performer list in one response.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::poller::{OnlinePoller, PollerContext};
use crate::status::{OnlineModel, Snapshot, StatusKind};
use crate::{PollerError, Result};

const FEED_URL: &str = "https://pt.ptawe.com/api/model/feed";

#[derive(Debug)]
pub struct LiveJasmin {
    ctx: PollerContext,
    psid: String,
    access_key: String,
}

impl LiveJasmin {
    pub fn new(ctx: PollerContext) -> Result<Self> {
        let psid = ctx
            .specific("psid")
            .ok_or_else(|| PollerError::payload("livejasmin requires 'psid' in specific config"))?
            .to_string();
        let access_key = ctx
            .specific("access_key")
            .ok_or_else(|| {
                PollerError::payload("livejasmin requires 'access_key' in specific config")
            })?
            .to_string();
        Ok(Self {
            ctx,
            psid,
            access_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    status: String,
    #[serde(default)]
    data: Option<FeedData>,
}

#[derive(Debug, Deserialize)]
struct FeedData {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Performer {
    performer_id: String,
    #[serde(default)]
    profile_picture_url: Option<PictureSizes>,
}

#[derive(Debug, Deserialize)]
struct PictureSizes {
    #[serde(rename = "size320x240", default)]
    size_320x240: Option<String>,
}

#[async_trait]
impl OnlinePoller for LiveJasmin {
    fn platform_name(&self) -> &'static str {
        "livejasmin"
    }

    async fn online_models(&self) -> Result<Snapshot> {
        let url = format!(
            "{FEED_URL}?psid={}&accessKey={}&legacyRedirect=1",
            self.psid, self.access_key
        );
        let response = self.ctx.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(PollerError::BadStatus(response.status().as_u16()));
        }
        let feed: FeedResponse = response.json().await?;
        if feed.status != "OK" {
            return Err(PollerError::payload(format!(
                "feed status {}",
                feed.status
            )));
        }
        let mut snapshot = Snapshot::new();
        for entry in feed.data.map(|d| d.models).unwrap_or_default() {
            match serde_json::from_value::<Performer>(entry) {
                Ok(performer) => snapshot.push(OnlineModel {
                    model_id: performer.performer_id.to_lowercase(),
                    image_url: performer
                        .profile_picture_url
                        .and_then(|p| p.size_320x240),
                }),
                Err(e) => debug!("skipping malformed performer entry: {e}"),
            }
        }
        Ok(snapshot)
    }

    async fn check_model(&self, model_id: &str) -> Result<StatusKind> {
        // The partner API has no cheap single-performer probe; scan the feed.
        let online = self.online_models().await?;
        Ok(if online.iter().any(|m| m.model_id == model_id) {
            StatusKind::Online
        } else {
            StatusKind::Offline
        })
    }
}
