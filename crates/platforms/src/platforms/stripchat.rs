//! Stripchat poller.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::poller::{OnlinePoller, PollerContext};
use crate::status::{OnlineModel, Snapshot, StatusKind};
use crate::{PollerError, Result};

const MODELS_URL: &str = "https://stripchat.com/api/front/models";
const PAGE_LIMIT: usize = 1000;

#[derive(Debug)]
pub struct Stripchat {
    ctx: PollerContext,
}

impl Stripchat {
    pub fn new(ctx: PollerContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrontModel {
    username: String,
    #[serde(default)]
    snapshot_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: UserInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    is_geo_banned: bool,
}

#[async_trait]
impl OnlinePoller for Stripchat {
    fn platform_name(&self) -> &'static str {
        "stripchat"
    }

    async fn online_models(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        let mut offset = 0usize;
        loop {
            let url = format!("{MODELS_URL}?limit={PAGE_LIMIT}&offset={offset}&primaryTag=girls");
            let response = self.ctx.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(PollerError::BadStatus(response.status().as_u16()));
            }
            let page: ModelsResponse = response.json().await?;
            let page_len = page.models.len();
            for entry in page.models {
                match serde_json::from_value::<FrontModel>(entry) {
                    Ok(model) => snapshot.push(OnlineModel {
                        model_id: model.username.to_lowercase(),
                        image_url: model.snapshot_url.filter(|u| !u.is_empty()),
                    }),
                    Err(e) => debug!("skipping malformed model entry: {e}"),
                }
            }
            if page_len < PAGE_LIMIT {
                break;
            }
            offset += page_len;
        }
        Ok(snapshot)
    }

    async fn check_model(&self, model_id: &str) -> Result<StatusKind> {
        let url = format!("https://stripchat.com/api/front/users/username/{model_id}");
        let response = self.ctx.get(&url).send().await?;
        match response.status().as_u16() {
            404 => return Ok(StatusKind::NotFound),
            401 | 403 => return Ok(StatusKind::Denied),
            code if code >= 400 => return Err(PollerError::BadStatus(code)),
            _ => {}
        }
        let user: UserResponse = response.json().await?;
        Ok(if user.user.is_deleted || user.user.is_geo_banned {
            StatusKind::Denied
        } else if user.user.status == "off" {
            StatusKind::Offline
        } else {
            StatusKind::Online
        })
    }
}
