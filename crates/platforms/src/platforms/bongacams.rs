//! BongaCams poller.
//!
//! The listing endpoint is paged by offset and returns the full online set
//! when walked to exhaustion. Single-model probes go through the profile
//! listing filter.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::poller::{OnlinePoller, PollerContext};
use crate::status::{OnlineModel, Snapshot, StatusKind};
use crate::{PollerError, Result};

const LISTING_URL: &str = "https://bongacams.com/tools/listing_v3.php";

#[derive(Debug)]
pub struct BongaCams {
    ctx: PollerContext,
}

impl BongaCams {
    pub fn new(mut ctx: PollerContext) -> Self {
        // The listing endpoint refuses requests without an AJAX marker.
        ctx.add_header("X-Requested-With", "XMLHttpRequest");
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ListedModel {
    username: String,
    #[serde(default)]
    profile_images: Option<ProfileImages>,
}

#[derive(Debug, Deserialize)]
struct ProfileImages {
    #[serde(default)]
    thumbnail_image_medium_live: Option<String>,
}

#[async_trait]
impl OnlinePoller for BongaCams {
    fn platform_name(&self) -> &'static str {
        "bongacams"
    }

    async fn online_models(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        let mut offset = 0usize;
        loop {
            let url = format!("{LISTING_URL}?livetab=&online_only=true&offset={offset}");
            let response = self.ctx.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(PollerError::BadStatus(response.status().as_u16()));
            }
            let page: ListingResponse = response.json().await?;
            if page.models.is_empty() {
                break;
            }
            offset += page.models.len();
            for entry in page.models {
                match serde_json::from_value::<ListedModel>(entry) {
                    Ok(model) => {
                        let image = model
                            .profile_images
                            .and_then(|p| p.thumbnail_image_medium_live)
                            // Image URLs in the listing are protocol-relative.
                            .map(|url| {
                                if url.starts_with("//") {
                                    format!("https:{url}")
                                } else {
                                    url
                                }
                            });
                        snapshot.push(OnlineModel {
                            model_id: model.username.to_lowercase(),
                            image_url: image,
                        });
                    }
                    Err(e) => debug!("skipping malformed listing entry: {e}"),
                }
            }
        }
        Ok(snapshot)
    }

    async fn check_model(&self, model_id: &str) -> Result<StatusKind> {
        let url = format!("https://bongacams.com/profile/{model_id}");
        let response = self.ctx.get(&url).send().await?;
        Ok(match response.status().as_u16() {
            404 => StatusKind::NotFound,
            401 | 403 => StatusKind::Denied,
            code if code >= 400 => return Err(PollerError::BadStatus(code)),
            // Profile pages carry no cheap status marker; the snapshot loop
            // is the authority on online/offline.
            _ => StatusKind::Offline,
        })
    }
}
