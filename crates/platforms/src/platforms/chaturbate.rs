//! Chaturbate poller.
//!
//! Uses the public room-list API, paged with `limit`/`offset`, and the
//! per-room `chatvideocontext` endpoint for single-model probes.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::poller::{OnlinePoller, PollerContext};
use crate::status::{OnlineModel, Snapshot, StatusKind};
use crate::{PollerError, Result};

const ROOM_LIST_URL: &str = "https://chaturbate.com/api/ts/roomlist/room-list/";
const PAGE_LIMIT: usize = 500;

#[derive(Debug)]
pub struct Chaturbate {
    ctx: PollerContext,
}

impl Chaturbate {
    pub fn new(ctx: PollerContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct RoomListResponse {
    rooms: Vec<serde_json::Value>,
    total_count: usize,
}

#[derive(Debug, Deserialize)]
struct Room {
    username: String,
    #[serde(default)]
    img: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoContext {
    room_status: String,
}

#[async_trait]
impl OnlinePoller for Chaturbate {
    fn platform_name(&self) -> &'static str {
        "chaturbate"
    }

    async fn online_models(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        let mut offset = 0usize;
        loop {
            let url = format!("{ROOM_LIST_URL}?limit={PAGE_LIMIT}&offset={offset}");
            let response = self.ctx.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(PollerError::BadStatus(response.status().as_u16()));
            }
            let page: RoomListResponse = response.json().await?;
            let page_len = page.rooms.len();
            for room in page.rooms {
                // A malformed room entry loses that one model, not the batch.
                match serde_json::from_value::<Room>(room) {
                    Ok(room) => snapshot.push(match room.img {
                        Some(img) if !img.is_empty() => {
                            OnlineModel::with_image(room.username.to_lowercase(), img)
                        }
                        _ => OnlineModel::new(room.username.to_lowercase()),
                    }),
                    Err(e) => debug!("skipping malformed room entry: {e}"),
                }
            }
            offset += page_len;
            if page_len == 0 || offset >= page.total_count {
                break;
            }
        }
        Ok(snapshot)
    }

    async fn check_model(&self, model_id: &str) -> Result<StatusKind> {
        let url = format!("https://chaturbate.com/api/chatvideocontext/{model_id}/");
        let response = self.ctx.get(&url).send().await?;
        match response.status().as_u16() {
            404 => return Ok(StatusKind::NotFound),
            401 | 403 => return Ok(StatusKind::Denied),
            code if code >= 400 => return Err(PollerError::BadStatus(code)),
            _ => {}
        }
        let context: VideoContext = response.json().await?;
        Ok(match context.room_status.as_str() {
            "offline" => StatusKind::Offline,
            "deleted" | "banned" | "geoblocked" => StatusKind::Denied,
            // public, private, group, away, hidden: the account exists and
            // is broadcasting in some form.
            _ => StatusKind::Online,
        })
    }
}
