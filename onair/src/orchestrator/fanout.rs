//! Fan-out of confirmed transitions into subscriber notifications.

use std::collections::HashMap;

use platforms_poller::StatusKind;
use tracing::{debug, warn};

use crate::confirm::ConfirmedTransition;
use crate::database::models::NotifyTarget;
use crate::delivery::{DeliveryPipeline, Lane, MessagePayload, OutgoingMessage};

/// One notification the current tick owes a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNotification {
    pub endpoint: String,
    pub chat_id: i64,
    pub model_id: String,
    pub status: StatusKind,
    pub with_image: bool,
}

/// Cross confirmed transitions with subscriber bindings.
///
/// `targets` already excludes chats over the block threshold (the repository
/// filters in SQL). Offline transitions require both the global switch and
/// the user's own flag; images only ever accompany online transitions.
pub fn plan_notifications(
    transitions: &[ConfirmedTransition],
    targets: &[NotifyTarget],
    offline_notifications: bool,
) -> Vec<PlannedNotification> {
    let mut planned = Vec::new();
    for transition in transitions {
        for target in targets {
            if target.model_id != transition.model_id {
                continue;
            }
            match transition.status {
                StatusKind::Online => planned.push(PlannedNotification {
                    endpoint: target.endpoint.clone(),
                    chat_id: target.chat_id,
                    model_id: transition.model_id.clone(),
                    status: StatusKind::Online,
                    with_image: target.show_images,
                }),
                StatusKind::Offline => {
                    if offline_notifications && target.offline_notifications {
                        planned.push(PlannedNotification {
                            endpoint: target.endpoint.clone(),
                            chat_id: target.chat_id,
                            model_id: transition.model_id.clone(),
                            status: StatusKind::Offline,
                            with_image: false,
                        });
                    }
                }
                StatusKind::NotFound | StatusKind::Denied => planned.push(PlannedNotification {
                    endpoint: target.endpoint.clone(),
                    chat_id: target.chat_id,
                    model_id: transition.model_id.clone(),
                    status: transition.status,
                    with_image: false,
                }),
                StatusKind::Unknown => {}
            }
        }
    }
    planned
}

pub fn notification_text(model_id: &str, status: StatusKind) -> String {
    match status {
        StatusKind::Online => format!("{model_id} is online!"),
        StatusKind::Offline => format!("{model_id} went offline"),
        StatusKind::NotFound => format!("{model_id} was not found, maybe she changed her ID or left the platform"),
        StatusKind::Denied => format!("{model_id} is not accessible from the bot's region"),
        StatusKind::Unknown => format!("{model_id} status is unknown"),
    }
}

/// Enqueue the planned notifications into the low lane, attaching a preview
/// image where the plan asks for one and the bytes are available.
///
/// Images are fetched at most once per model per tick; the caller records one
/// mark per attempted model in the download-error ring via the return value
/// (`(model_id, failed)` pairs).
pub async fn dispatch(
    pipeline: &DeliveryPipeline,
    client: &reqwest::Client,
    planned: &[PlannedNotification],
    image_urls: &HashMap<String, String>,
) -> Vec<(String, bool)> {
    let mut images: HashMap<String, Option<Vec<u8>>> = HashMap::new();
    let mut marks = Vec::new();

    for notification in planned {
        let text = notification_text(&notification.model_id, notification.status);
        let image = if notification.with_image {
            match images.entry(notification.model_id.clone()) {
                std::collections::hash_map::Entry::Occupied(cached) => cached.get().clone(),
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let fetched = match image_urls.get(&notification.model_id) {
                        Some(url) => {
                            let fetched = download_image(client, url).await;
                            marks.push((notification.model_id.clone(), fetched.is_none()));
                            fetched
                        }
                        None => None,
                    };
                    slot.insert(fetched).clone()
                }
            }
        } else {
            None
        };

        let payload = match image {
            Some(image) => MessagePayload::Photo {
                image,
                caption: text,
                parse_mode: String::new(),
                notify: true,
            },
            None => MessagePayload::Text {
                text,
                parse_mode: String::new(),
                notify: true,
                disable_preview: true,
            },
        };
        pipeline.enqueue(
            Lane::Low,
            OutgoingMessage::new(notification.endpoint.clone(), notification.chat_id, payload),
        );
    }
    marks
}

async fn download_image(client: &reqwest::Client, url: &str) -> Option<Vec<u8>> {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(url, "image download failed: {e}");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(url, status = %response.status(), "image download rejected");
        return None;
    }
    match response.bytes().await {
        Ok(bytes) => Some(bytes.to_vec()),
        Err(e) => {
            debug!(url, "image body read failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(model_id: &str, chat_id: i64, offline: bool, images: bool) -> NotifyTarget {
        NotifyTarget {
            model_id: model_id.to_owned(),
            chat_id,
            endpoint: "main".to_owned(),
            offline_notifications: offline,
            show_images: images,
        }
    }

    fn online(model_id: &str) -> ConfirmedTransition {
        ConfirmedTransition {
            model_id: model_id.to_owned(),
            status: StatusKind::Online,
        }
    }

    #[test]
    fn online_transition_reaches_every_subscriber() {
        let planned = plan_notifications(
            &[online("aaa")],
            &[target("aaa", 1, false, false), target("aaa", 2, false, true)],
            false,
        );
        assert_eq!(planned.len(), 2);
        assert!(!planned[0].with_image);
        assert!(planned[1].with_image);
    }

    #[test]
    fn unrelated_subscriptions_are_skipped() {
        let planned = plan_notifications(&[online("aaa")], &[target("bbb", 1, true, true)], true);
        assert!(planned.is_empty());
    }

    #[test]
    fn offline_needs_both_global_and_user_flags() {
        let transition = ConfirmedTransition {
            model_id: "aaa".to_owned(),
            status: StatusKind::Offline,
        };
        let targets = [target("aaa", 1, true, true), target("aaa", 2, false, true)];

        let disabled = plan_notifications(std::slice::from_ref(&transition), &targets, false);
        assert!(disabled.is_empty());

        let enabled = plan_notifications(&[transition], &targets, true);
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].chat_id, 1);
        // Offline notifications never carry an image.
        assert!(!enabled[0].with_image);
    }

    #[test]
    fn not_found_notifies_without_image() {
        let planned = plan_notifications(
            &[ConfirmedTransition {
                model_id: "aaa".to_owned(),
                status: StatusKind::NotFound,
            }],
            &[target("aaa", 1, false, true)],
            false,
        );
        assert_eq!(planned.len(), 1);
        assert!(!planned[0].with_image);
    }
}
