//! Bot API payload types, trimmed to the fields the bot reads.

use serde::{Deserialize, Serialize};

/// One inbound update delivered to a webhook route.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TgUser>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    /// Set when a group was upgraded and the chat id changed.
    #[serde(default)]
    pub migrate_to_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TgUser,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

impl CallbackQuery {
    /// Express the pressed button as a command message in the originating
    /// chat, so callbacks and typed commands share one dispatch path.
    pub fn into_command_message(self) -> Option<Message> {
        let message = self.message?;
        let data = self.data?;
        Some(Message {
            message_id: message.message_id,
            from: Some(self.from),
            chat: message.chat,
            text: Some(data),
            migrate_to_chat_id: None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// "private", "group", "supergroup" or "channel".
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// getMe result.
#[derive(Debug, Clone, Deserialize)]
pub struct BotInfo {
    pub id: i64,
    pub username: String,
}

/// One entry of setMyCommands.
#[derive(Debug, Clone, Serialize)]
pub struct BotCommand {
    pub command: &'static str,
    pub description: &'static str,
}

/// Generic Bot API envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResponseParameters {
    #[serde(default)]
    pub migrate_to_chat_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_text_update() {
        let raw = serde_json::json!({
            "update_id": 7,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 42, "type": "private"},
                "text": "/add some_model"
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.text.as_deref(), Some("/add some_model"));
        assert!(update.callback_query.is_none());
    }

    #[test]
    fn callback_query_becomes_a_command_in_its_chat() {
        let raw = serde_json::json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 42, "username": "alice"},
                "message": {
                    "message_id": 9,
                    "chat": {"id": -100500, "type": "supergroup"}
                },
                "data": "/list"
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let message = update
            .callback_query
            .unwrap()
            .into_command_message()
            .unwrap();
        assert_eq!(message.chat.id, -100500);
        assert_eq!(message.text.as_deref(), Some("/list"));
        assert_eq!(message.from.unwrap().id, 42);
    }

    #[test]
    fn callback_query_without_data_is_not_dispatchable() {
        let callback = CallbackQuery {
            id: "cb2".to_owned(),
            from: TgUser {
                id: 1,
                username: None,
            },
            message: None,
            data: Some("/list".to_owned()),
        };
        assert!(callback.into_command_message().is_none());
    }

    #[test]
    fn error_envelope_carries_migration_parameters() {
        let raw = serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: group chat was upgraded to a supergroup chat",
            "parameters": {"migrate_to_chat_id": -100123}
        });
        let response: ApiResponse<serde_json::Value> = serde_json::from_value(raw).unwrap();
        assert!(!response.ok);
        assert_eq!(
            response.parameters.unwrap().migrate_to_chat_id,
            Some(-100123)
        );
    }
}
