//! Telegram Bot API over plain HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use mirror_core::ports::ChatPlatform;
use mirror_core::{ChatError, ChatId, MessageId, MessageRef, UserId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

const API_BASE: &str = "https://api.telegram.org";
/// Long-poll window for getUpdates.
pub const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub reply_to_message: Option<Box<Message>>,
}

impl Message {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef { chat: self.chat.id, message: self.message_id }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(default)]
    pub all_members_are_administrators: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub username: Option<String>,
}

impl User {
    /// `@username`, or an inline mention for users without one.
    pub fn mention(&self) -> String {
        match &self.username {
            Some(name) => format!("@{name}"),
            None => format!("<a href=\"tg://user?id={}\">{}</a>", self.id, self.first_name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    user: User,
}

pub struct TelegramClient {
    client: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
                .build()
                .unwrap_or_default(),
            base: format!("{API_BASE}/bot{token}"),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ChatError> {
        let resp = self
            .client
            .post(format!("{}/{method}", self.base))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.without_url().to_string()))?;
        let api: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.without_url().to_string()))?;
        if !api.ok {
            return Err(map_api_error(api.description.as_deref().unwrap_or("unknown error")));
        }
        api.result
            .ok_or_else(|| ChatError::Api(format!("{method} returned no result")))
    }

    pub async fn get_me(&self) -> Result<User, ChatError> {
        self.call("getMe", json!({})).await
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChatError> {
        self.call(
            "getUpdates",
            json!({ "offset": offset, "timeout": POLL_TIMEOUT_SECS, "allowed_updates": ["message"] }),
        )
        .await
    }
}

fn map_api_error(description: &str) -> ChatError {
    let d = description.to_ascii_lowercase();
    if d.contains("message is not modified") {
        ChatError::NotModified
    } else if d.contains("message to edit not found")
        || d.contains("message to delete not found")
        || d.contains("message can't be edited")
    {
        ChatError::MessageGone
    } else {
        ChatError::Api(description.to_string())
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send_message(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<MessageRef, ChatError> {
        let mut body = json!({
            "chat_id": chat,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(id) = reply_to {
            body["reply_to_message_id"] = json!(id);
            body["allow_sending_without_reply"] = json!(true);
        }
        let sent: Message = self.call("sendMessage", body).await?;
        Ok(sent.message_ref())
    }

    async fn edit_message(&self, message: &MessageRef, text: &str) -> Result<(), ChatError> {
        let body = json!({
            "chat_id": message.chat,
            "message_id": message.message,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        // Returns the edited message, or `true` for inline messages.
        let _: Value = self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), ChatError> {
        let _: bool = self
            .call("deleteMessage", json!({ "chat_id": message.chat, "message_id": message.message }))
            .await?;
        Ok(())
    }

    async fn is_chat_admin(&self, chat: ChatId, user: UserId) -> Result<bool, ChatError> {
        let admins: Vec<ChatMember> = self.call("getChatAdministrators", json!({ "chat_id": chat })).await?;
        Ok(admins.iter().any(|m| m.user.id == user))
    }
}
