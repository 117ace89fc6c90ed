//! Messenger provider: the four-operation surface the worker drives
//! (§6), implemented against the Telegram Bot HTTP API.

use std::path::Path;

use serde::Deserialize;
use serde_json::json;
use spacenote_common::AppError;

/// Outcome of a failed send, used by the worker to pick a [`crate::retry::RetryDecision`].
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// The provider asked us to slow down; retry after this many seconds
    /// without counting it against the task's retry budget.
    RateLimited { retry_after: u64 },
    /// The message being edited no longer exists (deleted, or the bot
    /// lost access); the worker deletes the stale mirror row and falls
    /// through to a fresh send.
    MessageGone,
    /// Anything else: counts against the task's retry budget.
    Generic(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { retry_after } => write!(f, "rate limited, retry after {retry_after}s"),
            Self::MessageGone => write!(f, "message to edit not found"),
            Self::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

/// Sent text/photo messages resolve to Telegram's numeric message id; the
/// provider stringifies it for storage on `MessengerMirror::message_id`.
pub type MessageId = String;

/// The four operations the messenger worker needs, independent of which
/// external provider backs them.
#[async_trait::async_trait]
pub trait MessengerProvider: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<MessageId, ProviderError>;
    async fn edit_text(&self, chat_id: &str, message_id: &str, text: &str) -> Result<(), ProviderError>;
    async fn send_photo(&self, chat_id: &str, photo_path: &Path, caption: &str) -> Result<MessageId, ProviderError>;
    async fn edit_photo(
        &self,
        chat_id: &str,
        message_id: &str,
        photo_path: &Path,
        caption: &str,
    ) -> Result<(), ProviderError>;
}

/// Telegram Bot API client over `reqwest`, classifying HTTP responses per
/// the worker's retry discipline: HTTP 429 with a `retry_after` body field
/// is rate-limited, a "message to edit not found"/"message can't be
/// edited" `description` is message-gone, everything else is generic.
pub struct TelegramProvider {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramProvider {
    #[must_use]
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn classify(response: reqwest::Response) -> Result<TelegramResponse, ProviderError> {
        let status = response.status();
        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Generic(format!("malformed telegram response: {e}")))?;

        if body.ok {
            return Ok(body);
        }

        if status.as_u16() == 429 {
            let retry_after = body
                .parameters
                .as_ref()
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            return Err(ProviderError::RateLimited { retry_after });
        }

        let description = body.description.clone().unwrap_or_default();
        if description.contains("message to edit not found") || description.contains("message can't be edited") {
            return Err(ProviderError::MessageGone);
        }

        Err(ProviderError::Generic(description))
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<TelegramMessage>,
    #[serde(default)]
    parameters: Option<TelegramResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[async_trait::async_trait]
impl MessengerProvider for TelegramProvider {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<MessageId, ProviderError> {
        let response = self
            .http
            .post(self.url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text, "parse_mode": "HTML" }))
            .send()
            .await
            .map_err(|e| ProviderError::Generic(e.to_string()))?;
        let body = Self::classify(response).await?;
        Ok(body.result.map_or_else(String::new, |m| m.message_id.to_string()))
    }

    async fn edit_text(&self, chat_id: &str, message_id: &str, text: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(self.url("editMessageText"))
            .json(&json!({ "chat_id": chat_id, "message_id": message_id, "text": text, "parse_mode": "HTML" }))
            .send()
            .await
            .map_err(|e| ProviderError::Generic(e.to_string()))?;
        Self::classify(response).await?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: &str, photo_path: &Path, caption: &str) -> Result<MessageId, ProviderError> {
        let bytes = tokio::fs::read(photo_path)
            .await
            .map_err(|e| ProviderError::Generic(format!("failed to read photo: {e}")))?;
        let filename = photo_path
            .file_name()
            .map_or_else(|| "photo.webp".to_string(), |n| n.to_string_lossy().into_owned());
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", reqwest::multipart::Part::bytes(bytes).file_name(filename));
        let response = self
            .http
            .post(self.url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Generic(e.to_string()))?;
        let body = Self::classify(response).await?;
        Ok(body.result.map_or_else(String::new, |m| m.message_id.to_string()))
    }

    async fn edit_photo(
        &self,
        chat_id: &str,
        message_id: &str,
        photo_path: &Path,
        caption: &str,
    ) -> Result<(), ProviderError> {
        let bytes = tokio::fs::read(photo_path)
            .await
            .map_err(|e| ProviderError::Generic(format!("failed to read photo: {e}")))?;
        let filename = photo_path
            .file_name()
            .map_or_else(|| "photo.webp".to_string(), |n| n.to_string_lossy().into_owned());
        let media = json!({ "type": "photo", "media": "attach://photo", "caption": caption, "parse_mode": "HTML" });
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("message_id", message_id.to_string())
            .text("media", media.to_string())
            .part("photo", reqwest::multipart::Part::bytes(bytes).file_name(filename));
        let response = self
            .http
            .post(self.url("editMessageMedia"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Generic(e.to_string()))?;
        Self::classify(response).await?;
        Ok(())
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Construct the default provider from a configured bot token, or `None`
/// if messenger integration is disabled.
#[must_use]
pub fn from_config(telegram_bot_token: Option<&str>) -> Option<TelegramProvider> {
    telegram_bot_token.map(TelegramProvider::new)
}
