//! Telegram Bot API notifier.
//!
//! Outbound: `sendMessage` and `sendPhoto`. Inbound: `getUpdates` long-polling
//! with an `offset` cursor that only moves forward, so an update is never
//! seen twice by the same notifier.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::time::Instant;

use super::Notifier;
use crate::auth::parse_code_command;
use crate::duration::deadline_after;
use crate::error::NotifyError;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const MAX_CAPTION_CHARS: usize = 1024;
/// Replies older than this (relative to the start of a wait) belong to an earlier prompt.
const STALE_REPLY_GRACE_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    date: i64,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Notifier backed by a Telegram bot talking to a single operator chat.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: SecretString,
    chat_id: String,
    offset: AtomicI64,
    poll_timeout: Duration,
    retry_delay: Duration,
    idle_delay: Duration,
}

impl TelegramNotifier {
    pub fn new(token: SecretString, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
            token,
            chat_id: chat_id.into().trim().to_string(),
            offset: AtomicI64::new(0),
            poll_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
            idle_delay: Duration::from_millis(500),
        }
    }

    /// Point the notifier at a different Bot API host (used by tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Long-poll duration requested from `getUpdates`.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Back-off after a failed `getUpdates` call.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Pause after an empty `getUpdates` answer.
    pub fn with_idle_delay(mut self, idle_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self
    }

    /// Next `getUpdates` offset.
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token.expose_secret())
    }

    async fn check<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<Option<T>, NotifyError> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|e| e.without_url())?;
        if !status.is_success() || !body.ok {
            return Err(NotifyError::Api {
                status: status.as_u16(),
                description: body.description.unwrap_or_default(),
            });
        }
        Ok(body.result)
    }

    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .map_err(|e| e.without_url())?;
        Self::check::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn send_photo(&self, image: &Path, caption: &str) -> Result<(), NotifyError> {
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "screenshot.png".to_string());
        let photo = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|e| e.without_url())?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.chars().take(MAX_CAPTION_CHARS).collect::<String>())
            .part("photo", photo);

        let response = self
            .client
            .post(self.endpoint("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.without_url())?;
        Self::check::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn get_updates(&self, poll: Duration) -> Result<Vec<Update>, NotifyError> {
        let response = self
            .client
            .get(self.endpoint("getUpdates"))
            .query(&[
                ("offset", self.offset().to_string()),
                ("timeout", poll.as_secs().to_string()),
            ])
            .timeout(poll + Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.without_url())?;
        Ok(Self::check::<Vec<Update>>(response).await?.unwrap_or_default())
    }

    /// Scan a batch in order, advancing the cursor past every update looked at.
    ///
    /// Stops at the first match; later updates in the batch stay unconsumed
    /// and are delivered again by the next `getUpdates`.
    fn scan(&self, updates: Vec<Update>, not_before: i64) -> Option<String> {
        for update in updates {
            self.offset.fetch_max(update.update_id + 1, Ordering::SeqCst);

            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id.to_string() != self.chat_id {
                tracing::debug!(chat_id = message.chat.id, "Ignoring message from another chat");
                continue;
            }
            let Some(code) = message.text.as_deref().and_then(parse_code_command) else {
                continue;
            };
            if message.date < not_before {
                tracing::debug!(update_id = update.update_id, "Ignoring stale /code reply");
                continue;
            }
            return Some(code);
        }
        None
    }

    /// Tell Telegram everything before the cursor has been handled.
    async fn confirm(&self) {
        if let Err(err) = self.get_updates(Duration::ZERO).await {
            tracing::debug!(error = %err, "Failed to confirm consumed updates");
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn announce(&self, message: &str) {
        if let Err(err) = self.send_message(message).await {
            tracing::warn!(error = %err, "Failed to send Telegram message");
        }
    }

    async fn attach(&self, image: &Path, caption: &str) {
        if !image.exists() {
            tracing::debug!(path = %image.display(), "Skipping missing attachment");
            return;
        }
        if let Err(err) = self.send_photo(image, caption).await {
            tracing::warn!(error = %err, "Failed to send Telegram photo");
        }
    }

    async fn await_code(&self, timeout: Duration) -> Option<String> {
        let deadline = deadline_after(timeout);
        let not_before = Utc::now().timestamp() - STALE_REPLY_GRACE_SECS;
        tracing::info!(timeout_secs = timeout.as_secs(), "Waiting for /code reply in Telegram");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::info!("No /code reply before the deadline");
                return None;
            }
            let poll = self.poll_timeout.min(remaining);

            match tokio::time::timeout_at(deadline, self.get_updates(poll)).await {
                Err(_) => return None,
                Ok(Ok(updates)) => {
                    let empty = updates.is_empty();
                    if let Some(code) = self.scan(updates, not_before) {
                        self.confirm().await;
                        return Some(code);
                    }
                    if empty {
                        tokio::time::sleep(self.idle_delay.min(remaining)).await;
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "Polling Telegram failed; retrying");
                    tokio::time::sleep(self.retry_delay.min(remaining)).await;
                }
            }
        }
    }
}
