//! Telegram Bot channel: long polling + message sending via Bot API.
//!
//! One client serves three roles: it delivers digests and replies, it feeds
//! `channel_post` updates into the [`ChannelPostBuffer`], and it forwards
//! private messages to the command front end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use giftwatch_core::GiftWatchConfig;
use giftwatch_core::error::{GiftWatchError, Result};
use giftwatch_core::traits::DeliverySink;
use giftwatch_core::types::SourceMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::source::ChannelPostBuffer;

/// Telegram rejects longer messages.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Telegram channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.into()
}
fn default_poll_timeout() -> u64 {
    30
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl From<&GiftWatchConfig> for TelegramConfig {
    fn from(config: &GiftWatchConfig) -> Self {
        Self {
            bot_token: config.source_token().to_string(),
            api_base: default_api_base(),
            poll_timeout_secs: config.source.poll_timeout_secs,
        }
    }
}

/// A private message addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCommand {
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
}

/// Stream of private messages produced by [`TelegramChannel::start_polling`].
pub type CommandStream = UnboundedReceiverStream<IncomingCommand>;

/// Telegram Bot channel. Shared behind an `Arc` by the sink and the update loop.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
    last_update_id: AtomicI64,
    connected: AtomicBool,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            last_update_id: AtomicI64::new(0),
            connected: AtomicBool::new(false),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Validate the token with `getMe`.
    pub async fn connect(&self) -> Result<TelegramUser> {
        let me = self.get_me().await?;
        tracing::info!(
            "Telegram bot: @{} ({})",
            me.username.as_deref().unwrap_or("unknown"),
            me.first_name
        );
        self.connected.store(true, Ordering::SeqCst);
        Ok(me)
    }

    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Telegram client disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get updates using long polling.
    pub async fn get_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let timeout = self.config.poll_timeout_secs;
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                (
                    "offset",
                    (self.last_update_id.load(Ordering::SeqCst) + 1).to_string(),
                ),
                ("timeout", timeout.to_string()),
                ("allowed_updates", "[\"message\",\"channel_post\"]".into()),
            ])
            .timeout(Duration::from_secs(timeout + 10))
            .send()
            .await
            .map_err(|e| GiftWatchError::Channel(format!("Telegram getUpdates failed: {e}")))?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| GiftWatchError::Channel(format!("Invalid Telegram response: {e}")))?;

        let updates = body.into_result("getUpdates")?.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.last_update_id.store(last.update_id, Ordering::SeqCst);
        }
        Ok(updates)
    }

    /// Send a plain-text message, cut to Telegram's length limit.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": fit_message(text),
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| GiftWatchError::Delivery(format!("sendMessage to {chat_id} failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| GiftWatchError::Delivery(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(GiftWatchError::Delivery(format!(
                "Send to {chat_id} failed: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Get bot info.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| GiftWatchError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| GiftWatchError::Channel(format!("Invalid getMe response: {e}")))?;
        body.into_result("getMe")?
            .ok_or_else(|| GiftWatchError::Channel("No bot info".into()))
    }

    /// Start the update loop. Channel posts go into `buffer`; private
    /// messages come out of the returned stream. The loop exits once
    /// `shutdown` turns true or its sender is dropped.
    pub fn start_polling(
        self: Arc<Self>,
        buffer: Arc<ChannelPostBuffer>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, CommandStream) {
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            tracing::info!("Telegram polling loop started");

            loop {
                if *shutdown.borrow() {
                    break;
                }
                let polled = tokio::select! {
                    res = self.get_updates() => res,
                    _ = shutdown.changed() => break,
                };

                match polled {
                    Ok(updates) => {
                        for update in updates {
                            self.route(update, &buffer, &tx);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Telegram polling error: {e}");
                        tokio::select! {
                            _ = tokio::time::sleep(ERROR_PAUSE) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }

            tracing::info!("Telegram polling loop stopped");
        });

        (handle, UnboundedReceiverStream::new(rx))
    }

    fn route(
        &self,
        update: TelegramUpdate,
        buffer: &ChannelPostBuffer,
        commands: &mpsc::UnboundedSender<IncomingCommand>,
    ) {
        if let Some(post) = update.to_source_message() {
            tracing::debug!(
                "Channel post {} from {}",
                post.message_id,
                post.channel_id
            );
            buffer.push(post);
        } else if let Some(command) = update.to_command()
            && commands.send(command).is_err()
        {
            tracing::debug!("Command receiver dropped, ignoring private message");
        }
    }
}

#[async_trait]
impl DeliverySink for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn deliver(&self, recipient_id: i64, text: &str) -> Result<()> {
        self.send_message(recipient_id, text).await
    }
}

/// Cut to [`MAX_MESSAGE_CHARS`] characters, never splitting a code point.
fn fit_message(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> TelegramApiResponse<T> {
    fn into_result(self, method: &str) -> Result<Option<T>> {
        if !self.ok {
            return Err(GiftWatchError::Channel(format!(
                "Telegram API error on {method}: {}",
                self.description.unwrap_or_default()
            )));
        }
        Ok(self.result)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub channel_post: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    /// Text attached to a photo or document post.
    pub caption: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

impl TelegramMessage {
    fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    fn sent_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.date, 0).unwrap_or_else(Utc::now)
    }
}

impl TelegramUpdate {
    /// A channel post with text or caption.
    pub fn to_source_message(&self) -> Option<SourceMessage> {
        let post = self.channel_post.as_ref()?;
        let text = post.body()?;
        Some(SourceMessage {
            channel_id: post.chat.id,
            message_id: post.message_id,
            text: text.to_string(),
            timestamp: post.sent_at(),
        })
    }

    /// A private text message from a human user.
    pub fn to_command(&self) -> Option<IncomingCommand> {
        let msg = self.message.as_ref()?;
        if msg.chat.chat_type != "private" {
            return None;
        }
        let text = msg.text.as_ref()?;
        let from = msg.from.as_ref()?;

        // Skip bot messages
        if from.is_bot {
            return None;
        }

        Some(IncomingCommand {
            chat_id: msg.chat.id,
            user_id: from.id,
            text: text.clone(),
        })
    }
}
