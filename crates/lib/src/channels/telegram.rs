//! Telegram channel: long-poll getUpdates, getFile, and sendMessage via Bot API.

use crate::channels::inbound::{FileRef, InboundMessage, MessageKind};
use crate::channels::registry::ChannelHandle;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const CHANNEL_ID: &str = "telegram";
const LONG_POLL_TIMEOUT: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram bot token not configured")]
    NotConfigured,
    #[error("telegram request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("telegram api error: {0}")]
    Api(String),
}

/// Bot API envelope: `{ "ok": bool, "result": ..., "description": ... }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    /// Size variants, smallest first.
    #[serde(default)]
    pub photo: Option<Vec<TelegramFile>>,
    #[serde(default)]
    pub document: Option<TelegramFile>,
    #[serde(default)]
    pub video: Option<TelegramFile>,
    #[serde(default)]
    pub audio: Option<TelegramFile>,
    #[serde(default)]
    pub voice: Option<TelegramFile>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Any file-bearing object (PhotoSize, Document, Video, Audio, Voice); only the fields we use.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramFile {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl From<&TelegramFile> for FileRef {
    fn from(f: &TelegramFile) -> Self {
        FileRef::new(f.file_id.clone(), f.mime_type.clone())
    }
}

impl TelegramMessage {
    /// Classify into exactly one kind. Photo wins over text, then document, video, audio, voice.
    pub fn kind(&self) -> MessageKind {
        if let Some(ref sizes) = self.photo {
            if !sizes.is_empty() {
                return MessageKind::Photo(sizes.iter().map(FileRef::from).collect());
            }
        }
        if let Some(ref text) = self.text {
            return MessageKind::Text(text.clone());
        }
        if let Some(ref f) = self.document {
            return MessageKind::Document(f.into());
        }
        if let Some(ref f) = self.video {
            return MessageKind::Video(f.into());
        }
        if let Some(ref f) = self.audio {
            return MessageKind::Audio(f.into());
        }
        if let Some(ref f) = self.voice {
            return MessageKind::Voice(f.into());
        }
        MessageKind::Other
    }

    pub fn to_inbound(&self) -> InboundMessage {
        InboundMessage {
            channel_id: CHANNEL_ID.to_string(),
            chat_id: self.chat.id,
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: Option<String>,
    api_base: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: Option<String>) -> Self {
        Self::with_api_base(token, TELEGRAM_API_BASE)
    }

    /// Connector against a custom Bot API server (tests, local bot API).
    pub fn with_api_base(token: Option<String>, api_base: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT + 30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            id: CHANNEL_ID.to_string(),
            token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            running: AtomicBool::new(false),
            client,
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> Result<String, TelegramError> {
        let token = self.token.as_ref().ok_or(TelegramError::NotConfigured)?;
        Ok(format!("{}/bot{}/{}", self.api_base, token, method))
    }

    /// Check HTTP status and the `ok` flag; return `result`.
    async fn read_result<T: serde::de::DeserializeOwned>(
        method: &str,
        res: reqwest::Response,
    ) -> Result<Option<T>, TelegramError> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TelegramError::Api(format!("{} failed: {} {}", method, status, body)));
        }
        let data: ApiResponse<T> = res.json().await?;
        if !data.ok {
            return Err(TelegramError::Api(format!(
                "{} returned ok: false: {}",
                method,
                data.description.unwrap_or_default()
            )));
        }
        Ok(data.result)
    }

    /// Start the getUpdates long-poll loop and forward messages to the workers. Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), TelegramError> {
        let url = format!("{}?timeout={}", self.method_url("getUpdates")?, LONG_POLL_TIMEOUT);
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self.client.get(&url).send().await?;
        let updates: Vec<TelegramUpdate> = Self::read_result("getUpdates", res)
            .await?
            .unwrap_or_default();
        let next_offset = updates
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1)
            .or(offset);
        Ok((updates, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), TelegramError> {
        let api_url = self.method_url("setWebhook")?;
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        let res = self.client.post(&api_url).json(&body).send().await?;
        Self::read_result::<serde_json::Value>("setWebhook", res).await?;
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let url = self.method_url("deleteWebhook")?;
        let res = self.client.post(&url).send().await?;
        Self::read_result::<serde_json::Value>("deleteWebhook", res).await?;
        Ok(())
    }

    /// Send a text message to a chat via sendMessage API.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let url = self.method_url("sendMessage")?;
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let res = self.client.post(&url).json(&body).send().await?;
        Self::read_result::<serde_json::Value>("sendMessage", res).await?;
        Ok(())
    }

    /// getFile, then build the time-limited download URL `<base>/file/bot<token>/<file_path>`.
    pub async fn file_link(&self, file_id: &str) -> Result<String, TelegramError> {
        let url = self.method_url("getFile")?;
        let res = self
            .client
            .get(&url)
            .query(&[("file_id", file_id)])
            .send()
            .await?;
        let info: Option<FileInfo> = Self::read_result("getFile", res).await?;
        let file_path = info
            .and_then(|i| i.file_path)
            .ok_or_else(|| TelegramError::Api("getFile returned no file_path".to_string()))?;
        let token = self.token.as_ref().ok_or(TelegramError::NotConfigured)?;
        Ok(format!("{}/file/bot{}/{}", self.api_base, token, file_path))
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundMessage>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next;
                for u in updates {
                    let Some(ref msg) = u.message else { continue };
                    if inbound_tx.send(msg.to_inbound()).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("telegram getUpdates error: {}", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String> {
        TelegramChannel::send_message(self, chat_id, text)
            .await
            .map_err(|e| e.to_string())
    }

    async fn file_link(&self, file_id: &str) -> Result<String, String> {
        TelegramChannel::file_link(self, file_id)
            .await
            .map_err(|e| e.to_string())
    }
}
