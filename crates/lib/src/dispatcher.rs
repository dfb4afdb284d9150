//! Message dispatcher: classify an inbound message, fetch its media, prompt the
//! model over the chat's session, and relay the reply.
//!
//! Every failure comes back here as a [`Failure`] and [`Failure::user_message`]
//! is the one place that decides whether the chat hears about it.

use crate::agent::{self, ModelSettings, TurnError};
use crate::channels::{ChannelHandle, InboundMessage, MessageKind};
use crate::llm::ModelBackend;
use crate::media::{MediaFetcher, MediaPart};
use crate::relay;
use crate::session::SessionStore;
use std::sync::Arc;

pub const UNSUPPORTED_MESSAGE: &str =
    "Unsupported message type received. Please send a text message, photo, document, video, or audio.";
pub const MODEL_FAILURE_MESSAGE: &str = "Oops, an error occurred. Please try again later.";
pub const SESSION_RESET_MESSAGE: &str =
    "Session restarted. Your next message starts a new conversation.";

/// Text that starts a new session for the chat. Case-insensitive.
pub const NEW_SESSION_TRIGGER: &str = "/new";

/// Message kinds that carry a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Audio,
    Voice,
}

impl MediaKind {
    /// Text part sent ahead of the media.
    pub fn prompt(self) -> &'static str {
        match self {
            MediaKind::Photo => "Image received",
            MediaKind::Document => "Document received",
            MediaKind::Video => "Video received",
            MediaKind::Audio => "Audio received",
            MediaKind::Voice => "Voice message received",
        }
    }

    /// MIME used when the platform did not declare one.
    pub fn default_mime(self) -> &'static str {
        match self {
            MediaKind::Photo => "image/jpeg",
            MediaKind::Document => "application/octet-stream",
            MediaKind::Video => "video/mp4",
            MediaKind::Audio => "audio/mpeg",
            MediaKind::Voice => "audio/ogg",
        }
    }

    /// Photos are always sent as JPEG; other kinds keep the declared type.
    pub fn resolve_mime(self, declared: Option<&str>) -> String {
        match (self, declared.map(str::trim).filter(|m| !m.is_empty())) {
            (MediaKind::Photo, _) | (_, None) => self.default_mime().to_string(),
            (_, Some(m)) => m.to_string(),
        }
    }

    /// Told to the chat when the file could not be fetched. Photos stay silent.
    pub fn fetch_failure_message(self) -> Option<&'static str> {
        match self {
            MediaKind::Photo => None,
            MediaKind::Document => Some("Failed to process the document. Please try again."),
            MediaKind::Video => Some("Failed to process the video. Please try again."),
            MediaKind::Audio => Some("Failed to process the audio. Please try again."),
            MediaKind::Voice => Some("Failed to process the voice message. Please try again."),
        }
    }
}

/// What to do with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Prompt with the text only.
    Prompt(String),
    /// Fetch the file, then prompt with the kind's text plus the media part.
    Media {
        kind: MediaKind,
        file_id: String,
        mime_type: String,
    },
    ResetSession,
    Unsupported,
}

/// Decide the route for a message kind.
pub fn classify(kind: &MessageKind) -> Route {
    let media = |kind: MediaKind, file: &crate::channels::FileRef| Route::Media {
        kind,
        file_id: file.file_id.clone(),
        mime_type: kind.resolve_mime(file.mime_type.as_deref()),
    };
    match kind {
        MessageKind::Text(text) if text.trim().eq_ignore_ascii_case(NEW_SESSION_TRIGGER) => {
            Route::ResetSession
        }
        MessageKind::Text(text) => Route::Prompt(text.clone()),
        // Largest variant is last.
        MessageKind::Photo(sizes) => match sizes.last() {
            Some(largest) => media(MediaKind::Photo, largest),
            None => Route::Unsupported,
        },
        MessageKind::Document(f) => media(MediaKind::Document, f),
        MessageKind::Video(f) => media(MediaKind::Video, f),
        MessageKind::Audio(f) => media(MediaKind::Audio, f),
        MessageKind::Voice(f) => media(MediaKind::Voice, f),
        MessageKind::Other => Route::Unsupported,
    }
}

/// Why a message did not produce a model reply.
#[derive(Debug)]
pub enum Failure {
    /// File link resolution or download failed.
    Fetch { kind: MediaKind, reason: String },
    /// Network error, API rejection (quota included), or blocked prompt.
    Model(String),
    /// The model produced no text.
    EmptyReply,
}

impl Failure {
    /// The text relayed to the chat for this failure, if any.
    pub fn user_message(&self, empty_reply_message: Option<&str>) -> Option<String> {
        match self {
            Failure::Fetch { kind, .. } => kind.fetch_failure_message().map(str::to_string),
            Failure::Model(_) => Some(MODEL_FAILURE_MESSAGE.to_string()),
            Failure::EmptyReply => empty_reply_message
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        }
    }

    fn log(&self, chat_id: i64) {
        match self {
            Failure::Fetch { kind, reason } => {
                log::warn!("dispatch: fetching {:?} for chat {} failed: {}", kind, chat_id, reason)
            }
            Failure::Model(reason) => {
                log::warn!("dispatch: model call for chat {} failed: {}", chat_id, reason)
            }
            Failure::EmptyReply => log::warn!(
                "dispatch: model returned no text for chat {}; this is usually model limitations or API rate limits",
                chat_id
            ),
        }
    }
}

/// Result of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The model's reply was delivered.
    Replied,
    /// A fixed message (guidance, failure notice, reset confirmation) was delivered.
    Notified,
    /// Nothing was sent to the chat.
    Silent,
    /// Something should have been sent but delivery failed.
    Undelivered,
}

/// Drives fetch → prompt → relay for each message.
pub struct Dispatcher {
    sessions: Arc<SessionStore>,
    backend: Arc<dyn ModelBackend>,
    fetcher: MediaFetcher,
    settings: ModelSettings,
    empty_reply_message: Option<String>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionStore>,
        backend: Arc<dyn ModelBackend>,
        fetcher: MediaFetcher,
        settings: ModelSettings,
        empty_reply_message: Option<String>,
    ) -> Self {
        Self {
            sessions,
            backend,
            fetcher,
            settings,
            empty_reply_message,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one inbound message end to end.
    pub async fn dispatch(&self, channel: &dyn ChannelHandle, msg: &InboundMessage) -> Outcome {
        let chat_id = msg.chat_id;
        let route = classify(&msg.kind);
        log::debug!("dispatch: chat {} {} -> {}", chat_id, msg.kind.label(), route_name(&route));
        match route {
            Route::Unsupported => notify(channel, chat_id, UNSUPPORTED_MESSAGE).await,
            Route::ResetSession => {
                if let Some(old) = self.sessions.remove(chat_id).await {
                    log::info!("dispatch: chat {} dropped session {}", chat_id, old);
                }
                notify(channel, chat_id, SESSION_RESET_MESSAGE).await
            }
            Route::Prompt(text) => self.prompt(channel, chat_id, &text, None).await,
            Route::Media {
                kind,
                file_id,
                mime_type,
            } => match self.fetch(channel, &file_id, &mime_type).await {
                Ok(part) => self.prompt(channel, chat_id, kind.prompt(), Some(part)).await,
                Err(reason) => self.fail(channel, chat_id, Failure::Fetch { kind, reason }).await,
            },
        }
    }

    async fn fetch(
        &self,
        channel: &dyn ChannelHandle,
        file_id: &str,
        mime_type: &str,
    ) -> Result<MediaPart, String> {
        let link = channel.file_link(file_id).await?;
        self.fetcher
            .fetch(&link, mime_type)
            .await
            .map_err(|e| e.to_string())
    }

    async fn prompt(
        &self,
        channel: &dyn ChannelHandle,
        chat_id: i64,
        text: &str,
        media: Option<MediaPart>,
    ) -> Outcome {
        let result = agent::send_prompt(
            &self.sessions,
            chat_id,
            self.backend.as_ref(),
            &self.settings,
            text,
            media,
        )
        .await;
        match result {
            Ok(reply) => {
                if relay::relay(channel, chat_id, &reply).await {
                    Outcome::Replied
                } else {
                    Outcome::Undelivered
                }
            }
            Err(TurnError::EmptyReply) => self.fail(channel, chat_id, Failure::EmptyReply).await,
            Err(e) => self.fail(channel, chat_id, Failure::Model(e.to_string())).await,
        }
    }

    async fn fail(&self, channel: &dyn ChannelHandle, chat_id: i64, failure: Failure) -> Outcome {
        failure.log(chat_id);
        match failure.user_message(self.empty_reply_message.as_deref()) {
            Some(text) => notify(channel, chat_id, &text).await,
            None => Outcome::Silent,
        }
    }
}

async fn notify(channel: &dyn ChannelHandle, chat_id: i64, text: &str) -> Outcome {
    if relay::relay(channel, chat_id, text).await {
        Outcome::Notified
    } else {
        Outcome::Undelivered
    }
}

fn route_name(route: &Route) -> &'static str {
    match route {
        Route::Prompt(_) => "prompt",
        Route::Media { .. } => "media",
        Route::ResetSession => "reset",
        Route::Unsupported => "unsupported",
    }
}
