//! Inbound message from a channel: delivered to the per-chat workers for dispatch.

/// Reference to a file held by the platform, plus the MIME type it declared (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: String,
    pub mime_type: Option<String>,
}

impl FileRef {
    pub fn new(file_id: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            file_id: file_id.into(),
            mime_type,
        }
    }
}

/// What the message carries. Exactly one kind per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text(String),
    /// Size variants in the platform's order (smallest first).
    Photo(Vec<FileRef>),
    Document(FileRef),
    Video(FileRef),
    Audio(FileRef),
    Voice(FileRef),
    Other,
}

impl MessageKind {
    /// Short name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Text(_) => "text",
            MessageKind::Photo(_) => "photo",
            MessageKind::Document(_) => "document",
            MessageKind::Video(_) => "video",
            MessageKind::Audio(_) => "audio",
            MessageKind::Voice(_) => "voice",
            MessageKind::Other => "other",
        }
    }
}

/// A message from a channel, consumed once by the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub chat_id: i64,
    pub kind: MessageKind,
}
