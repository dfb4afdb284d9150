//! Model abstraction and the Gemini client.
//!
//! `ModelBackend` is the seam the model turn talks to; `GeminiClient` is the production backend.

mod gemini;

use crate::media::MediaPart;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gemini::GeminiClient;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model api error: {0}")]
    Api(String),
    #[error("prompt blocked: {0}")]
    Blocked(String),
}

/// One conversation turn: role ("user" | "model") and ordered parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    /// Single text part turn.
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part::text(text)],
        }
    }
}

/// Prompt segment: plain text or inline binary data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: MediaPart,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn inline(media: MediaPart) -> Self {
        Part::InlineData { inline_data: media }
    }
}

/// Generates one completion for a conversation.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
        max_output_tokens: u32,
    ) -> Result<String, LlmError>;
}
