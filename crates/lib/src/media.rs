//! Media fetcher: download a platform file link and wrap it as an inline model part.

use base64::Engine;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Binary content ready to embed in a prompt (Gemini `inlineData`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPart {
    /// Base64 (standard alphabet, padded) of the full body.
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("media download returned {0}")]
    Status(reqwest::StatusCode),
    #[error("media body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Downloads media bodies with a shared client and a size cap.
#[derive(Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new(max_bytes: u64) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, max_bytes }
    }

    /// GET `file_link`, base64 the raw body, tag it with `mime_type`. No retry.
    pub async fn fetch(&self, file_link: &str, mime_type: &str) -> Result<MediaPart, MediaError> {
        let res = self.client.get(file_link).send().await?;
        if !res.status().is_success() {
            return Err(MediaError::Status(res.status()));
        }
        if res.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(MediaError::TooLarge {
                limit: self.max_bytes,
            });
        }
        let mut body = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(MediaError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        log::debug!("media: fetched {} bytes ({})", body.len(), mime_type);
        Ok(encode_media(&body, mime_type))
    }
}

/// Wrap raw bytes as a media part.
pub fn encode_media(bytes: &[u8], mime_type: &str) -> MediaPart {
    MediaPart {
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
        mime_type: mime_type.to_string(),
    }
}
