//! Gemini API client (`generateContent`, https://generativelanguage.googleapis.com/v1beta).
//! Non-streaming: one request carries the whole conversation and returns one completion.

use crate::llm::{Content, LlmError, ModelBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Client for the Gemini HTTP API.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            api_key: api_key.into(),
            base_url,
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// POST /models/{model}:generateContent: returns the concatenated text of the first candidate.
    pub async fn generate_content(
        &self,
        model: &str,
        contents: &[Content],
        max_output_tokens: u32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = GenerateContentRequest {
            contents,
            generation_config: GenerationConfig { max_output_tokens },
        };
        let res = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: GenerateContentResponse = res.json().await?;
        data.text()
    }
}

#[async_trait]
impl ModelBackend for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        contents: &[Content],
        max_output_tokens: u32,
    ) -> Result<String, LlmError> {
        self.generate_content(model, contents, max_output_tokens).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate. A blocked prompt is an error; no candidates is an empty reply.
    fn text(&self) -> Result<String, LlmError> {
        if self.candidates.is_empty() {
            if let Some(reason) = self
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.as_deref())
            {
                return Err(LlmError::Blocked(reason.to_string()));
            }
            return Ok(String::new());
        }
        let parts = self.candidates[0]
            .content
            .as_ref()
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[]);
        Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Part;
    use crate::media::encode_media;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "totalTokenCount": 12 }
        })
    }

    #[tokio::test]
    async fn sends_history_media_and_generation_limit() {
        let server = MockServer::start().await;
        let media = encode_media(b"jpg", "image/jpeg");
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "KEY"))
            .and(body_json(json!({
                "contents": [
                    { "role": "user", "parts": [{ "text": "Hello" }] },
                    { "role": "model", "parts": [{ "text": "Hi there" }] },
                    { "role": "user", "parts": [
                        { "text": "Image received" },
                        { "inlineData": { "data": "anBn", "mimeType": "image/jpeg" } }
                    ] }
                ],
                "generationConfig": { "maxOutputTokens": 500 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("A cat.")))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new("KEY", Some(server.uri()));
        let contents = vec![
            Content::text("user", "Hello"),
            Content::text("model", "Hi there"),
            Content {
                role: "user".to_string(),
                parts: vec![Part::text("Image received"), Part::inline(media)],
            },
        ];
        let text = client
            .generate_content("gemini-1.5-flash", &contents, 500)
            .await
            .unwrap();
        assert_eq!(text, "A cat.");
    }

    #[tokio::test]
    async fn concatenates_text_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Hi " }, { "text": "there" }] } }]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("KEY", Some(server.uri()));
        let text = client
            .generate_content("m", &[Content::text("user", "Hello")], 10)
            .await
            .unwrap();
        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn quota_rejection_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "code": 429, "status": "RESOURCE_EXHAUSTED" }
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("KEY", Some(server.uri()));
        let err = client
            .generate_content("m", &[Content::text("user", "Hello")], 10)
            .await
            .unwrap_err();
        match err {
            LlmError::Api(msg) => assert!(msg.contains("429")),
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_candidates_is_empty_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("KEY", Some(server.uri()));
        let text = client
            .generate_content("m", &[Content::text("user", "Hello")], 10)
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn blocked_prompt_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("KEY", Some(server.uri()));
        let err = client
            .generate_content("m", &[Content::text("user", "Hello")], 10)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Blocked(ref r) if r == "SAFETY"));
    }
}
