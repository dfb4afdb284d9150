//! Model turn: load the chat's session history, send the new prompt, record the exchange.

use crate::llm::{Content, LlmError, ModelBackend, Part};
use crate::media::MediaPart;
use crate::session::SessionStore;

/// Fixed model settings for every session.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub max_output_tokens: u32,
}

impl ModelSettings {
    pub fn from_config(agents: &crate::config::AgentsConfig) -> Self {
        let model = agents.model.trim();
        let model = if model.is_empty() {
            log::warn!("agent: configured model was empty, using fallback");
            crate::config::DEFAULT_MODEL
        } else {
            model
        };
        Self {
            model: model.to_string(),
            max_output_tokens: agents.max_output_tokens,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error("model returned no text")]
    EmptyReply,
    #[error("session error: {0}")]
    Session(String),
}

/// Build the user turn: text first, optional media second.
pub fn user_turn(text: &str, media: Option<MediaPart>) -> Content {
    let mut parts = vec![Part::text(text)];
    if let Some(m) = media {
        parts.push(Part::inline(m));
    }
    Content {
        role: "user".to_string(),
        parts,
    }
}

/// Send one prompt over the chat's session and return the reply text.
/// The exchange is added to the history only when the model produced text.
pub async fn send_prompt<B: ModelBackend + ?Sized>(
    store: &SessionStore,
    chat_id: i64,
    backend: &B,
    settings: &ModelSettings,
    text: &str,
    media: Option<MediaPart>,
) -> Result<String, TurnError> {
    let session_id = store.get_or_create(chat_id).await;
    let session = store
        .get(chat_id)
        .await
        .ok_or_else(|| TurnError::Session("session not found".to_string()))?;

    let user = user_turn(text, media);
    let mut contents = session.history;
    contents.push(user.clone());

    log::debug!(
        "agent: {} turn(s) to {} for chat {}",
        contents.len(),
        settings.model,
        chat_id
    );
    let reply = backend
        .generate(&settings.model, &contents, settings.max_output_tokens)
        .await?;
    if reply.trim().is_empty() {
        return Err(TurnError::EmptyReply);
    }

    store
        .append_exchange(chat_id, &session_id, user, Content::text("model", reply.clone()))
        .await
        .map_err(TurnError::Session)?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::encode_media;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request and answers from a script.
    struct ScriptedModel {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        seen: Mutex<Vec<Vec<Content>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedModel {
        async fn generate(
            &self,
            _model: &str,
            contents: &[Content],
            _max_output_tokens: u32,
        ) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(contents.to_vec());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn settings() -> ModelSettings {
        ModelSettings {
            model: "gemini-1.5-flash".to_string(),
            max_output_tokens: 500,
        }
    }

    #[test]
    fn user_turn_puts_text_before_media() {
        let turn = user_turn("Image received", Some(encode_media(b"x", "image/jpeg")));
        assert_eq!(turn.role, "user");
        assert_eq!(turn.parts[0], Part::text("Image received"));
        assert!(matches!(turn.parts[1], Part::InlineData { .. }));
    }

    #[tokio::test]
    async fn history_accumulates_across_turns() {
        let store = SessionStore::new();
        let model = ScriptedModel::new(vec![Ok("Hi there".to_string()), Ok("Fine".to_string())]);
        let first = send_prompt(&store, 42, &model, &settings(), "Hello", None)
            .await
            .unwrap();
        assert_eq!(first, "Hi there");
        send_prompt(&store, 42, &model, &settings(), "How are you?", None)
            .await
            .unwrap();

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0], vec![Content::text("user", "Hello")]);
        assert_eq!(
            seen[1],
            vec![
                Content::text("user", "Hello"),
                Content::text("model", "Hi there"),
                Content::text("user", "How are you?"),
            ]
        );
        assert_eq!(store.created_count(), 1);
    }

    #[tokio::test]
    async fn empty_reply_leaves_history_untouched() {
        let store = SessionStore::new();
        let model = ScriptedModel::new(vec![Ok("  ".to_string())]);
        let err = send_prompt(&store, 1, &model, &settings(), "Hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::EmptyReply));
        assert!(store.get(1).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn model_error_propagates() {
        let store = SessionStore::new();
        let model = ScriptedModel::new(vec![Err(LlmError::Api("429 Too Many Requests".to_string()))]);
        let err = send_prompt(&store, 1, &model, &settings(), "Hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Model(LlmError::Api(_))));
        assert!(store.get(1).await.unwrap().history.is_empty());
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let mut agents = crate::config::AgentsConfig::default();
        agents.model = "  ".to_string();
        assert_eq!(ModelSettings::from_config(&agents).model, "gemini-1.5-flash");
    }
}
