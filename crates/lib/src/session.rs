//! Conversation sessions with the model, one per chat.
//!
//! A session is created on the first message from a chat and holds that chat's
//! ordered history (user/model turns). Sessions are dropped on `/new` or when
//! the chat's worker stops after the idle timeout. Nothing is persisted.

use crate::llm::Content;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// A session: id and ordered history.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub history: Vec<Content>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: format!("sess-{}", uuid::Uuid::new_v4()),
            history: Vec::new(),
        }
    }
}

/// In-memory store of sessions keyed by chat id.
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<i64, Session>>>,
    created: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            created: AtomicU64::new(0),
        }
    }

    /// Return the chat's session id, creating the session on first use.
    pub async fn get_or_create(&self, chat_id: i64) -> SessionId {
        if let Some(s) = self.inner.read().await.get(&chat_id) {
            return s.id.clone();
        }
        let mut g = self.inner.write().await;
        if let Some(s) = g.get(&chat_id) {
            return s.id.clone();
        }
        let session = Session::new();
        let id = session.id.clone();
        g.insert(chat_id, session);
        self.created.fetch_add(1, Ordering::SeqCst);
        log::debug!("session: created {} for chat {}", id, chat_id);
        id
    }

    /// Return a clone of the chat's session if it exists.
    pub async fn get(&self, chat_id: i64) -> Option<Session> {
        self.inner.read().await.get(&chat_id).cloned()
    }

    /// The chat's current session id, if any.
    pub async fn current_id(&self, chat_id: i64) -> Option<SessionId> {
        self.inner.read().await.get(&chat_id).map(|s| s.id.clone())
    }

    /// Drop the chat's session; returns the removed id.
    pub async fn remove(&self, chat_id: i64) -> Option<SessionId> {
        self.inner.write().await.remove(&chat_id).map(|s| s.id)
    }

    /// Drop the chat's session only if it is still `session_id`. Returns true when removed.
    pub async fn remove_if(&self, chat_id: i64, session_id: &str) -> bool {
        let mut g = self.inner.write().await;
        if g.get(&chat_id).is_some_and(|s| s.id == session_id) {
            g.remove(&chat_id);
            true
        } else {
            false
        }
    }

    /// Append a completed exchange (user turn then model turn). Fails if the
    /// session was dropped or replaced since `session_id` was handed out.
    pub async fn append_exchange(
        &self,
        chat_id: i64,
        session_id: &str,
        user: Content,
        model: Content,
    ) -> Result<(), String> {
        let mut g = self.inner.write().await;
        let session = g
            .get_mut(&chat_id)
            .filter(|s| s.id == session_id)
            .ok_or_else(|| "session not found".to_string())?;
        session.history.push(user);
        session.history.push(model);
        Ok(())
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Sessions ever created by this store.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}
