//! Per-chat serialized processing.
//!
//! Each chat gets one worker task fed by its own queue, so messages within a
//! chat are handled strictly in arrival order while different chats proceed
//! concurrently. A worker that sees no message for the idle timeout stops and
//! drops the session it was serving. After shutdown no new work is accepted.

use crate::channels::{ChannelRegistry, InboundMessage};
use crate::dispatcher::Dispatcher;
use crate::session::{SessionId, SessionStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct QueueMap {
    senders: HashMap<i64, mpsc::UnboundedSender<InboundMessage>>,
    closed: bool,
}

type Queues = Arc<Mutex<QueueMap>>;

/// Routes inbound messages to one worker per chat.
pub struct ChatWorkers {
    queues: Queues,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Arc<Dispatcher>,
    channels: Arc<ChannelRegistry>,
    idle_timeout: Duration,
}

impl ChatWorkers {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        channels: Arc<ChannelRegistry>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            queues: Arc::new(Mutex::new(QueueMap::default())),
            tasks: Mutex::new(Vec::new()),
            dispatcher,
            channels,
            idle_timeout,
        }
    }

    /// Queue a message on its chat's worker, starting the worker if needed.
    /// Returns false when the message was not accepted (after shutdown).
    pub fn submit(&self, msg: InboundMessage) -> bool {
        let chat_id = msg.chat_id;
        let Ok(mut queues) = self.queues.lock() else {
            log::warn!("workers: queue map poisoned, dropping message for chat {}", chat_id);
            return false;
        };
        if queues.closed {
            log::warn!("workers: shutting down, refusing message for chat {}", chat_id);
            return false;
        }
        // Sends happen under the map lock so an idle worker can retire without losing messages.
        let msg = match queues.senders.get(&chat_id) {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return true,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(msg).is_err() {
            return false;
        }
        queues.senders.insert(chat_id, tx);
        drop(queues);

        log::debug!("workers: starting worker for chat {}", chat_id);
        let handle = tokio::spawn(run_worker(
            chat_id,
            rx,
            self.queues.clone(),
            self.dispatcher.clone(),
            self.channels.clone(),
            self.idle_timeout,
        ));
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }
        true
    }

    /// Number of chats with a running worker.
    pub fn active(&self) -> usize {
        self.queues.lock().map(|q| q.senders.len()).unwrap_or(0)
    }

    /// True once `shutdown` has started.
    pub fn is_closed(&self) -> bool {
        self.queues.lock().map(|q| q.closed).unwrap_or(true)
    }

    /// Refuse new messages, close every queue, and wait for workers to finish what they already received.
    pub async fn shutdown(&self) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.closed = true;
            queues.senders.clear();
        }
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        futures_util::future::join_all(handles).await;
        log::info!("workers: all chat workers stopped");
    }
}

async fn run_worker(
    chat_id: i64,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    queues: Queues,
    dispatcher: Arc<Dispatcher>,
    channels: Arc<ChannelRegistry>,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(msg)) => process(&dispatcher, &channels, msg).await,
            Ok(None) => break,
            Err(_) => {
                // While this worker's queue is registered no other task touches the chat's session.
                let owned = dispatcher.sessions().current_id(chat_id).await;
                let retired = match queues.lock() {
                    Ok(mut q) if rx.is_empty() => {
                        q.senders.remove(&chat_id);
                        true
                    }
                    Ok(_) => false,
                    Err(_) => true,
                };
                if retired {
                    drop_owned_session(dispatcher.sessions(), chat_id, owned).await;
                    break;
                }
            }
        }
    }
    log::debug!("workers: worker for chat {} stopped", chat_id);
}

/// Remove the session a retiring worker served. A successor worker may already
/// have started a new session for the chat; that one is kept.
async fn drop_owned_session(sessions: &SessionStore, chat_id: i64, owned: Option<SessionId>) {
    let Some(id) = owned else {
        return;
    };
    if sessions.remove_if(chat_id, &id).await {
        log::info!("workers: chat {} idle, dropped session {}", chat_id, id);
    } else {
        log::debug!("workers: chat {} session {} already replaced", chat_id, id);
    }
}

async fn process(dispatcher: &Dispatcher, channels: &ChannelRegistry, msg: InboundMessage) {
    let Some(handle) = channels.get(&msg.channel_id).await else {
        log::warn!(
            "workers: no channel {} registered, dropping message for chat {}",
            msg.channel_id,
            msg.chat_id
        );
        return;
    };
    let outcome = dispatcher.dispatch(handle.as_ref(), &msg).await;
    log::debug!("workers: chat {} {} -> {:?}", msg.chat_id, msg.kind.label(), outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ModelSettings;
    use crate::channels::{ChannelHandle, MessageKind};
    use crate::llm::{Content, LlmError, ModelBackend, Part};
    use crate::media::MediaFetcher;
    use async_trait::async_trait;

    struct Outbox {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ChannelHandle for Outbox {
        fn id(&self) -> &str {
            "telegram"
        }

        fn stop(&self) {}

        async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    /// Echoes the prompt after `pause`; prompts starting with "slow" take longer.
    struct Echo {
        pause: Duration,
    }

    #[async_trait]
    impl ModelBackend for Echo {
        async fn generate(
            &self,
            _model: &str,
            contents: &[Content],
            _max_output_tokens: u32,
        ) -> Result<String, LlmError> {
            let text = match contents.last().and_then(|c| c.parts.first()) {
                Some(Part::Text { text }) => text.clone(),
                _ => String::new(),
            };
            if text.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(100)).await;
            } else if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
            Ok(format!("echo: {}", text))
        }
    }

    async fn setup(idle: Duration) -> (ChatWorkers, Arc<Outbox>, Arc<SessionStore>) {
        setup_with_pause(idle, Duration::ZERO).await
    }

    async fn setup_with_pause(
        idle: Duration,
        pause: Duration,
    ) -> (ChatWorkers, Arc<Outbox>, Arc<SessionStore>) {
        let outbox = Arc::new(Outbox {
            sent: Mutex::new(Vec::new()),
        });
        let channels = Arc::new(ChannelRegistry::new());
        channels.register("telegram".to_string(), outbox.clone()).await;
        let sessions = Arc::new(SessionStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone(),
            Arc::new(Echo { pause }),
            MediaFetcher::new(1024),
            ModelSettings {
                model: "m".to_string(),
                max_output_tokens: 10,
            },
            None,
        ));
        (ChatWorkers::new(dispatcher, channels, idle), outbox, sessions)
    }

    fn text(chat_id: i64, body: &str) -> InboundMessage {
        InboundMessage {
            channel_id: "telegram".to_string(),
            chat_id,
            kind: MessageKind::Text(body.to_string()),
        }
    }

    #[tokio::test]
    async fn messages_within_a_chat_stay_ordered() {
        let (workers, outbox, _) = setup(Duration::from_secs(60)).await;
        workers.submit(text(1, "slow first"));
        workers.submit(text(1, "second"));
        workers.submit(text(2, "other chat"));
        assert_eq!(workers.active(), 2);
        workers.shutdown().await;

        let sent = outbox.sent.lock().unwrap().clone();
        let chat1: Vec<_> = sent.iter().filter(|(c, _)| *c == 1).map(|(_, t)| t.as_str()).collect();
        assert_eq!(chat1, vec!["echo: slow first", "echo: second"]);
        // Chat 2 is not stuck behind chat 1's slow message.
        let pos2 = sent.iter().position(|(c, _)| *c == 2).unwrap();
        let pos1 = sent.iter().position(|(c, _)| *c == 1).unwrap();
        assert!(pos2 < pos1);
    }

    #[tokio::test]
    async fn idle_worker_retires_and_drops_session() {
        let (workers, outbox, sessions) = setup(Duration::from_millis(50)).await;
        workers.submit(text(9, "hello"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(workers.active(), 0);
        assert!(sessions.get(9).await.is_none());
        assert_eq!(outbox.sent.lock().unwrap().len(), 1);

        // A later message starts a fresh worker and session.
        workers.submit(text(9, "again"));
        workers.shutdown().await;
        assert_eq!(sessions.created_count(), 2);
        assert_eq!(outbox.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_channel_drops_message() {
        let (workers, outbox, sessions) = setup(Duration::from_secs(60)).await;
        let mut msg = text(4, "hello");
        msg.channel_id = "matrix".to_string();
        workers.submit(msg);
        workers.shutdown().await;
        assert!(outbox.sent.lock().unwrap().is_empty());
        assert_eq!(sessions.created_count(), 0);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_refused() {
        let (workers, outbox, sessions) = setup(Duration::from_secs(60)).await;
        assert!(workers.submit(text(1, "before")));
        workers.shutdown().await;
        assert!(workers.is_closed());

        assert!(!workers.submit(text(1, "after")));
        assert_eq!(workers.active(), 0);
        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![(1, "echo: before".to_string())]);
        assert_eq!(sessions.created_count(), 1);
    }

    #[tokio::test]
    async fn retiring_worker_keeps_successor_session() {
        let sessions = SessionStore::new();
        let served = sessions.get_or_create(3).await;
        // A successor worker replaced the session before the retiring one cleaned up.
        sessions.remove(3).await;
        let successor = sessions.get_or_create(3).await;

        drop_owned_session(&sessions, 3, Some(served)).await;
        assert_eq!(sessions.current_id(3).await, Some(successor.clone()));

        drop_owned_session(&sessions, 3, Some(successor)).await;
        assert!(sessions.current_id(3).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bursts_across_idle_retirement_are_all_answered() {
        let (workers, outbox, _) =
            setup_with_pause(Duration::from_millis(1), Duration::from_millis(3)).await;
        let total = 400;
        for i in 0..total {
            assert!(workers.submit(text(i % 8, "ping")));
            if i % 16 == 15 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        workers.shutdown().await;

        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), total as usize);
        let failed: Vec<_> = sent.iter().filter(|(_, t)| t != "echo: ping").collect();
        assert!(failed.is_empty(), "{:?}", failed);
    }
}
