//! Gateway HTTP server and relay wiring (single port).

use crate::agent::ModelSettings;
use crate::channels::{
    ChannelHandle, ChannelRegistry, InboundMessage, TelegramChannel, TelegramUpdate,
};
use crate::config::{self, Config};
use crate::dispatcher::Dispatcher;
use crate::llm::GeminiClient;
use crate::media::MediaFetcher;
use crate::session::SessionStore;
use crate::workers::ChatWorkers;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

type ChannelTasks = Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub session_store: Arc<SessionStore>,
    /// Webhook updates are queued here directly; the getUpdates loop reaches it through the inbound pump.
    pub workers: Arc<ChatWorkers>,
}

/// Routes: `GET /` health and `POST /telegram/webhook`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
}

/// Run the relay: Telegram channel, per-chat workers, and the HTTP listener. Blocks until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    let api_key = config::resolve_api_key(&config).context(
        "Gemini API key missing (set API_KEY or GEMINI_API_KEY, or agents.apiKey in config)",
    )?;
    let bot_token = config::resolve_telegram_token(&config).context(
        "Telegram bot token missing (set TELEGRAM_BOT_TOKEN or channels.telegram.botToken in config)",
    )?;

    let config = Arc::new(config);
    let settings = ModelSettings::from_config(&config.agents);
    log::info!(
        "model {} (maxOutputTokens {})",
        settings.model,
        settings.max_output_tokens
    );

    let session_store = Arc::new(SessionStore::new());
    let backend = Arc::new(GeminiClient::new(api_key, config.agents.base_url.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        session_store.clone(),
        backend,
        MediaFetcher::new(config.media.max_bytes),
        settings,
        config.agents.empty_reply_message.clone(),
    ));
    let channel_registry = Arc::new(ChannelRegistry::new());
    let workers = Arc::new(ChatWorkers::new(
        dispatcher,
        channel_registry.clone(),
        Duration::from_secs(config.sessions.idle_timeout_secs),
    ));
    let channel_tasks: ChannelTasks = Arc::new(tokio::sync::RwLock::new(Vec::new()));
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);

    // Ends once every sender (the getUpdates loop) is gone.
    let inbound_pump = {
        let workers = workers.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                workers.submit(msg);
            }
        })
    };

    let api_base = config::resolve_telegram_api_base(&config);
    let telegram = Arc::new(TelegramChannel::with_api_base(Some(bot_token), api_base));
    channel_registry
        .register(telegram.id().to_string(), telegram.clone())
        .await;
    let webhook_channel: Option<Arc<TelegramChannel>> =
        if let Some(ref url) = config.channels.telegram.webhook_url {
            drop(inbound_tx);
            let secret = config.channels.telegram.webhook_secret.as_deref();
            telegram
                .set_webhook(url, secret)
                .await
                .with_context(|| format!("registering telegram webhook {}", url))?;
            log::info!("telegram channel registered (webhook mode): {}", url);
            Some(telegram)
        } else {
            if let Err(e) = telegram.delete_webhook().await {
                log::debug!("telegram delete_webhook before polling: {}", e);
            }
            let handle = telegram.start_inbound(inbound_tx);
            channel_tasks.write().await.push(handle);
            log::info!("telegram channel registered and getUpdates loop started");
            None
        };

    let app = router(GatewayState {
        config: config.clone(),
        session_store,
        workers: workers.clone(),
    });

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            inbound_pump,
            webhook_channel,
            workers,
        ))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Completes on SIGINT or SIGTERM after stopping channels, removing the webhook if one was set,
/// awaiting channel tasks and the inbound pump, and letting chat workers finish their queues.
/// Webhook POSTs that arrive after the workers close get 503 so Telegram redelivers them.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: ChannelTasks,
    inbound_pump: JoinHandle<()>,
    webhook_channel: Option<Arc<TelegramChannel>>,
    workers: Arc<ChatWorkers>,
) {
    wait_for_signal().await;
    log::info!("shutdown signal received, stopping channels");

    for id in channel_registry.ids().await {
        if let Some(handle) = channel_registry.get(&id).await {
            handle.stop();
        }
    }

    if let Some(t) = webhook_channel {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    let _ = inbound_pump.await;
    log::info!("channel tasks finished");

    workers.shutdown().await;
}

/// POST /telegram/webhook: verify the optional secret, queue the update's message.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            log::debug!("telegram webhook: unparseable update: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    let Some(ref msg) = update.message else {
        return StatusCode::OK;
    };
    if !state.workers.submit(msg.to_inbound()) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "sessions": state.session_store.len().await,
        "activeChats": state.workers.active(),
    }))
}
