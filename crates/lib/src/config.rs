//! Configuration types and loading.
//!
//! Config is loaded once at startup from a JSON file (e.g. `~/.gembot/config.json`)
//! and environment. Secrets (Gemini API key, Telegram bot token) are normally
//! supplied through the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (e.g. Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Model settings (Gemini credentials, model id, generation limit).
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Per-chat session lifetime.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Media download limits.
    #[serde(default)]
    pub media: MediaConfig,
}

/// HTTP listener bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 5000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    5000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Per-channel config (e.g. Telegram bot token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
    /// Bot API server (default https://api.telegram.org). Overridden by TELEGRAM_API_BASE env.
    pub api_base: Option<String>,
}

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 500;

/// Gemini settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Gemini API key. Overridden by API_KEY or GEMINI_API_KEY env.
    pub api_key: Option<String>,
    /// Model id passed to generateContent (default "gemini-1.5-flash").
    #[serde(default = "default_model")]
    pub model: String,
    /// generationConfig.maxOutputTokens (default 500).
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Override the Gemini API base URL (tests, proxies).
    pub base_url: Option<String>,
    /// Text relayed when the model returns an empty reply. Unset keeps the chat silent.
    pub empty_reply_message: Option<String>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_output_tokens() -> u32 {
    DEFAULT_MAX_OUTPUT_TOKENS
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
            base_url: None,
            empty_reply_message: None,
        }
    }
}

/// Session eviction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Seconds without messages before a chat's worker stops and its session is dropped (default 3600).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Media fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    /// Largest media body accepted, in bytes (default 20 MiB, the Bot API download cap).
    #[serde(default = "default_media_max_bytes")]
    pub max_bytes: u64,
}

fn default_media_max_bytes() -> u64 {
    20 * 1024 * 1024
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_media_max_bytes(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    non_empty_env("TELEGRAM_BOT_TOKEN")
        .or_else(|| non_empty(config.channels.telegram.bot_token.as_ref()))
}

/// Resolve the Bot API base URL: env TELEGRAM_API_BASE, then config, then the public server.
pub fn resolve_telegram_api_base(config: &Config) -> String {
    non_empty_env("TELEGRAM_API_BASE")
        .or_else(|| non_empty(config.channels.telegram.api_base.as_ref()))
        .unwrap_or_else(|| crate::channels::TELEGRAM_API_BASE.to_string())
}

/// Resolve the Gemini API key: env API_KEY, then GEMINI_API_KEY, then config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    non_empty_env("API_KEY")
        .or_else(|| non_empty_env("GEMINI_API_KEY"))
        .or_else(|| non_empty(config.agents.api_key.as_ref()))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("GEMBOT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".gembot").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or GEMBOT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
