//! Communication channels (Telegram).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors,
//! resolve file links, and deliver replies. Inbound messages are sent to the per-chat workers.

mod inbound;
mod registry;
mod telegram;

pub use inbound::{FileRef, InboundMessage, MessageKind};
pub use registry::{ChannelHandle, ChannelRegistry};
pub use telegram::{
    TelegramChannel, TelegramError, TelegramMessage, TelegramUpdate, TELEGRAM_API_BASE,
};
