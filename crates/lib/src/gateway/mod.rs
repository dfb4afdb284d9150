//! Gateway: the HTTP listener plus the wiring that connects Telegram to the model.
//!
//! One port serves a health probe and the Telegram webhook endpoint. Updates from
//! either the webhook or the getUpdates loop are queued to per-chat workers.

mod server;

pub use server::{router, run_gateway, GatewayState};
