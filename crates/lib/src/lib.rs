//! gembot core library: relays Telegram chats to Gemini, one conversation per chat.

pub mod agent;
pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod media;
pub mod relay;
pub mod session;
pub mod workers;
