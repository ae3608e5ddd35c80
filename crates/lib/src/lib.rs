//! tgfeed core library: Telegram client contract, message filtering, and the
//! HTTP/WebSocket gateway used by the CLI.

pub mod config;
pub mod feed;
pub mod gateway;
pub mod telegram;
