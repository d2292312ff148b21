//! # GiftWatch Channels
//! Telegram Bot API integration.
//!
//! - [`TelegramChannel`]: delivery sink and update loop
//! - [`ChannelPostBuffer`]: source client backed by `channel_post` updates

pub mod source;
pub mod telegram;

pub use source::ChannelPostBuffer;
pub use telegram::{CommandStream, IncomingCommand, TelegramChannel, TelegramConfig};
