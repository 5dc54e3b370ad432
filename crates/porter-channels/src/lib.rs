//! porter-channels — messaging gateway adapters
//!
//! The `MessageChannel` trait is the seam the bot core sees; `TelegramChannel`
//! is the one transport currently wired in.

pub mod bus;
pub mod telegram;

pub use bus::MessageChannel;
pub use telegram::TelegramChannel;
