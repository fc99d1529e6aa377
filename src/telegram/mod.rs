//! Telegram bot integration and handlers

pub mod bot;
pub mod delivery;
pub mod handlers;
pub mod status;

pub type Bot = teloxide::Bot;

// Re-exports for convenience
pub use bot::{create_bot, setup_bot_commands, Command};
pub use delivery::TelegramDelivery;
pub use handlers::{schema, HandlerDeps, HandlerError};
pub use status::TelegramStatus;
