//! Telegram bot handler tree configuration
//!
//! This module provides the main dispatcher schema for the Telegram bot.
//! Routing decisions are plain functions so they can be tested without a bot.

use std::sync::Arc;

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use crate::core::config::Settings;
use crate::download::link::{classify, is_music_video_link};
use crate::download::{DownloadError, Locator, StatusMessage};
use crate::services::AppServices;
use crate::storage::users;
use crate::telegram::bot::Command;
use crate::telegram::delivery::TelegramDelivery;
use crate::telegram::status::{send_text_with_retry, TelegramStatus};
use crate::telegram::Bot;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

const WELCOME_TEXT: &str = "Welcome to Apple Music Download Bot!\n\n\
    Send me an Apple Music link (song, album, or playlist) and I'll download it for you.\n\n\
    Supported links:\n\
    - Songs: https://music.apple.com/.../song/.../...\n\
    - Albums: https://music.apple.com/.../album/.../...\n\
    - Playlists: https://music.apple.com/.../playlist/.../...";

const ACCESS_DENIED_TEXT: &str = "Access denied. Please contact the administrator for access.";
const MUSIC_VIDEO_TEXT: &str = "Music videos are not supported. Please send a song, album, or playlist link.";
const GROUP_COLLECTION_TEXT: &str = "Albums and playlists can only be downloaded in a private chat with the bot.";

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub services: Arc<AppServices>,
}

impl HandlerDeps {
    pub fn new(services: Arc<AppServices>) -> Self {
        Self { services }
    }
}

/// What to do with an incoming text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision {
    /// Stay silent (group chatter, non-whitelisted user in a group)
    Ignore,
    Reply(&'static str),
    InvalidLink,
    Process(Locator),
}

/// Applies access control, chat-type policy and link classification.
pub fn decide(settings: &Settings, user_id: i64, text: &str, is_private: bool) -> LinkDecision {
    if !settings.is_user_allowed(user_id) {
        return if is_private {
            LinkDecision::Reply(ACCESS_DENIED_TEXT)
        } else {
            LinkDecision::Ignore
        };
    }

    if is_music_video_link(text) {
        return LinkDecision::Reply(MUSIC_VIDEO_TEXT);
    }

    match classify(text) {
        Some(locator) if locator.kind.is_collection() && !is_private => LinkDecision::Reply(GROUP_COLLECTION_TEXT),
        Some(locator) => LinkDecision::Process(locator),
        None if is_private => LinkDecision::InvalidLink,
        None => LinkDecision::Ignore,
    }
}

/// Creates the main dispatcher schema for the Telegram bot.
///
/// The same schema is used in production and can be used in integration tests.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_messages = deps;

    dptree::entry()
        .branch(command_handler(deps_commands))
        .branch(message_handler(deps_messages))
}

fn sender_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().and_then(|u| i64::try_from(u.id.0).ok())
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Received command {:?} from chat {}", cmd, msg.chat.id);
                let user_id = sender_id(&msg).unwrap_or(0);
                if !deps.services.settings.is_user_allowed(user_id) {
                    if msg.chat.is_private() {
                        send_text_with_retry(&bot, msg.chat.id, ACCESS_DENIED_TEXT).await?;
                    }
                    return Ok(());
                }

                match cmd {
                    Command::Start | Command::Help => {
                        send_text_with_retry(&bot, msg.chat.id, WELCOME_TEXT).await?;
                    }
                    Command::Stats => {
                        let text = stats_text(&deps.services, user_id);
                        send_text_with_retry(&bot, msg.chat.id, &text).await?;
                    }
                }
                Ok(())
            }
        },
    ))
}

fn stats_text(services: &AppServices, user_id: i64) -> String {
    let cached = match services.cache.count() {
        Ok(count) => count.to_string(),
        Err(e) => {
            log::error!("Failed to count cached tracks: {}", e);
            "?".to_string()
        }
    };
    let downloads = users::get_activity(&services.db_pool, user_id)
        .ok()
        .flatten()
        .map(|activity| activity.download_count)
        .unwrap_or(0);

    let mut text = format!("Cached tracks: {}\nYour requests: {}", cached, downloads);
    if services.settings.is_admin(user_id) {
        text.push_str(&format!(
            "\nActive downloads: {}/{}",
            services.gate.active_global(),
            services.gate.max_global()
        ));
    }
    text
}

fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                if let Err(e) = handle_link_message(&bot, &msg, &deps.services).await {
                    log::error!("Error handling message in chat {}: {}", msg.chat.id, e);
                }
                Ok(())
            }
        })
}

async fn handle_link_message(bot: &Bot, msg: &Message, services: &AppServices) -> Result<(), HandlerError> {
    let (Some(user_id), Some(text)) = (sender_id(msg), msg.text()) else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    let locator = match decide(&services.settings, user_id, text.trim(), msg.chat.is_private()) {
        LinkDecision::Ignore => return Ok(()),
        LinkDecision::Reply(reply) => {
            send_text_with_retry(bot, chat_id, reply).await?;
            return Ok(());
        }
        LinkDecision::InvalidLink => {
            send_text_with_retry(bot, chat_id, &DownloadError::InvalidLink.user_message()).await?;
            return Ok(());
        }
        LinkDecision::Process(locator) => locator,
    };

    log::info!("User {} requested {} {}", user_id, locator.kind, locator.catalog_id);

    let items = match services.queue_builder.build_queue(&locator).await {
        Ok(items) if !items.is_empty() => items,
        Ok(_) => {
            let err = DownloadError::UpstreamUnavailable("empty queue".to_string());
            send_text_with_retry(bot, chat_id, &err.user_message()).await?;
            return Ok(());
        }
        Err(e) => {
            log::warn!("Queue for {} failed [{}]: {}", locator.catalog_id, e.subcategory(), e);
            send_text_with_retry(bot, chat_id, &e.user_message()).await?;
            return Ok(());
        }
    };

    let delivery = TelegramDelivery::new(bot.clone(), chat_id);
    if items.len() == 1 {
        let status = TelegramStatus::send(bot.clone(), chat_id, "Downloading...").await?;
        let result = services.dispatcher.run_batch(user_id, items, &delivery, None).await;
        status.delete().await;
        if let Some(failure) = result.failures.first() {
            send_text_with_retry(bot, chat_id, &failure.error.user_message()).await?;
        }
    } else {
        let total = items.len();
        let status: Arc<dyn StatusMessage> = Arc::new(
            TelegramStatus::send(bot.clone(), chat_id, &format!("Found {} tracks. Processing...", total)).await?,
        );
        let result = services
            .dispatcher
            .run_batch(user_id, items, &delivery, Some(Arc::clone(&status)))
            .await;
        status.update(&result.summary()).await;
        if let Some(aborted) = &result.aborted {
            send_text_with_retry(bot, chat_id, &aborted.user_message()).await?;
        }
    }

    let username = msg.from.as_ref().and_then(|u| u.username.as_deref());
    let first_name = msg.from.as_ref().map(|u| u.first_name.as_str());
    if let Err(e) = users::record_activity(&services.db_pool, user_id, username, first_name) {
        log::warn!("Failed to record activity for user {}: {}", user_id, e);
    }
    Ok(())
}
