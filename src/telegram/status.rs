//! Editable status message ("Downloading...", batch progress).

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};

use crate::core::retry::{retry, RetryConfig};
use crate::download::StatusMessage;
use crate::telegram::Bot;

/// Sends a text message, retrying transient network failures.
pub async fn send_text_with_retry(bot: &Bot, chat_id: ChatId, text: &str) -> Result<Message, teloxide::RequestError> {
    retry(&RetryConfig::messages(), || async { bot.send_message(chat_id, text).await })
        .await
        .into_result()
}

pub struct TelegramStatus {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

impl TelegramStatus {
    /// Posts the initial status text.
    pub async fn send(bot: Bot, chat_id: ChatId, text: &str) -> Result<Self, teloxide::RequestError> {
        let message = send_text_with_retry(&bot, chat_id, text).await?;
        Ok(Self {
            bot,
            chat_id,
            message_id: message.id,
        })
    }
}

#[async_trait]
impl StatusMessage for TelegramStatus {
    async fn update(&self, text: &str) {
        let outcome = retry(&RetryConfig::messages(), || async {
            self.bot.edit_message_text(self.chat_id, self.message_id, text).await
        })
        .await;

        if let Err(e) = outcome.into_result() {
            // Same text twice is not an error worth reporting
            if !e.to_string().contains("message is not modified") {
                log::warn!("Failed to edit status message in chat {}: {}", self.chat_id, e);
            }
        }
    }

    async fn delete(&self) {
        if let Err(e) = self.bot.delete_message(self.chat_id, self.message_id).await {
            log::warn!("Failed to delete status message in chat {}: {}", self.chat_id, e);
        }
    }
}
