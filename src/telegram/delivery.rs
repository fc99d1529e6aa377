//! Audio delivery to a Telegram chat.

use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, FileId, InputFile, InputMedia, InputMediaAudio};

use crate::core::config::limits::MEDIA_GROUP_LIMIT;
use crate::core::retry::{retry, RetryConfig};
use crate::download::{BlobRef, Delivery, DownloadError, TrackMetadata, UploadedBlob};
use crate::telegram::Bot;

/// Extracts the uploaded audio handle from a sent message.
fn uploaded_blob(message: &Message) -> Result<UploadedBlob, DownloadError> {
    let audio = message
        .audio()
        .ok_or_else(|| DownloadError::DeliveryFailed("sent message has no audio".to_string()))?;
    Ok(UploadedBlob {
        file_id: audio.file.id.0.clone(),
        file_unique_id: Some(audio.file.unique_id.0.clone()),
        file_size: u64::from(audio.file.size),
    })
}

/// Media group entries carry the duration as `u16` seconds.
fn media_duration(track: &TrackMetadata) -> u16 {
    u16::try_from(track.duration_secs()).unwrap_or(u16::MAX)
}

fn input_file(blob: &BlobRef) -> InputFile {
    match blob {
        BlobRef::Remote(file_id) => InputFile::file_id(FileId(file_id.clone())),
        BlobRef::Local(path) => InputFile::file(path),
    }
}

pub struct TelegramDelivery {
    bot: Bot,
    chat_id: ChatId,
    http: reqwest::Client,
}

impl TelegramDelivery {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self {
            bot,
            chat_id,
            http: reqwest::Client::new(),
        }
    }

    /// Cover art bytes, or `None` on any failure.
    async fn fetch_cover(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.http.get(url).send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Cover download failed for {}: {}", url, e);
                return None;
            }
        };
        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                log::debug!("Cover download failed for {}: {}", url, e);
                None
            }
        }
    }

    fn media_entry(track: &TrackMetadata, blob: &BlobRef) -> InputMedia {
        InputMedia::Audio(
            InputMediaAudio::new(input_file(blob))
                .caption(track.caption())
                .title(track.title.clone())
                .performer(track.artist.clone())
                .duration(media_duration(track)),
        )
    }
}

#[async_trait]
impl Delivery for TelegramDelivery {
    async fn send_artifact(&self, path: &Path, track: &TrackMetadata) -> Result<UploadedBlob, DownloadError> {
        let mut request = self
            .bot
            .send_audio(self.chat_id, InputFile::file(path))
            .caption(track.caption())
            .title(track.title.clone())
            .performer(track.artist.clone())
            .duration(track.duration_secs());

        if let Some(cover_url) = &track.cover_url {
            if let Some(cover) = self.fetch_cover(cover_url).await {
                request = request.thumbnail(InputFile::memory(cover));
            }
        }

        // Uploads are not retried: a timed-out upload may still have landed
        let message = request
            .await
            .map_err(|e| DownloadError::DeliveryFailed(e.to_string()))?;
        log::info!("Uploaded {} to chat {}", track.catalog_id, self.chat_id);
        uploaded_blob(&message)
    }

    async fn send_cached(&self, file_id: &str, track: &TrackMetadata) -> Result<(), DownloadError> {
        let caption = track.cached_caption();
        retry(&RetryConfig::messages(), || async {
            self.bot
                .send_audio(self.chat_id, InputFile::file_id(FileId(file_id.to_string())))
                .caption(caption.clone())
                .await
        })
        .await
        .into_result()
        .map_err(|e| DownloadError::DeliveryFailed(e.to_string()))?;
        Ok(())
    }

    async fn send_group(&self, entries: &[(TrackMetadata, BlobRef)]) -> Result<Vec<UploadedBlob>, DownloadError> {
        let mut blobs = Vec::with_capacity(entries.len());

        for chunk in entries.chunks(MEDIA_GROUP_LIMIT) {
            // Media groups need at least two entries
            if let [(track, blob)] = chunk {
                let message = self
                    .bot
                    .send_audio(self.chat_id, input_file(blob))
                    .caption(track.caption())
                    .title(track.title.clone())
                    .performer(track.artist.clone())
                    .duration(track.duration_secs())
                    .await
                    .map_err(|e| DownloadError::DeliveryFailed(e.to_string()))?;
                blobs.push(uploaded_blob(&message)?);
                continue;
            }

            let media: Vec<InputMedia> = chunk.iter().map(|(track, blob)| Self::media_entry(track, blob)).collect();
            let messages = self
                .bot
                .send_media_group(self.chat_id, media)
                .await
                .map_err(|e| DownloadError::DeliveryFailed(e.to_string()))?;
            if messages.len() != chunk.len() {
                return Err(DownloadError::DeliveryFailed(format!(
                    "media group returned {} messages for {} entries",
                    messages.len(),
                    chunk.len()
                )));
            }
            for message in &messages {
                blobs.push(uploaded_blob(message)?);
            }
        }

        log::info!("Sent {} tracks as grouped audio to chat {}", entries.len(), self.chat_id);
        Ok(blobs)
    }
}
