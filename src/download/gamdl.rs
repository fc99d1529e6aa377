//! Fetcher backed by the external `gamdl` downloader process.
//!
//! Each attempt runs in its own work directory under the temp dir. On success
//! the produced audio file is moved next to the work directory and the
//! directory is removed; the caller deletes the file after upload.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::catalog::CatalogItem;
use super::codec::Codec;
use super::fetch::{FetchError, Fetcher};
use crate::core::config::Settings;

/// Audio container extensions the downloader can produce.
const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp4", "flac", "ec3", "ac3"];

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url regex"));

/// Session or subscription failures. `401` only counts as a standalone status code.
static AUTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:http\s*|status\s*(?:code\s*)?:?\s*)?401\b|unauthorized|media-user-token|subscription is not active|cookies? (?:file )?(?:not found|is invalid|are invalid|(?:has |have )?expired)|(?:invalid|expired) cookies",
    )
    .expect("auth regex")
});

static CODEC_UNAVAILABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)not available in the requested codec|codec is not available|format not available|no stream")
        .expect("codec regex")
});

#[derive(Debug, Clone)]
pub struct GamdlFetcher {
    bin: String,
    cookies_path: String,
    temp_dir: PathBuf,
    decrypt_helper: Option<String>,
    timeout: Duration,
}

impl GamdlFetcher {
    pub fn new(bin: impl Into<String>, cookies_path: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            cookies_path: cookies_path.into(),
            temp_dir: temp_dir.into(),
            decrypt_helper: None,
            timeout: crate::core::config::catalog::fetch_timeout(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.downloader_bin, &settings.cookies_path, &settings.temp_dir)
            .with_decrypt_helper(settings.decrypt_helper_url.clone())
    }

    pub fn with_decrypt_helper(mut self, helper: Option<String>) -> Self {
        self.decrypt_helper = helper;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_command(&self, item: &CatalogItem, codec: Codec, work_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--cookies-path")
            .arg(&self.cookies_path)
            .arg("--output-path")
            .arg(work_dir)
            .arg("--temp-path")
            .arg(work_dir)
            .arg("--codec-song")
            .arg(codec.as_str())
            .arg("--no-synced-lyrics")
            .arg("--overwrite");
        if codec.requires_decrypt_helper() {
            if let Some(helper) = &self.decrypt_helper {
                cmd.arg("--use-wrapper").arg("--wrapper-decrypt-ip").arg(helper);
            }
        }
        cmd.arg(item.song_url())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, item: &CatalogItem, codec: Codec, work_dir: &Path) -> Result<PathBuf, FetchError> {
        let mut cmd = self.build_command(item, codec, work_dir);
        log::debug!("Running {} for {} ({})", self.bin, item.id, codec);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(FetchError::Unknown(format!("failed to start {}: {}", self.bin, e))),
            Err(_) => {
                return Err(FetchError::Unknown(format!(
                    "{} timed out after {}s",
                    self.bin,
                    self.timeout.as_secs()
                )))
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(classify_failure(&format!("{}\n{}", stdout, stderr), codec));
        }

        match find_audio_file(work_dir).await {
            Some(path) => Ok(path),
            // The downloader reports some failures on a zero exit
            None => Err(classify_failure(&format!("{}\n{}", stdout, stderr), codec)),
        }
    }
}

#[async_trait]
impl Fetcher for GamdlFetcher {
    async fn fetch(&self, item: &CatalogItem, codec: Codec) -> Result<PathBuf, FetchError> {
        let tag = format!("{}-{}-{:08x}", item.id, codec, rand::random::<u32>());
        let work_dir = self.temp_dir.join(&tag);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| FetchError::Unknown(format!("cannot create {}: {}", work_dir.display(), e)))?;

        let result = match self.run(item, codec, &work_dir).await {
            Ok(produced) => {
                let extension = produced.extension().and_then(|e| e.to_str()).unwrap_or("m4a");
                let target = self.temp_dir.join(format!("{}.{}", tag, extension));
                tokio::fs::rename(&produced, &target)
                    .await
                    .map(|_| target)
                    .map_err(|e| FetchError::Unknown(format!("cannot move fetched file: {}", e)))
            }
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            log::warn!("Failed to remove work dir {}: {}", work_dir.display(), e);
        }
        result
    }
}

/// Maps downloader output to a typed fetch error.
///
/// URLs are stripped first: the output echoes the song URL, and catalog IDs
/// can contain any digit run.
pub fn classify_failure(output: &str, codec: Codec) -> FetchError {
    let text = URL_RE.replace_all(output, "");

    if AUTH_RE.is_match(&text) {
        return FetchError::AuthExpired(last_line(output));
    }
    if CODEC_UNAVAILABLE_RE.is_match(&text) {
        return FetchError::FormatNotAvailable(codec);
    }
    FetchError::Unknown(last_line(output))
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .unwrap_or("downloader produced no output")
        .to_string()
}

/// Depth-first search for the first audio file under `dir`.
async fn find_audio_file(dir: &Path) -> Option<PathBuf> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            {
                return Some(path);
            }
        }
    }
    None
}
