//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A startup report of the catalog session and fetch backend configuration

use anyhow::Result;
use simplelog::*;
use std::fs::File;
use std::path::Path;

use crate::core::config::Settings;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the fetch-related configuration at application startup
///
/// Reports:
/// - cookies file presence (the downloader cannot authenticate without it)
/// - catalog tokens
/// - codec preference and whether the decrypt helper is configured
/// - admission limits
pub fn log_startup_configuration(settings: &Settings) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Fetch backend configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cookies = Path::new(&settings.cookies_path);
    if cookies.exists() {
        log::info!("✅ COOKIES_PATH: {}", cookies.display());
    } else {
        log::error!("❌ COOKIES_PATH: {} (FILE NOT FOUND!)", cookies.display());
        log::error!("   Export cookies from the web player while logged in with an active subscription.");
    }

    if settings.api_token.is_some() {
        log::info!("✅ APPLE_MUSIC_TOKEN: set");
    } else {
        log::error!("❌ APPLE_MUSIC_TOKEN: not set, catalog lookups will fail");
    }

    if settings.media_user_token.is_some() {
        log::info!("✅ MEDIA_USER_TOKEN: set");
    } else {
        log::warn!("⚠️  MEDIA_USER_TOKEN: not set");
    }

    log::info!("🎵 Preferred codec: {}", settings.preferred_codec);
    match settings.decrypt_helper_url {
        Some(ref url) => log::info!("🔑 Decrypt helper: {}", url),
        None if settings.preferred_codec.requires_decrypt_helper() => {
            log::warn!(
                "⚠️  {} needs the decrypt helper (DECRYPT_HELPER_URL); falling back to legacy codecs",
                settings.preferred_codec
            );
        }
        None => log::info!("🔑 Decrypt helper: not configured"),
    }

    log::info!(
        "🚦 Limits: {} per user, {} global, {} MB per file",
        settings.max_per_user,
        settings.max_global,
        settings.max_file_size / 1024 / 1024
    );
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
