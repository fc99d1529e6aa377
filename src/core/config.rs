use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

use crate::download::codec::Codec;

/// Reads an environment variable, treating blank values as unset.
fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_non_empty(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parses a comma/space separated list of Telegram user IDs.
pub(crate) fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split([',', ' ', '\n', '\t'])
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: data/cache.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "data/cache.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "app.log".to_string()));

/// Directory where fetched artifacts land before upload.
/// Every item gets its own subdirectory which is removed after the item finishes.
pub static TEMP_FILES_DIR: Lazy<String> =
    Lazy::new(|| env::var("TEMP_FILES_DIR").unwrap_or_else(|_| "data/temp".to_string()));

/// Admission and size limits
pub mod limits {
    use super::{env_parse, Lazy};

    /// Simultaneous fetches allowed for one user (MAX_CONCURRENT_PER_USER)
    pub static MAX_CONCURRENT_PER_USER: Lazy<usize> = Lazy::new(|| env_parse("MAX_CONCURRENT_PER_USER", 2));

    /// Simultaneous fetches allowed across all users (MAX_CONCURRENT_GLOBAL)
    pub static MAX_CONCURRENT_GLOBAL: Lazy<usize> = Lazy::new(|| env_parse("MAX_CONCURRENT_GLOBAL", 5));

    /// Upload ceiling in megabytes (MAX_FILE_SIZE_MB). Bot API caps uploads at 50 MB.
    pub static MAX_FILE_SIZE_MB: Lazy<u64> = Lazy::new(|| env_parse("MAX_FILE_SIZE_MB", 50));

    /// Per-user pools are pruned once the map grows past this many users.
    pub const USER_POOL_PRUNE_THRESHOLD: usize = 1024;

    /// Telegram accepts at most 10 entries per media group.
    pub const MEDIA_GROUP_LIMIT: usize = 10;

    /// Upload ceiling in bytes
    pub fn max_file_size_bytes() -> u64 {
        *MAX_FILE_SIZE_MB * 1024 * 1024
    }
}

/// Catalog access and fetch backend configuration
pub mod catalog {
    use super::{env, env_non_empty, env_parse, Duration, Lazy};

    /// Catalog API base URL
    pub const API_BASE_URL: &str = "https://api.music.apple.com";

    /// Developer token for the catalog API (APPLE_MUSIC_TOKEN)
    pub static API_TOKEN: Lazy<Option<String>> = Lazy::new(|| env_non_empty("APPLE_MUSIC_TOKEN"));

    /// Subscriber token (MEDIA_USER_TOKEN), required for full-length fetches
    pub static MEDIA_USER_TOKEN: Lazy<Option<String>> = Lazy::new(|| env_non_empty("MEDIA_USER_TOKEN"));

    /// Netscape cookies file handed to the downloader process (COOKIES_PATH)
    pub static COOKIES_PATH: Lazy<String> =
        Lazy::new(|| env::var("COOKIES_PATH").unwrap_or_else(|_| "./cookies.txt".to_string()));

    /// External downloader binary (DOWNLOADER_BIN)
    pub static DOWNLOADER_BIN: Lazy<String> =
        Lazy::new(|| env::var("DOWNLOADER_BIN").unwrap_or_else(|_| "gamdl".to_string()));

    /// Requested song codec (SONG_CODEC), e.g. "alac", "aac-legacy"
    pub static SONG_CODEC: Lazy<String> =
        Lazy::new(|| env::var("SONG_CODEC").unwrap_or_else(|_| "aac-legacy".to_string()));

    /// Address of the optional decrypt helper required by premium codecs (DECRYPT_HELPER_URL)
    pub static DECRYPT_HELPER_URL: Lazy<Option<String>> = Lazy::new(|| env_non_empty("DECRYPT_HELPER_URL"));

    /// Delay before each playlist continuation page (PLAYLIST_PAGE_DELAY_MS)
    pub static PLAYLIST_PAGE_DELAY_MS: Lazy<u64> = Lazy::new(|| env_parse("PLAYLIST_PAGE_DELAY_MS", 500));

    /// Maximum number of tracks taken from one collection
    pub const MAX_QUEUE_ITEMS: usize = 300;

    /// Timeout for one downloader process run (in seconds)
    pub const FETCH_TIMEOUT_SECS: u64 = 600;

    pub fn page_delay() -> Duration {
        Duration::from_millis(*PLAYLIST_PAGE_DELAY_MS)
    }

    /// Timeout for one catalog API request (in seconds)
    pub const API_TIMEOUT_SECS: u64 = 30;

    pub fn fetch_timeout() -> Duration {
        Duration::from_secs(FETCH_TIMEOUT_SECS)
    }

    pub fn api_timeout() -> Duration {
        Duration::from_secs(API_TIMEOUT_SECS)
    }
}

/// Progress message configuration
pub mod progress {
    use super::Duration;

    /// Interval between batch progress edits (in seconds)
    pub const UPDATE_INTERVAL_SECS: u64 = 2;

    pub fn update_interval() -> Duration {
        Duration::from_secs(UPDATE_INTERVAL_SECS)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for HTTP requests (in seconds)
    /// Long enough for a 50 MB audio upload on a slow link.
    pub const REQUEST_TIMEOUT_SECS: u64 = 300;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Access control
pub mod admin {
    use super::{env, parse_id_list, Lazy};

    /// Admin user IDs (ADMIN_IDS, comma-separated)
    pub static ADMIN_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ADMIN_IDS")
            .ok()
            .map(|raw| parse_id_list(&raw))
            .unwrap_or_default()
    });

    /// Users allowed to use the bot (ALLOWED_USER_IDS). Empty means everyone.
    pub static ALLOWED_USER_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ALLOWED_USER_IDS")
            .ok()
            .map(|raw| parse_id_list(&raw))
            .unwrap_or_default()
    });
}

/// Explicit snapshot of the runtime configuration.
///
/// Built once in `main` and handed to every component, so nothing below the
/// binary reads the environment on its own.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: String,
    pub temp_dir: String,
    pub max_per_user: usize,
    pub max_global: usize,
    pub max_file_size: u64,
    pub preferred_codec: Codec,
    pub decrypt_helper_url: Option<String>,
    pub downloader_bin: String,
    pub cookies_path: String,
    pub api_token: Option<String>,
    pub media_user_token: Option<String>,
    pub page_delay: Duration,
    pub max_queue_items: usize,
    pub progress_interval: Duration,
    pub admin_ids: Vec<i64>,
    pub allowed_user_ids: Vec<i64>,
}

impl Settings {
    /// Reads every setting from the environment (call after `dotenvy::dotenv()`).
    pub fn from_env() -> Self {
        let preferred_codec = SONG_CODEC_PARSED.unwrap_or_else(|| {
            log::warn!("Unknown SONG_CODEC '{}', using aac-legacy", *catalog::SONG_CODEC);
            Codec::AacLegacy
        });

        Self {
            database_path: DATABASE_PATH.clone(),
            temp_dir: TEMP_FILES_DIR.clone(),
            max_per_user: *limits::MAX_CONCURRENT_PER_USER,
            max_global: *limits::MAX_CONCURRENT_GLOBAL,
            max_file_size: limits::max_file_size_bytes(),
            preferred_codec,
            decrypt_helper_url: catalog::DECRYPT_HELPER_URL.clone(),
            downloader_bin: catalog::DOWNLOADER_BIN.clone(),
            cookies_path: catalog::COOKIES_PATH.clone(),
            api_token: catalog::API_TOKEN.clone(),
            media_user_token: catalog::MEDIA_USER_TOKEN.clone(),
            page_delay: catalog::page_delay(),
            max_queue_items: catalog::MAX_QUEUE_ITEMS,
            progress_interval: progress::update_interval(),
            admin_ids: admin::ADMIN_IDS.clone(),
            allowed_user_ids: admin::ALLOWED_USER_IDS.clone(),
        }
    }

    /// Whether the user may talk to the bot at all.
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(&user_id) || self.admin_ids.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

static SONG_CODEC_PARSED: Lazy<Option<Codec>> = Lazy::new(|| catalog::SONG_CODEC.parse().ok());
