use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;

use melodura::cli::{Cli, Commands};
use melodura::core::{config, init_logger, log_startup_configuration, Settings};
use melodura::download::link::{classify, is_music_video_link};
use melodura::services::AppServices;
use melodura::storage::{create_pool, CacheStore};
use melodura::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps};

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, database, bot creation).
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present, before any config static is read
    let _ = dotenv();

    match cli.command {
        Some(Commands::Classify { url }) => {
            print_classification(&url);
            Ok(())
        }
        Some(Commands::CacheStats) => print_cache_stats(),
        Some(Commands::Run) | None => {
            init_logger(&config::LOG_FILE_PATH)?;
            run_bot().await
        }
    }
}

fn print_classification(text: &str) {
    match classify(text) {
        Some(locator) => println!(
            "{} {} (storefront {})",
            locator.kind, locator.catalog_id, locator.storefront
        ),
        None if is_music_video_link(text) => println!("music video (not supported)"),
        None => println!("not a supported link"),
    }
}

fn print_cache_stats() -> Result<()> {
    let pool = create_pool(&config::DATABASE_PATH)?;
    let cache = CacheStore::new(pool);
    println!("Cached tracks: {}", cache.count()?);
    Ok(())
}

async fn run_bot() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    let settings = Settings::from_env();
    log_startup_configuration(&settings);

    let services = Arc::new(AppServices::build(settings)?);
    log::info!("Upload cache holds {} tracks", services.cache.count()?);

    let bot = create_bot()?;
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let handler = schema(HandlerDeps::new(services));

    log::info!("Starting bot...");
    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Dispatcher shutdown gracefully");
    Ok(())
}
