use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "melodura")]
#[command(author, version, about = "Telegram bot that downloads Apple Music tracks and caches every upload", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run,

    /// Classify a link and print what the bot would queue for it
    Classify {
        /// Link or free text containing a link
        url: String,
    },

    /// Show upload cache statistics
    CacheStats,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
