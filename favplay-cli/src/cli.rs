use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "favplay",
    version,
    about = "Play the audio of your video platform favorites through a local proxy",
    long_about = None
)]
pub struct Args {
    /// Path to the configuration file
    #[arg(long, global = true, env = "FAVPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve one media URL on a local port with credentials attached
    Proxy {
        /// Upstream media URL
        #[arg(long)]
        url: String,

        /// Cookie header sent upstream (overrides the configured cookies)
        #[arg(long, env = "FAVPLAY_COOKIES")]
        cookies: Option<String>,

        /// Referer sent upstream (overrides the configured referer)
        #[arg(long)]
        referer: Option<String>,
    },

    /// List one page of a favorites collection
    Favorites {
        /// Favorites collection id
        #[arg(long)]
        collection: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Print the page as JSON
        #[arg(long)]
        json: bool,
    },

    /// Play a favorites collection, reading transport commands from stdin
    Play {
        /// Favorites collection id
        #[arg(long)]
        collection: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Position in the page to start from (0-based)
        #[arg(long, default_value_t = 0)]
        index: usize,
    },

    /// Show or reset the configuration file
    Config {
        #[arg(long)]
        show: bool,

        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },
}
