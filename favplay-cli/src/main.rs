mod cli;
mod commands;
mod config;
mod player;

use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    config::AppConfig,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let config_path = args.config.as_deref();

    match args.command {
        Commands::Config { show, reset } => {
            if reset {
                let path = AppConfig::reset(config_path)?;
                println!("✓ Configuration reset to defaults ({})", path.display());
            } else if show {
                let config = AppConfig::load(config_path)?;
                println!("{}", config.show()?);
            } else {
                println!("Use --show to display the configuration or --reset to restore defaults");
            }
        }

        Commands::Proxy {
            url,
            cookies,
            referer,
        } => {
            let config = AppConfig::load(config_path)?;
            commands::serve_proxy(&config, &url, cookies, referer).await?;
        }

        Commands::Favorites {
            collection,
            page,
            json,
        } => {
            let config = AppConfig::load(config_path)?;
            commands::list_favorites(&config, &collection, page, json).await?;
        }

        Commands::Play {
            collection,
            page,
            index,
        } => {
            let config = AppConfig::load(config_path)?;
            commands::play(&config, &collection, page, index).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(())
}
