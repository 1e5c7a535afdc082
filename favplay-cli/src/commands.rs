use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use catalog_client::CatalogClient;
use media_proxy::StreamingProxy;
use playback_session::{
    CatalogApi, CatalogItem, FlatPage, PlaybackController, PlaybackError, PlaybackEvent,
    PlaybackHandle, PlaybackServices, PlayerPhase, StaticCredentials,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::player::ProcessElement;

const VOLUME_STEP: f32 = 0.1;

const PLAY_HELP: &str = "Commands: p play/pause, n next, b previous, m mute, +/- volume, s <secs> seek, i info, q quit";

fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else {
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

fn describe(item: &CatalogItem) -> String {
    match item.part_index {
        Some(part) => format!("{} (P{part}) [{}]", item.title, item.catalog_id),
        None => format!("{} [{}]", item.title, item.catalog_id),
    }
}

/// Serve one upstream URL until Ctrl-C.
pub async fn serve_proxy(
    config: &AppConfig,
    url: &str,
    cookies: Option<String>,
    referer: Option<String>,
) -> Result<()> {
    let mut credentials = config.credentials();
    if let Some(cookies) = cookies {
        credentials = credentials.with_cookies(cookies);
    }
    if let Some(referer) = referer {
        credentials = credentials.with_referer(referer);
    }

    let proxy = StreamingProxy::new(config.proxy_config())?;
    let session = proxy.open_proxy(url, credentials).await?;
    info!(port = session.port, "Proxy session {} ready", session.generation);
    println!("{}", session.base_url);
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    proxy.close_all();
    info!("Proxy stopped");
    Ok(())
}

pub async fn list_favorites(config: &AppConfig, collection: &str, page: u32, json: bool) -> Result<()> {
    let catalog = CatalogClient::new(config.catalog_config(), &config.credentials())?;
    let favorites = catalog.list_favorite_page(collection, page).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&favorites)?);
        return Ok(());
    }

    if favorites.items.is_empty() {
        println!("Page {page} of collection {collection} is empty.");
        return Ok(());
    }
    for (index, item) in favorites.items.iter().enumerate() {
        println!(
            "{index:>3}  {:<14} {:>8}  {}",
            item.catalog_id,
            format_duration(item.duration_secs),
            item.title
        );
    }
    if favorites.has_more {
        println!("(more on page {})", page + 1);
    }
    Ok(())
}

/// Play a favorites page, reading transport commands from stdin.
pub async fn play(config: &AppConfig, collection: &str, page: u32, index: usize) -> Result<()> {
    let credentials = config.credentials();
    let catalog = Arc::new(CatalogClient::new(config.catalog_config(), &credentials)?);

    let favorites = catalog.list_favorite_page(collection, page).await?;
    if favorites.items.is_empty() {
        bail!("page {page} of collection {collection} is empty");
    }
    if index >= favorites.items.len() {
        bail!(
            "index {index} is out of range, page {page} has {} items",
            favorites.items.len()
        );
    }
    let flat = FlatPage {
        collection_id: collection.to_string(),
        items: favorites.items,
        has_more: favorites.has_more,
        page,
    };

    let proxy = Arc::new(StreamingProxy::new(config.proxy_config())?);
    let (element_tx, element_rx) = mpsc::unbounded_channel();
    let element = ProcessElement::new(config.player.clone(), element_tx)?;
    let services = PlaybackServices {
        api: catalog,
        proxy,
        credentials: Arc::new(StaticCredentials::new(credentials)),
    };

    let (handle, controller) =
        PlaybackController::spawn(element, element_rx, services, config.playback_config());
    let printer = tokio::spawn(print_events(handle.subscribe()));

    println!("{PLAY_HELP}");
    handle.select_from_page(flat, index).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if handle_input(&handle, line.trim()).await.is_break() {
                    break;
                }
            }
        }
    }

    handle.shutdown().await?;
    if let Err(e) = controller.await {
        warn!("Playback controller ended abnormally: {}", e);
    }
    printer.abort();
    Ok(())
}

async fn handle_input(handle: &PlaybackHandle, line: &str) -> ControlFlow<()> {
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    let result: Result<(), PlaybackError> = match command {
        "" => Ok(()),
        "q" => return ControlFlow::Break(()),
        "p" => handle.toggle_play().await.map(|playing| {
            println!("{}", if playing { "Playing" } else { "Paused" });
        }),
        "n" => handle.next().await.map(|item| {
            if item.is_none() {
                println!("End of queue");
            }
        }),
        "b" => handle.previous().await.map(|item| {
            if item.is_none() {
                println!("Already at the start of the queue");
            }
        }),
        "m" => handle.toggle_mute().await.map(|muted| {
            println!("{}", if muted { "Muted" } else { "Unmuted" });
        }),
        "+" | "-" => {
            let step = if command == "+" { VOLUME_STEP } else { -VOLUME_STEP };
            let volume = (handle.state().volume + step).clamp(0.0, 1.0);
            handle.set_volume(volume).await.map(|()| {
                println!("Volume {:.0}%", volume * 100.0);
            })
        }
        "s" => match argument.parse::<f64>() {
            Ok(secs) => handle.seek(secs).await,
            Err(_) => Err(PlaybackError::InvalidArgument(format!(
                "expected seconds, got {argument:?}"
            ))),
        },
        "i" => {
            print_status(handle);
            Ok(())
        }
        _ => {
            println!("{PLAY_HELP}");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{e}");
    }
    ControlFlow::Continue(())
}

fn print_status(handle: &PlaybackHandle) {
    let state = handle.state();
    let Some(item) = state.current_item.as_ref() else {
        println!("Nothing selected");
        return;
    };
    let phase = match state.phase {
        PlayerPhase::Idle => "idle",
        PlayerPhase::Loading => "loading",
        PlayerPhase::Playing => "playing",
        PlayerPhase::Paused => "paused",
        PlayerPhase::Failed => "failed",
    };
    println!(
        "{} - {} {}/{} volume {:.0}%{}",
        describe(item),
        phase,
        format_duration(state.current_time_secs as u64),
        format_duration(state.duration_secs as u64),
        state.volume * 100.0,
        if state.is_muted { " (muted)" } else { "" },
    );
    if let Some(error) = &state.last_error {
        println!("Last error: {error}");
    }
}

async fn print_events(mut events: broadcast::Receiver<PlaybackEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            PlaybackEvent::TrackStarted { item, .. } => println!("▶ {}", describe(&item)),
            PlaybackEvent::TrackEnded { item } => println!("■ Finished {}", describe(&item)),
            PlaybackEvent::LoadFailed { item, message } => {
                eprintln!("✗ Could not play {}: {message}", describe(&item));
            }
            PlaybackEvent::PlayRejected { item, message } => {
                eprintln!("✗ Player refused {}: {message}", describe(&item));
            }
            PlaybackEvent::QueueExhausted => println!("Queue finished"),
        }
    }
}
