//! Segue player demo - Main entry point
//!
//! Builds a player over the simulated collaborators, plays a list of
//! product ids back to back (each one is queued with `set_next` when the
//! player asks for it) and prints every notification as a JSON line.
//! Logs go to stderr.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use segue_common::events::SegueEvent;
use segue_common::model::MediaProduct;
use segue_player::sim::{SimBackend, SimTrack, SimulatedResolver};
use segue_player::{BackendSpec, ConfigFile, Player};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for segue-player
#[derive(Parser, Debug)]
#[command(name = "segue-player")]
#[command(about = "Gapless playback demo over simulated collaborators")]
#[command(version)]
struct Args {
    /// Configuration file (falls back to SEGUE_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Length of every simulated track, in seconds
    #[arg(long, default_value_t = 4.0)]
    track_secs: f64,

    /// Product ids to play, in order
    #[arg(default_values = ["1001", "1002", "1003"])]
    products: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigFile::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("segue_player={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting segue player demo with {} items", args.products.len());

    let resolver = Arc::new(SimulatedResolver::new());
    resolver.set_default_track(SimTrack::new(args.track_secs));
    let backend = SimBackend::new("sim");

    let player = Arc::new(
        Player::builder()
            .settings(config.player)
            .resolver(resolver)
            .backend(BackendSpec::new(backend.name(), backend.factory()))
            .build()
            .context("Failed to start player")?,
    );

    let mut queue: VecDeque<MediaProduct> = args
        .products
        .iter()
        .map(|id| MediaProduct::track(id.as_str()).with_source("demo", "cli"))
        .collect();
    let total = queue.len();
    let first = queue.pop_front().context("No products to play")?;

    let mut events = player.subscribe();
    player.load(first, 0.0).await.context("Failed to load first item")?;
    player.play().await.context("Failed to start playback")?;

    let mut finished = 0;
    loop {
        let event = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        println!("{}", serde_json::to_string(&event)?);

        match event {
            SegueEvent::PreloadRequested { .. } => {
                if let Some(next) = queue.pop_front() {
                    let player = player.clone();
                    tokio::spawn(async move {
                        if let Err(e) = player.set_next(next).await {
                            warn!("Failed to queue next item: {}", e);
                        }
                    });
                }
            }
            SegueEvent::MediaProductEnded { .. } => {
                finished += 1;
                if finished == total {
                    info!("Played all {} items", total);
                    break;
                }
            }
            _ => {}
        }
    }

    player.shutdown();
    Ok(())
}
