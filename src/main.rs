//! Area Rootless
//!
//! Takes over window management of an X display and logs every event the
//! core delivers. Useful to watch a client's lifecycle from the outside.

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use area_rootless::{Config, Context, Event, EventKind};

#[derive(Debug, Default)]
struct Args {
    display: Option<String>,
    no_shm: bool,
    verbose: bool,
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--display" | "-d" => {
                    args.display = Some(iter.next().context("--display needs a value")?);
                }
                "--config" | "-c" => {
                    args.config = Some(iter.next().context("--config needs a path")?.into());
                }
                "--no-shm" => args.no_shm = true,
                "--verbose" | "-v" => args.verbose = true,
                "--help" | "-h" => {
                    println!("Usage: area-rootless [--display NAME] [--config PATH] [--no-shm] [--verbose]");
                    std::process::exit(0);
                }
                other => bail!("Unknown argument: {}", other),
            }
        }
        Ok(args)
    }
}

fn describe(event: &Event) -> String {
    match event.window() {
        Some(window) => format!(
            "{:?} {:#x} {:?} \"{}\"",
            event.kind(),
            window.id(),
            window.bounds(),
            window.name().unwrap_or_default()
        ),
        None => format!("{:?}", event.kind()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;

    // Initialize logging
    let default_filter = if args.verbose { "area_rootless=trace,info" } else { "area_rootless=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Area Rootless");

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            error!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    if args.display.is_some() {
        config.display.name = args.display;
    }
    config.display.disable_shm |= args.no_shm;
    config.events.verbose |= args.verbose;

    let ctx = Context::open_with_config(&config)?;
    let mut events = ctx.start_queue()?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                info!("{}", describe(&event));
                if event.kind() == EventKind::Exit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully");
                break;
            }
        }
    }

    // Joins the event thread
    tokio::task::spawn_blocking(move || ctx.close()).await?;
    info!("Shutdown complete");
    Ok(())
}
