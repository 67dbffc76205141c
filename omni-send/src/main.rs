//! omni-send - Background daemon for scheduled publishing
//!
//! Runs the claim loop: every tick, due posts are claimed atomically and
//! published to all of their target platforms.

use anyhow::{Context, Result};
use clap::Parser;
use libomnicast::logging::LoggingConfig;
use libomnicast::service::events::{Event, EventReceiver};
use libomnicast::service::OmnicastService;
use libomnicast::{Config, OmnicastError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "omni-send")]
#[command(version)]
#[command(about = "Background daemon that publishes scheduled posts")]
#[command(long_about = "\
omni-send - Background daemon that publishes scheduled posts

DESCRIPTION:
    omni-send runs the Omnicast claim loop. Every tick it recovers posts
    whose publishing lease went stale, claims posts that are due, and
    publishes each one to all of its target platforms concurrently.

    Several omni-send processes may share one database; every due post is
    published by exactly one of them.

USAGE:
    # Run in foreground (logs to stderr)
    omni-send

    # Tick every 30 seconds
    omni-send --tick-interval 30

    # Publish whatever is due right now, then exit
    omni-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight posts are finished)

CONFIGURATION:
    Configuration file: ~/.config/omnicast/config.toml
    Connected accounts: ~/.config/omnicast/accounts.toml

    [scheduler]
    tick_interval = 10
    max_concurrent_posts = 4
    max_retries_per_platform = 3
    retry_backoff_base = 2

    Environment:
        OMNICAST_CONFIG      - Path to config file
        OMNICAST_DB_PATH     - Path to database file
        OMNICAST_LOG_FORMAT  - text, json or pretty
        OMNICAST_LOG_LEVEL   - error, warn, info, debug, trace

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "PATH", env = "OMNICAST_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between claim loop ticks (overrides config)
    #[arg(long, value_name = "SECONDS")]
    tick_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Process due posts once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<OmnicastError>()
        .map(OmnicastError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(tick_interval) = cli.tick_interval {
        config.scheduler.tick_interval = tick_interval;
    }

    let service = OmnicastService::from_config(config).await?;
    let scheduler = service.scheduler();

    let mut events = service.subscribe();

    if cli.once {
        let finished = scheduler.tick().await?;
        while let Ok(event) = events.try_recv() {
            log_event(&event);
        }
        for (post_id, status) in &finished {
            println!("{}\t{}", post_id, status);
        }
        info!("omni-send: processed {} post(s), exiting", finished.len());
        return Ok(());
    }

    info!("omni-send daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;
    tokio::spawn(follow_events(events));

    scheduler.run(shutdown).await?;

    info!("omni-send daemon stopped");
    Ok(())
}

/// Log dispatch progress until the event bus closes
async fn follow_events(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(missed)) => warn!("omni-send: skipped {} dispatch event(s)", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &Event) {
    match event {
        Event::DispatchStarted { post_id, platforms } => {
            debug!("omni-send: post {} dispatching to {} platform(s)", post_id, platforms.len())
        }
        Event::AttemptCompleted {
            post_id,
            platform,
            success: false,
            error_kind,
            tries,
            ..
        } => warn!(
            "omni-send: post {} failed on {} after {} tr{} ({})",
            post_id,
            platform,
            tries,
            if *tries == 1 { "y" } else { "ies" },
            error_kind.map(|k| k.as_str()).unwrap_or("unknown")
        ),
        Event::AttemptCompleted { .. } => {}
        Event::DispatchCompleted { post_id, status } => {
            info!("omni-send: post {} finished as {}", post_id, status)
        }
    }
}

/// Flip `shutdown` on SIGINT/SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, stopping gracefully...", sig);
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}
