//! Binary entrypoint for the photo rotation scheduler.
//!
//! Delegates all logic to the library crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{ArgAction, Parser, Subcommand};
use photo_rotation::config::Configuration;
use photo_rotation::events::{Outcome, RotationEvent};
use photo_rotation::service::RotationService;
use photo_rotation::{SelectionMode, schedule};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(
    name = "photo-rotation-scheduler",
    version,
    about = "Rotate a gallery of photos out of a larger library"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Switch gallery photos now and wait for the result
    Switch {
        /// Override the configured selection mode
        #[arg(long)]
        mode: Option<SelectionMode>,
        /// Override the configured photo count
        #[arg(long)]
        count: Option<usize>,
    },
    /// Move every gallery photo back into the library
    Clear,
    /// Forget which photos were shown and every cached date
    ResetHistory,
    /// Print the next scheduled switch
    Next,
    /// Print engine status
    Status,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("photo_rotation={level}").parse()?)
        .add_directive(format!("photo_rotation_scheduler={level}").parse()?);
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Command::Switch { mode, count } = &cli.command {
        if let Some(mode) = mode {
            cfg.selection_mode = *mode;
        }
        if let Some(count) = count {
            cfg.photo_count = *count;
        }
    }
    let cfg = cfg.validated().context("invalid configuration values")?;

    let now = Local::now().naive_local();
    if let Command::Next = cli.command {
        println!("{}", cfg.schedule.next_after(now));
        return Ok(());
    }

    let service = Arc::new(RotationService::new(cfg, now));
    match cli.command {
        Command::Run => run_daemon(service).await,
        Command::Switch { .. } => run_once(service, RotationService::switch_now).await,
        Command::Clear => run_once(service, RotationService::clear_gallery).await,
        Command::ResetHistory => {
            service.reset_history()?;
            service.shutdown();
            println!("History and cache reset");
            Ok(())
        }
        Command::Status => {
            let status = service.status();
            println!("Status: {}", status.message);
            println!("Next switch: {}", status.next_switch);
            println!("Viewed photos: {}", status.viewed);
            Ok(())
        }
        Command::Next => Ok(()),
    }
}

async fn run_daemon(service: Arc<RotationService>) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let period = service.config().tick_interval;
    schedule::run(Arc::clone(&service), period, cancel)
        .await
        .context("schedule poller failed")?;

    tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .context("shutdown failed")?;
    Ok(())
}

async fn run_once(
    service: Arc<RotationService>,
    start: fn(&RotationService) -> Result<(), photo_rotation::Error>,
) -> Result<()> {
    let events = service.engine().subscribe();
    start(service.as_ref())?;

    let canceller = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; cancelling rotation");
                service.engine().cancel();
            }
        })
    };

    let outcome = tokio::task::spawn_blocking(move || {
        events.iter().find_map(|event| match event {
            RotationEvent::Finished { outcome, .. } => Some(outcome),
            RotationEvent::Started(_) => None,
        })
    })
    .await
    .context("waiting for rotation")?;
    canceller.abort();

    tokio::task::spawn_blocking({
        let service = Arc::clone(&service);
        move || service.shutdown()
    })
    .await
    .context("shutdown failed")?;

    match outcome {
        Some(Outcome::Failed(msg)) => bail!(msg),
        Some(outcome) => {
            println!("{outcome}");
            Ok(())
        }
        None => bail!("rotation worker ended without reporting an outcome"),
    }
}
