use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::service::RotationService;

/// Periodic poller: every `period` it hands the local wall-clock time to
/// [`RotationService::tick`], which decides whether a switch is due.
pub async fn run(
    service: Arc<RotationService>,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        period = %humantime::format_duration(period),
        next = %service.next_switch(),
        "schedule poller started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let now = Local::now().naive_local();
                let service = Arc::clone(&service);
                // tick may join a finished worker thread; keep it off the runtime threads
                let (started, next) = tokio::task::spawn_blocking(move || {
                    let started = service.tick(now);
                    (started, service.next_switch())
                })
                .await
                .context("schedule tick failed")?;
                debug!(%now, started, %next, "schedule tick");
            }
        }
    }

    info!("cancel received; exiting schedule poller");
    Ok(())
}
