//! Scheduled refresh loop.
//!
//! The worker refreshes the cache at fixed minutes of every hour
//! (`worker.minutes`, by default `[0, 15, 30, 45]`). A failed run is logged
//! and the next one is attempted on schedule; the loop only ends on
//! shutdown.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Timelike, Utc};
use tokio::sync::watch;
use tracing::Instrument;

use crate::refresh::Refresher;

/// Receiving side of a shutdown signal.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested (or the sender is gone).
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

/// Trip `sender` when the process receives Ctrl-C.
pub fn shutdown_on_ctrl_c(sender: ShutdownSender) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        sender.shutdown();
    });
}

/// The first instant strictly after `now` whose minute is in `minutes`,
/// with seconds zeroed.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use doc_portal::worker::next_run_after;
///
/// let now = Utc.with_ymd_and_hms(2022, 5, 1, 10, 14, 30).unwrap();
/// let next = next_run_after(now, &[0, 15, 30, 45]).unwrap();
/// assert_eq!(next, Utc.with_ymd_and_hms(2022, 5, 1, 10, 15, 0).unwrap());
/// ```
pub fn next_run_after(now: DateTime<Utc>, minutes: &[u32]) -> Result<DateTime<Utc>> {
    if minutes.is_empty() || minutes.iter().any(|m| *m >= 60) {
        bail!("schedule minutes must be non-empty and within 0..60");
    }

    let mut candidate = now.duration_trunc(ChronoDuration::minutes(1))? + ChronoDuration::minutes(1);
    // At most one hour of candidates before a listed minute comes up.
    for _ in 0..=60 {
        if minutes.contains(&candidate.minute()) {
            return Ok(candidate);
        }
        candidate += ChronoDuration::minutes(1);
    }
    bail!("no scheduled minute found after {}", now)
}

/// Refresh on the configured schedule until `shutdown` fires.
pub async fn run_worker(refresher: &Refresher, mut shutdown: ShutdownToken) -> Result<()> {
    let config = refresher.config();
    let instance = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("worker", worker_instance = %instance);

    async {
        tracing::info!(
            mode = config.refresh.mode.as_str(),
            minutes = ?config.worker.minutes,
            "Worker started"
        );

        if config.worker.refresh_on_start && !shutdown.is_shutdown() {
            tokio::select! {
                _ = run_logged(refresher) => {}
                _ = shutdown.wait() => {
                    tracing::info!("Worker stopped during startup refresh");
                    return Ok(());
                }
            }
        }

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let now = Utc::now();
            let next = next_run_after(now, &config.worker.minutes)?;
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next_run = %next.to_rfc3339(), "Sleeping until next refresh");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait() => break,
            }
            // An in-flight refresh is abandoned on shutdown; documents already
            // upserted stay in the cache.
            tokio::select! {
                _ = run_logged(refresher) => {}
                _ = shutdown.wait() => break,
            }
        }

        tracing::info!("Worker stopped");
        Ok(())
    }
    .instrument(span)
    .await
}

async fn run_logged(refresher: &Refresher) {
    if let Err(e) = refresher.run_once().await {
        tracing::error!(error = %format!("{:#}", e), "Refresh failed");
    }
}
