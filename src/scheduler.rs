//! Clock and scheduler
//!
//! Two job shapes: "run every interval" and "run at wall-clock times in a
//! timezone" (minute resolution). Firings are strictly sequential per job;
//! an overrunning firing causes the next due tick to be skipped, never
//! queued. The first interval firing waits one full interval. A shutdown
//! signal lets the in-flight firing finish and suppresses all further
//! firings. Job errors are caught and logged; they never stop the
//! scheduler.

use crate::error::{Error, Result};
use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Parse an interval string like "2h", "30m", "45s", "1d".
pub fn parse_interval(raw: &str) -> Result<Duration> {
    let raw = raw.trim().to_lowercase();
    if raw.len() < 2 {
        return Err(Error::Scheduler(format!("invalid interval: {}", raw)));
    }
    let (value, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = value
        .parse()
        .map_err(|_| Error::Scheduler(format!("invalid interval: {}", raw)))?;
    if value == 0 {
        return Err(Error::Scheduler(format!("interval must be positive: {}", raw)));
    }
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return Err(Error::Scheduler(format!("invalid interval unit: {}", raw))),
    };
    Ok(Duration::from_secs(seconds))
}

/// Parse a wall-clock time like "09:00" into (hour, minute).
pub fn parse_wall_clock(raw: &str) -> Result<(u32, u32)> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.len() != 2 {
        return Err(Error::Scheduler(format!("invalid time: {}", raw)));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| Error::Scheduler(format!("invalid time: {}", raw)))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| Error::Scheduler(format!("invalid time: {}", raw)))?;
    if hour >= 24 || minute >= 60 {
        return Err(Error::Scheduler(format!("invalid time: {}", raw)));
    }
    Ok((hour, minute))
}

/// Seconds until the next occurrence of any of `times` in `tz`.
fn until_next_occurrence(times: &[(u32, u32)], tz: Tz) -> Duration {
    let now = Utc::now().with_timezone(&tz);
    let mut best: Option<ChronoDuration> = None;

    for &(hour, minute) in times {
        for day_offset in 0..2 {
            let date = (now + ChronoDuration::days(day_offset)).date_naive();
            if let Some(candidate) = date
                .and_hms_opt(hour, minute, 0)
                .and_then(|naive| naive.and_local_timezone(tz).single())
            {
                let wait = candidate.signed_duration_since(now.with_timezone(&tz));
                if wait > ChronoDuration::seconds(0)
                    && best.map(|b| wait < b).unwrap_or(true)
                {
                    best = Some(wait);
                }
            }
        }
    }

    best.and_then(|d| d.to_std().ok())
        .unwrap_or(Duration::from_secs(60))
}

/// Task scheduler with cooperative shutdown.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// A receiver that flips to `true` when [`Scheduler::shutdown`] runs;
    /// long-running jobs can watch it to stop early.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Register "run `job` every `interval`". The first firing comes after
    /// one full interval; missed ticks (job still running when the next is
    /// due) are skipped.
    pub fn add_interval_job<F, Fut>(&mut self, job_id: &'static str, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        tracing::info!(job_id, interval_secs = interval.as_secs(), "Interval job registered");

        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval's first tick is immediate; consume it so the first
            // firing waits one full period
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_job(job_id, job()).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!(job_id, "Interval job stopped");
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Register "run `job` at each wall-clock time in `tz`". The next
    /// occurrence is computed after the current firing completes, so an
    /// overrun past a scheduled time skips that firing.
    pub fn add_daily_job<F, Fut>(
        &mut self,
        job_id: &'static str,
        times: Vec<(u32, u32)>,
        tz: Tz,
        job: F,
    ) where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        tracing::info!(job_id, times = ?times, timezone = %tz, "Daily job registered");

        self.handles.push(tokio::spawn(async move {
            loop {
                let wait = until_next_occurrence(&times, tz);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        run_job(job_id, job()).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!(job_id, "Daily job stopped");
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Signal shutdown and wait for job loops to wind down. In-flight
    /// firings complete; no further firings occur.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("Scheduler stopped");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_job<Fut>(job_id: &str, fut: Fut)
where
    Fut: Future<Output = Result<()>>,
{
    tracing::debug!(job_id, "Job firing");
    if let Err(e) = fut.await {
        tracing::error!(job_id, error = %e, "Job failed");
    }
}
