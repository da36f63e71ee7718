//! Runs batches into the cache: once a day on a cron job, and on request.
//!
//! Only one batch may be in flight, since every run shares the same browser
//! session. The daily job and force requests take the run lock without
//! waiting; a second request while a run is in progress gets
//! [`ScraperError::Busy`]. Cache reads never take the lock.

use chrono::{DateTime, Local, NaiveTime, Timelike, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::batch::BatchRunner;
use crate::error::{Result, ScraperError};
use crate::registry::VenueConfig;
use crate::storage::CacheStore;
use crate::types::BatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Daily,
    Forced,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub records: usize,
    pub venues: usize,
    pub failed_venues: usize,
    /// When the result was written to the cache; `None` if it was not.
    pub cached_at: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    runner: BatchRunner,
    store: Arc<dyn CacheStore>,
    venues: Vec<VenueConfig>,
    run_lock: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(runner: BatchRunner, store: Arc<dyn CacheStore>, venues: Vec<VenueConfig>) -> Self {
        Self {
            runner,
            store,
            venues,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn venues(&self) -> &[VenueConfig] {
        &self.venues
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Runs a batch now and writes it to the cache.
    pub async fn run_and_store(&self, trigger: Trigger) -> Result<RunSummary> {
        let _guard = self.run_lock.try_lock().map_err(|_| ScraperError::Busy)?;
        self.refresh(trigger).await
    }

    /// Starts a batch in the background and returns straight away.
    pub fn force(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let guard = self.run_lock.clone().try_lock_owned().map_err(|_| ScraperError::Busy)?;
        let scheduler = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = scheduler.refresh(Trigger::Forced).await {
                error!("Forced scrape failed: {}", e);
            }
        }))
    }

    /// Runs a batch and hands back its records without touching the cache.
    pub async fn run_fresh(&self) -> Result<BatchResult> {
        let _guard = self.run_lock.try_lock().map_err(|_| ScraperError::Busy)?;
        Ok(self.runner.run_all(&self.venues).await.into_result())
    }

    /// Caller must hold the run lock.
    async fn refresh(&self, trigger: Trigger) -> Result<RunSummary> {
        info!(?trigger, "Refreshing scrape cache");
        let report = self.runner.run_all(&self.venues).await;

        let mut summary = RunSummary {
            run_id: report.run_id,
            trigger,
            records: report.record_count(),
            venues: report.venues.len(),
            failed_venues: report.failed_venues(),
            cached_at: None,
        };

        // A run where every venue failed keeps the previous entry.
        if report.all_failed() {
            warn!(run_id = %report.run_id, "Every venue failed, keeping the previous cache entry");
            counter!("show_scraper_cache_skipped_total").increment(1);
            return Ok(summary);
        }

        let entry = self.store.put(&report.into_result()).await.map_err(|e| {
            error!("Writing the scrape cache failed, previous entry stays: {}", e);
            e
        })?;
        counter!("show_scraper_cache_writes_total").increment(1);
        info!(records = entry.data.len(), timestamp = %entry.timestamp, "Scrape cache updated");

        summary.cached_at = Some(entry.timestamp);
        Ok(summary)
    }

    /// Registers the daily run at `at`, local time, and starts the cron
    /// scheduler. The returned handle must be kept and shut down on exit.
    pub async fn start_daily(self: &Arc<Self>, at: NaiveTime) -> Result<JobScheduler> {
        let cron = daily_cron(at);
        let scheduler = JobScheduler::new().await?;

        let this = Arc::clone(self);
        let job = Job::new_async_tz(cron.as_str(), Local, move |_uuid, _lock| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                match this.run_and_store(Trigger::Daily).await {
                    Ok(summary) => info!(records = summary.records, "Daily scrape finished"),
                    Err(ScraperError::Busy) => warn!("Daily scrape skipped, a run is already in progress"),
                    Err(e) => error!("Daily scrape failed: {}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        info!(cron = %cron, "Daily scrape scheduled at {} local time", at.format("%H:%M"));
        Ok(scheduler)
    }
}

/// Six-field cron expression (with seconds) firing once a day at `at`.
pub fn daily_cron(at: NaiveTime) -> String {
    format!("0 {} {} * * *", at.minute(), at.hour())
}
