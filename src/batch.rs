use chrono::{DateTime, Local, NaiveDate, Utc};
use futures::FutureExt;
use metrics::{counter, histogram};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::pipeline::{PipelineSettings, Stage, StageFailure, VenuePipeline, VenueReport, VenueStatus};
use crate::registry::VenueConfig;
use crate::renderer::PageRenderer;
use crate::types::BatchResult;

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub pipeline: PipelineSettings,
    /// Pause between venues.
    pub venue_delay: Duration,
}

/// Result of one pass over every configured venue.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub venues: Vec<VenueReport>,
}

impl BatchReport {
    pub fn record_count(&self) -> usize {
        self.venues.iter().map(|v| v.records.len()).sum()
    }

    pub fn failed_venues(&self) -> usize {
        self.venues.iter().filter(|v| v.status == VenueStatus::Failed).count()
    }

    /// True when there were venues to scrape and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        !self.venues.is_empty() && self.failed_venues() == self.venues.len()
    }

    /// Every venue's records, concatenated in configuration order.
    pub fn into_result(self) -> BatchResult {
        self.venues.into_iter().flat_map(|v| v.records).collect()
    }
}

/// Drives the venue pipeline over all venues, one at a time, on a shared
/// renderer.
pub struct BatchRunner {
    renderer: Arc<dyn PageRenderer>,
    settings: BatchSettings,
}

impl BatchRunner {
    pub fn new(renderer: Arc<dyn PageRenderer>, settings: BatchSettings) -> Self {
        Self { renderer, settings }
    }

    pub async fn run_all(&self, venues: &[VenueConfig]) -> BatchReport {
        self.run_all_on(venues, Local::now().date_naive()).await
    }

    /// Runs the batch with `today` as the reference day for date filtering.
    pub async fn run_all_on(&self, venues: &[VenueConfig], today: NaiveDate) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let span = info_span!("batch", run_id = %run_id);

        let reports = async {
            info!("Starting batch run over {} venues for {}", venues.len(), today);
            counter!("show_scraper_batch_runs_total").increment(1);

            let pipeline = VenuePipeline::new(self.renderer.as_ref(), self.settings.pipeline);
            let mut reports = Vec::with_capacity(venues.len());

            for (i, venue) in venues.iter().enumerate() {
                if i > 0 && !self.settings.venue_delay.is_zero() {
                    tokio::time::sleep(self.settings.venue_delay).await;
                }

                // A panic inside one venue must not take the batch with it.
                let report = match AssertUnwindSafe(pipeline.run(venue, today)).catch_unwind().await {
                    Ok(report) => report,
                    Err(_) => {
                        error!(venue = %venue.name, "Venue pipeline panicked, contributing no records");
                        VenueReport::failed(&venue.name, StageFailure::venue(Stage::Run, "pipeline panicked"))
                    }
                };
                reports.push(report);
            }
            reports
        }
        .instrument(span.clone())
        .await;

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            venues: reports,
        };

        histogram!("show_scraper_batch_duration_seconds").record(clock.elapsed().as_secs_f64());
        span.in_scope(|| {
            info!(
                "Batch run finished: {} records, {} of {} venues failed",
                report.record_count(),
                report.failed_venues(),
                report.venues.len()
            );
        });
        report
    }
}
