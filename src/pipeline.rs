//! Scrapes one venue: listing page, today's candidates, event pages, records.
//!
//! Every stage returns a [`StageResult`]. A failure scoped to one event page
//! drops that candidate and the venue carries on; a venue-scoped failure ends
//! the venue with zero records. Nothing here returns an error to the caller:
//! the outcome is always a [`VenueReport`].

use chrono::NaiveDate;
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::date_filter::is_today;
use crate::extractor::{extract_detail, extract_listing, extract_rows, ListingCandidate, SelectorStats};
use crate::registry::{FieldSelectors, VenueConfig};
use crate::renderer::{PageRenderer, RenderTimeouts};
use crate::types::ShowRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchListing,
    ExtractListing,
    FetchDetail,
    ExtractDetail,
    /// The venue run as a whole, for failures outside any one stage.
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum FailureScope {
    /// The whole venue is lost.
    Venue,
    /// One event page is lost.
    Page { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub scope: FailureScope,
    pub reason: String,
}

impl StageFailure {
    pub fn venue(stage: Stage, reason: impl ToString) -> Self {
        Self { stage, scope: FailureScope::Venue, reason: reason.to_string() }
    }

    fn page(stage: Stage, url: &str, reason: impl ToString) -> Self {
        Self {
            stage,
            scope: FailureScope::Page { url: url.to_string() },
            reason: reason.to_string(),
        }
    }
}

pub type StageResult<T> = std::result::Result<T, StageFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    Succeeded,
    Failed,
}

/// What one venue contributed to a batch.
#[derive(Debug, Clone, Serialize)]
pub struct VenueReport {
    pub venue: String,
    pub status: VenueStatus,
    pub records: Vec<ShowRecord>,
    /// Page-scoped failures of a succeeded venue, or the one venue-scoped
    /// failure of a failed venue (plus any page failures before it).
    pub failures: Vec<StageFailure>,
}

impl VenueReport {
    pub fn failed(venue: &str, failure: StageFailure) -> Self {
        Self {
            venue: venue.to_string(),
            status: VenueStatus::Failed,
            records: Vec::new(),
            failures: vec![failure],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub timeouts: RenderTimeouts,
    /// Pause between consecutive event page fetches of one venue.
    pub detail_delay: Duration,
}

pub struct VenuePipeline<'a> {
    renderer: &'a dyn PageRenderer,
    settings: PipelineSettings,
}

impl<'a> VenuePipeline<'a> {
    pub fn new(renderer: &'a dyn PageRenderer, settings: PipelineSettings) -> Self {
        Self { renderer, settings }
    }

    #[instrument(skip_all, fields(venue = %venue.name))]
    pub async fn run(&self, venue: &VenueConfig, today: NaiveDate) -> VenueReport {
        let mut page_failures = Vec::new();
        let outcome = self.run_stages(venue, today, &mut page_failures).await;

        match outcome {
            Ok(records) => {
                let records = dedupe_by_title(records);
                info!("Venue finished with {} records ({} page failures)", records.len(), page_failures.len());
                counter!("show_scraper_venue_success_total", "venue" => venue.name.clone()).increment(1);
                histogram!("show_scraper_venue_records", "venue" => venue.name.clone()).record(records.len() as f64);
                VenueReport {
                    venue: venue.name.clone(),
                    status: VenueStatus::Succeeded,
                    records,
                    failures: page_failures,
                }
            }
            Err(failure) => {
                warn!(stage = ?failure.stage, reason = %failure.reason, "Venue failed, contributing no records");
                counter!("show_scraper_venue_failure_total", "venue" => venue.name.clone()).increment(1);
                page_failures.push(failure);
                VenueReport {
                    venue: venue.name.clone(),
                    status: VenueStatus::Failed,
                    records: Vec::new(),
                    failures: page_failures,
                }
            }
        }
    }

    async fn run_stages(
        &self,
        venue: &VenueConfig,
        today: NaiveDate,
        page_failures: &mut Vec<StageFailure>,
    ) -> StageResult<Vec<ShowRecord>> {
        let html = self
            .renderer
            .render(&venue.url, self.settings.timeouts)
            .await
            .map_err(|e| StageFailure::venue(Stage::FetchListing, e))?;

        match &venue.event_page {
            Some(event_page) => {
                let candidates = todays_candidates(&html, venue, today)?;
                Ok(self.fetch_details(venue, event_page, candidates, page_failures).await)
            }
            None => direct_records(&html, venue, today),
        }
    }

    /// Visits each candidate's event page in order. A failed page is
    /// recorded and skipped.
    async fn fetch_details(
        &self,
        venue: &VenueConfig,
        event_page: &FieldSelectors,
        candidates: Vec<ListingCandidate>,
        page_failures: &mut Vec<StageFailure>,
    ) -> Vec<ShowRecord> {
        let mut records = Vec::with_capacity(candidates.len());

        for (i, candidate) in candidates.iter().enumerate() {
            if i > 0 && !self.settings.detail_delay.is_zero() {
                tokio::time::sleep(self.settings.detail_delay).await;
            }

            match self.fetch_detail(venue, event_page, candidate).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(url = %candidate.url, "Event page had no title, skipping"),
                Err(failure) => {
                    warn!(url = %candidate.url, reason = %failure.reason, "Event page failed, skipping");
                    counter!("show_scraper_detail_failure_total", "venue" => venue.name.clone()).increment(1);
                    page_failures.push(failure);
                }
            }
        }
        records
    }

    async fn fetch_detail(
        &self,
        venue: &VenueConfig,
        event_page: &FieldSelectors,
        candidate: &ListingCandidate,
    ) -> StageResult<Option<ShowRecord>> {
        let html = self
            .renderer
            .render(&candidate.url, self.settings.timeouts)
            .await
            .map_err(|e| StageFailure::page(Stage::FetchDetail, &candidate.url, e))?;

        let (mut fields, stats) = extract_detail(&html, event_page, &candidate.url)
            .map_err(|e| StageFailure::page(Stage::ExtractDetail, &candidate.url, e))?;
        log_stats(&venue.name, "event_page", &stats);

        if fields.date.is_empty() {
            fields.date = candidate.date_text.clone();
        }
        Ok(ShowRecord::assemble(fields, &venue.name, &candidate.url))
    }
}

/// Listing rows whose date is today. Filtering happens here so that other
/// days never cost an event page fetch.
fn todays_candidates(html: &str, venue: &VenueConfig, today: NaiveDate) -> StageResult<Vec<ListingCandidate>> {
    let extraction = extract_listing(html, venue).map_err(|e| StageFailure::venue(Stage::ExtractListing, e))?;
    log_stats(&venue.name, "listing", &extraction.stats);
    ensure_rows(&extraction.stats, venue)?;

    let total = extraction.items.len();
    let mut seen = HashSet::new();
    let candidates: Vec<_> = extraction
        .items
        .into_iter()
        .filter(|c| is_today(&c.date_text, today))
        // Several rows may link to the same event page; fetch it once.
        .filter(|c| seen.insert(c.url.clone()))
        .collect();
    info!("{} of {} listing rows are today", candidates.len(), total);
    Ok(candidates)
}

/// Records read straight from listing rows, filtered to today after assembly.
fn direct_records(html: &str, venue: &VenueConfig, today: NaiveDate) -> StageResult<Vec<ShowRecord>> {
    let extraction = extract_rows(html, venue).map_err(|e| StageFailure::venue(Stage::ExtractListing, e))?;
    log_stats(&venue.name, "listing", &extraction.stats);
    ensure_rows(&extraction.stats, venue)?;

    Ok(extraction
        .items
        .into_iter()
        .filter_map(|fields| ShowRecord::assemble(fields, &venue.name, &venue.url))
        .filter(|record| is_today(&record.date, today))
        .collect())
}

fn ensure_rows(stats: &SelectorStats, venue: &VenueConfig) -> StageResult<()> {
    if stats.rows == 0 {
        return Err(StageFailure::venue(
            Stage::ExtractListing,
            format!("row selector '{}' matched nothing", venue.row_selector),
        ));
    }
    Ok(())
}

fn log_stats(venue: &str, page: &'static str, stats: &SelectorStats) {
    debug!(venue, page, rows = stats.rows, fields = ?stats.fields, "Selector matches");
    if page == "listing" {
        histogram!("show_scraper_listing_rows", "venue" => venue.to_string()).record(stats.rows as f64);
    }
}

/// Keeps the first record of each title, preserving order.
pub fn dedupe_by_title(records: Vec<ShowRecord>) -> Vec<ShowRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.title.clone()))
        .collect()
}
