#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use show_scraper::batch::{BatchRunner, BatchSettings};
use show_scraper::pipeline::PipelineSettings;
use show_scraper::registry::{parse_venues, VenueConfig};
use show_scraper::renderer::{PageRenderer, RenderError, RenderTimeouts};

/// Serves canned HTML by URL and records every navigation in order.
/// Unknown URLs fail the way a dead page would.
#[derive(Default)]
pub struct FakeRenderer {
    pages: HashMap<String, String>,
    visited: Mutex<Vec<String>>,
    delay: Duration,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, url: &str, _timeouts: RenderTimeouts) -> Result<String, RenderError> {
        self.visited.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.pages.get(url).cloned().ok_or_else(|| RenderError::Navigation {
            url: url.to_string(),
            reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        })
    }
}

pub fn settings() -> BatchSettings {
    BatchSettings {
        pipeline: PipelineSettings {
            timeouts: RenderTimeouts {
                navigation: Duration::from_secs(5),
                settle: Duration::from_millis(10),
            },
            detail_delay: Duration::ZERO,
        },
        venue_delay: Duration::ZERO,
    }
}

pub fn runner(renderer: &Arc<FakeRenderer>) -> BatchRunner {
    let renderer: Arc<dyn PageRenderer> = renderer.clone();
    BatchRunner::new(renderer, settings())
}

pub fn june_12() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 12).unwrap()
}

pub const ALPHA_URL: &str = "https://alpha.test/events";

/// Two-stage venue: listing rows link to event pages.
pub fn alpha_venue() -> VenueConfig {
    venue(
        r#"
        [[venue]]
        name = "Alpha Hall"
        url = "https://alpha.test/events"
        row = ".event"
        link = "a.more"
        date = ".when"

        [venue.event_page]
        title = "h1"
        date = ".date"
        time = ".doors"
        price = ".price"
        image = ".hero"
        "#,
    )
}

/// Single-stage venue named `name`, listing at `https://<slug>.test/`.
pub fn row_venue(name: &str) -> VenueConfig {
    let slug = name.to_lowercase().replace(' ', "-");
    venue(&format!(
        r#"
        [[venue]]
        name = "{name}"
        url = "https://{slug}.test/"
        row = ".row"
        date = ".d"

        [venue.row_fields]
        title = ".t"
        price = ".p"
        "#
    ))
}

pub fn row_venue_url(name: &str) -> String {
    format!("https://{}.test/", name.to_lowercase().replace(' ', "-"))
}

fn venue(toml: &str) -> VenueConfig {
    parse_venues(toml).unwrap().remove(0)
}

/// Listing rows for a single-stage venue, as `(title, date, price)`.
pub fn row_listing(rows: &[(&str, &str, &str)]) -> String {
    let rows: String = rows
        .iter()
        .map(|(title, date, price)| {
            format!(r#"<li class="row"><h3 class="t">{title}</h3><span class="d">{date}</span><span class="p">{price}</span></li>"#)
        })
        .collect();
    format!("<html><body><ul>{rows}</ul></body></html>")
}

/// Listing rows for the two-stage venue, as `(href, date)`.
pub fn alpha_listing(rows: &[(&str, &str)]) -> String {
    let rows: String = rows
        .iter()
        .map(|(href, date)| {
            format!(r#"<div class="event"><a class="more" href="{href}">More info</a><span class="when">{date}</span></div>"#)
        })
        .collect();
    format!("<html><body>{rows}</body></html>")
}

pub fn alpha_event_page(title: &str, price: &str) -> String {
    format!(
        r#"<html><body>
            <h1>{title}</h1>
            <p class="date">Thu Jun 12</p>
            <p class="doors">Doors 7pm</p>
            <p class="price">{price}</p>
            <div class="hero"><img src="/img/{title}.jpg"></div>
        </body></html>"#
    )
}
