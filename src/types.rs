use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::PRICE_UNAVAILABLE;

/// One show scraped from a venue site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowRecord {
    pub title: String,
    /// Date text exactly as the venue printed it.
    pub date: String,
    pub time: String,
    pub price: String,
    pub description: String,
    pub image: Option<String>,
    pub venue: String,
    /// Listing or detail page the record was read from.
    #[serde(rename = "url")]
    pub source_url: String,
}

/// Field values pulled from a listing row or an event detail page, before
/// they are accepted as a [`ShowRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowFields {
    pub title: String,
    pub date: String,
    pub time: String,
    pub price: String,
    pub description: String,
    pub image: Option<String>,
}

impl ShowRecord {
    /// Builds a record from extracted fields. Returns `None` when the title or
    /// date is empty, since neither can be recovered later.
    pub fn assemble(fields: ShowFields, venue: &str, source_url: &str) -> Option<Self> {
        if fields.title.is_empty() || fields.date.is_empty() {
            return None;
        }

        Some(Self {
            title: fields.title,
            date: fields.date,
            time: fields.time,
            price: normalize_price(fields.price),
            description: fields.description,
            image: fields.image.filter(|s| !s.is_empty()),
            venue: venue.to_string(),
            source_url: source_url.to_string(),
        })
    }
}

pub fn normalize_price(price: String) -> String {
    if price.trim().is_empty() {
        PRICE_UNAVAILABLE.to_string()
    } else {
        price
    }
}

/// Records from every venue of one batch run, in venue configuration order.
pub type BatchResult = Vec<ShowRecord>;

/// The single cached batch result and the moment it was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: BatchResult,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}
