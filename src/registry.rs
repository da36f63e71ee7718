use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::constants::DEFAULT_IMAGE_ATTR;
use crate::error::{Result, ScraperError};
use crate::extractor::compile_selector;

const BUILTIN_VENUES: &str = include_str!("../venues.toml");

/// Where to find shows on one venue's site.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VenueConfig {
    pub name: String,
    /// Listing page enumerating the venue's upcoming events.
    pub url: String,
    /// Selects one listing row per event.
    #[serde(rename = "row")]
    pub row_selector: String,
    /// Event page link, relative to the row.
    #[serde(rename = "link", default)]
    pub link_selector: Option<String>,
    /// Listing date text, relative to the row.
    #[serde(rename = "date")]
    pub date_selector: String,
    /// Fields read straight from the row when there is no `event_page`.
    #[serde(default)]
    pub row_fields: FieldSelectors,
    /// Fields read from each event page. Presence makes the venue two-stage.
    #[serde(default)]
    pub event_page: Option<FieldSelectors>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldSelectors {
    pub title: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Attribute holding the image URL, `src` by default.
    pub image_attr: Option<String>,
}

impl FieldSelectors {
    pub fn image_attr(&self) -> &str {
        self.image_attr.as_deref().unwrap_or(DEFAULT_IMAGE_ATTR)
    }

    /// Configured selectors, keyed by field name.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("title", &self.title),
            ("date", &self.date),
            ("time", &self.time),
            ("price", &self.price),
            ("description", &self.description),
            ("image", &self.image),
        ]
        .into_iter()
        .filter_map(|(name, sel)| sel.as_deref().map(|s| (name, s)))
    }
}

impl VenueConfig {
    pub fn is_two_stage(&self) -> bool {
        self.event_page.is_some()
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| ScraperError::Config(format!("venue '{}': {}", self.name, msg));

        if self.name.trim().is_empty() {
            return Err(ScraperError::Config("venue with an empty name".into()));
        }
        if self.row_selector.trim().is_empty() {
            return Err(invalid("row selector is empty"));
        }

        let url = url::Url::parse(&self.url).map_err(|e| invalid(&format!("bad url '{}': {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(&format!("url '{}' is not http(s)", self.url)));
        }

        if self.is_two_stage() && self.link_selector.is_none() {
            return Err(invalid("an event_page group needs a link selector"));
        }

        compile_selector(&self.row_selector)?;
        compile_selector(&self.date_selector)?;
        if let Some(link) = &self.link_selector {
            compile_selector(link)?;
        }
        for (_, sel) in self.row_fields.iter() {
            compile_selector(sel)?;
        }
        if let Some(event_page) = &self.event_page {
            for (_, sel) in event_page.iter() {
                compile_selector(sel)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct VenueFile {
    #[serde(rename = "venue", default)]
    venues: Vec<VenueConfig>,
}

/// Parses and validates a TOML venue list.
pub fn parse_venues(content: &str) -> Result<Vec<VenueConfig>> {
    let file: VenueFile = toml::from_str(content)?;

    let mut seen = HashSet::new();
    for venue in &file.venues {
        venue.validate()?;
        if !seen.insert(venue.name.to_lowercase()) {
            return Err(ScraperError::Config(format!("duplicate venue '{}'", venue.name)));
        }
        debug!(venue = %venue.name, two_stage = venue.is_two_stage(), "Loaded venue config");
    }
    Ok(file.venues)
}

/// Venues compiled into the binary.
pub fn builtin_venues() -> Result<Vec<VenueConfig>> {
    parse_venues(BUILTIN_VENUES)
}

/// Loads venues from a TOML file.
pub fn load_venues<P: AsRef<Path>>(path: P) -> Result<Vec<VenueConfig>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        ScraperError::Config(format!("Failed to read venue file '{}': {e}", path.display()))
    })?;
    let venues = parse_venues(&content)?;
    info!("Loaded {} venues from {}", venues.len(), path.display());
    Ok(venues)
}

/// Keeps the venues named in `names` (case-insensitive), in configuration
/// order. Unknown names are an error.
pub fn select_venues(venues: &[VenueConfig], names: &[String]) -> Result<Vec<VenueConfig>> {
    for name in names {
        if !venues.iter().any(|v| v.name.eq_ignore_ascii_case(name)) {
            return Err(ScraperError::Config(format!("unknown venue '{name}'")));
        }
    }
    Ok(venues
        .iter()
        .filter(|v| names.iter().any(|n| v.name.eq_ignore_ascii_case(n)))
        .cloned()
        .collect())
}
