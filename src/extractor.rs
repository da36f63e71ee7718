//! Pure extraction over rendered HTML. Nothing here performs I/O.
//!
//! A field whose selector is missing or matches nothing comes back as an
//! empty string; absence is normal on venue sites. Only a selector that does
//! not parse is an error.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use url::Url;

use crate::error::{Result, ScraperError};
use crate::registry::{FieldSelectors, VenueConfig};
use crate::types::ShowFields;

static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

pub fn compile_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ScraperError::Selector {
        selector: selector.to_string(),
        reason: format!("{e:?}"),
    })
}

/// A listing row worth following to its event page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCandidate {
    /// Absolute event page URL.
    pub url: String,
    pub date_text: String,
}

/// How many nodes each selector matched. Diagnostic only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorStats {
    pub rows: usize,
    /// Rows (or pages) in which each field selector found a node.
    pub fields: BTreeMap<&'static str, usize>,
}

impl SelectorStats {
    fn hit(&mut self, field: &'static str) {
        *self.fields.entry(field).or_default() += 1;
    }

    pub fn matched(&self, field: &str) -> usize {
        self.fields.get(field).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub items: Vec<T>,
    pub stats: SelectorStats,
}

struct CompiledFields {
    title: Option<Selector>,
    date: Option<Selector>,
    time: Option<Selector>,
    price: Option<Selector>,
    description: Option<Selector>,
    image: Option<Selector>,
    image_attr: String,
}

fn compile_opt(selector: &Option<String>) -> Result<Option<Selector>> {
    selector.as_deref().map(compile_selector).transpose()
}

impl CompiledFields {
    fn compile(fields: &FieldSelectors) -> Result<Self> {
        Ok(Self {
            title: compile_opt(&fields.title)?,
            date: compile_opt(&fields.date)?,
            time: compile_opt(&fields.time)?,
            price: compile_opt(&fields.price)?,
            description: compile_opt(&fields.description)?,
            image: compile_opt(&fields.image)?,
            image_attr: fields.image_attr().to_string(),
        })
    }

    fn read(&self, scope: ElementRef<'_>, base: &str, stats: &mut SelectorStats) -> ShowFields {
        let mut text = |field: &'static str, sel: &Option<Selector>| -> String {
            match sel.as_ref().and_then(|s| scope.select(s).next()) {
                Some(el) => {
                    stats.hit(field);
                    element_text(el)
                }
                None => String::new(),
            }
        };

        let title = text("title", &self.title);
        let date = text("date", &self.date);
        let time = text("time", &self.time);
        let price = text("price", &self.price);
        let description = text("description", &self.description);

        let image = self
            .image
            .as_ref()
            .and_then(|s| scope.select(s).next())
            .and_then(|el| image_url(el, &self.image_attr))
            .map(|src| resolve_url(base, &src));
        if image.is_some() {
            stats.hit("image");
        }

        ShowFields { title, date, time, price, description, image }
    }
}

/// Text content, trimmed, with every inner whitespace run (newlines and
/// indentation from the markup included) collapsed to a single space.
fn element_text(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().map(element_text)
}

/// Reads `attr` from the node itself, or from the first `img` inside it when
/// the selector points at a wrapper.
fn image_url(el: ElementRef<'_>, attr: &str) -> Option<String> {
    let own = el.value().attr(attr).map(str::trim).filter(|s| !s.is_empty());
    own.map(str::to_string).or_else(|| {
        el.select(&IMG)
            .next()
            .and_then(|img| img.value().attr(attr))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Resolves `href` against the page it was found on. Falls back to the raw
/// value when either side is not a usable URL.
pub fn resolve_url(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Listing rows with a followable link, paired with their listing date text.
/// Rows without a link are skipped.
pub fn extract_listing(html: &str, venue: &VenueConfig) -> Result<Extraction<ListingCandidate>> {
    let row_sel = compile_selector(&venue.row_selector)?;
    let date_sel = compile_selector(&venue.date_selector)?;
    let link_sel = venue.link_selector.as_deref().map(compile_selector).transpose()?;

    let document = Html::parse_document(html);
    let mut stats = SelectorStats::default();
    let mut items = Vec::new();

    for row in document.select(&row_sel) {
        stats.rows += 1;

        let date_text = match first_text(row, &date_sel) {
            Some(text) => {
                stats.hit("date");
                text
            }
            None => String::new(),
        };

        let href = link_sel
            .as_ref()
            .and_then(|s| row.select(s).next())
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty());

        if let Some(href) = href {
            stats.hit("link");
            items.push(ListingCandidate {
                url: resolve_url(&venue.url, href),
                date_text,
            });
        }
    }

    Ok(Extraction { items, stats })
}

/// One set of fields per listing row, for venues without event pages.
/// The row's date falls back to the venue's listing date selector.
pub fn extract_rows(html: &str, venue: &VenueConfig) -> Result<Extraction<ShowFields>> {
    let row_sel = compile_selector(&venue.row_selector)?;
    let date_sel = compile_selector(&venue.date_selector)?;
    let fields = CompiledFields::compile(&venue.row_fields)?;

    let document = Html::parse_document(html);
    let mut stats = SelectorStats::default();
    let mut items = Vec::new();

    for row in document.select(&row_sel) {
        stats.rows += 1;
        let mut show = fields.read(row, &venue.url, &mut stats);
        if show.date.is_empty() {
            if let Some(text) = first_text(row, &date_sel) {
                stats.hit("date");
                show.date = text;
            }
        }
        items.push(show);
    }

    Ok(Extraction { items, stats })
}

/// Fields of a single event page.
pub fn extract_detail(html: &str, selectors: &FieldSelectors, page_url: &str) -> Result<(ShowFields, SelectorStats)> {
    let fields = CompiledFields::compile(selectors)?;
    let document = Html::parse_document(html);
    let mut stats = SelectorStats::default();
    let show = fields.read(document.root_element(), page_url, &mut stats);
    Ok((show, stats))
}
