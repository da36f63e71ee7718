//! Decides whether a venue's date text refers to "today".
//!
//! Venue sites print dates for humans ("Thu Jun 12", "June 12th, 2025",
//! "6/12"), usually without a year. Both the parsed date and the reference
//! day are pinned to [`REFERENCE_YEAR`] before comparison, so only the
//! calendar month and day decide the match.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

use crate::constants::REFERENCE_YEAR;

/// Month names, full or abbreviated. Nothing else counts: "Marathon" and
/// "Decibel" are words, not months.
const MONTH: &str = r"jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").unwrap());

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b({MONTH})\b\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b")).unwrap()
});

static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTH})\b")).unwrap()
});

static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/\d{2,4})?\b").unwrap());

#[derive(Debug, Clone, Copy)]
enum Shape {
    Iso,
    MonthDay,
    DayMonth,
    Slash,
}

impl Shape {
    const ALL: [Shape; 4] = [Shape::Iso, Shape::MonthDay, Shape::DayMonth, Shape::Slash];

    fn regex(self) -> &'static Regex {
        match self {
            Shape::Iso => &ISO_DATE,
            Shape::MonthDay => &MONTH_DAY,
            Shape::DayMonth => &DAY_MONTH,
            Shape::Slash => &SLASH_DATE,
        }
    }

    /// Month and day from this shape's captures.
    fn month_day(self, caps: &Captures<'_>) -> Option<(u32, u32)> {
        match self {
            Shape::Iso => Some((caps[2].parse().ok()?, caps[3].parse().ok()?)),
            Shape::MonthDay => Some((month_number(&caps[1])?, caps[2].parse().ok()?)),
            Shape::DayMonth => Some((month_number(&caps[2])?, caps[1].parse().ok()?)),
            Shape::Slash => Some((caps[1].parse().ok()?, caps[2].parse().ok()?)),
        }
    }
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn pinned(month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(REFERENCE_YEAR, month, day)
}

/// Parses venue date text into a calendar day in [`REFERENCE_YEAR`].
///
/// Recognised shapes, searched anywhere in the text with the leftmost
/// winning: ISO `2025-06-12`, month-name first (`Thu Jun 12`,
/// `June 12th, 2025`), day first (`12 June`, `13th of June`), and US numeric
/// `6/12` or `06/12/2025`. Any year in the text is ignored. Returns `None` for text with no recognisable date or an
/// impossible one (`Jun 31`).
pub fn parse_show_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    // The date is whichever shape starts first: in "Fri 13 June 8 PM" that
    // is "13 June", not "June 8".
    let (shape, caps) = Shape::ALL
        .into_iter()
        .filter_map(|shape| shape.regex().captures(text).map(|caps| (shape, caps)))
        .min_by_key(|(_, caps)| caps.get(0).map_or(usize::MAX, |m| m.start()))?;

    let (month, day) = shape.month_day(&caps)?;
    pinned(month, day)
}

/// True when `date_text` names the same month and day as `reference`.
/// Unparseable text is logged and counts as "not today".
pub fn is_today(date_text: &str, reference: NaiveDate) -> bool {
    let Some(show_day) = parse_show_date(date_text) else {
        warn!(date_text, "Could not parse show date, treating as not today");
        return false;
    };

    match reference.with_year(REFERENCE_YEAR) {
        Some(reference) => show_day == reference,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn june_12_2024() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
    }

    #[test]
    fn month_and_day_without_year_match() {
        assert!(is_today("Jun 12", june_12_2024()));
        assert!(is_today("Wed Jun 12", june_12_2024()));
        assert!(is_today("Wednesday, June 12th", june_12_2024()));
    }

    #[test]
    fn any_year_in_the_text_is_ignored() {
        assert!(is_today("Jun 12, 2023", june_12_2024()));
        assert!(is_today("2019-06-12", june_12_2024()));
        assert!(is_today("06/12/2031", june_12_2024()));
    }

    #[test]
    fn reference_year_is_ignored_too() {
        let reference = NaiveDate::from_ymd_opt(2026, 6, 12).unwrap();
        assert!(is_today("Fri Jun 12", reference));
    }

    #[test]
    fn other_days_do_not_match() {
        assert!(!is_today("Jun 13", june_12_2024()));
        assert!(!is_today("Jul 12", june_12_2024()));
        assert!(!is_today("6/11", june_12_2024()));
    }

    #[test]
    fn unparseable_text_is_not_today() {
        assert!(!is_today("TBD", june_12_2024()));
        assert!(!is_today("", june_12_2024()));
        assert!(!is_today("Jun 31", june_12_2024()));
    }

    #[test]
    fn day_first_and_time_suffix() {
        assert!(is_today("12 June 2025", june_12_2024()));
        assert!(is_today("Thu Jun 12 @ 8:00 pm", june_12_2024()));
    }

    #[test]
    fn day_first_is_not_confused_by_a_trailing_hour() {
        let june_13 = NaiveDate::from_ymd_opt(2025, 6, 13).unwrap();
        let june_8 = NaiveDate::from_ymd_opt(2025, 6, 8).unwrap();
        assert!(is_today("Fri 13 June 8 PM", june_13));
        assert!(!is_today("Fri 13 June 8 PM", june_8));
        assert!(is_today("Friday 13th of June, 8 PM", june_13));
    }

    #[test]
    fn words_starting_like_months_are_not_months() {
        let march_5 = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert!(!is_today("Marathon 5", march_5));
        assert_eq!(parse_show_date("Mayhem 12"), None);
        assert_eq!(parse_show_date("Decibel 3 night"), None);
        assert_eq!(parse_show_date("5 Marathons"), None);
        assert_eq!(parse_show_date("Sept. 5"), NaiveDate::from_ymd_opt(2024, 9, 5));
        assert_eq!(parse_show_date("March 5"), NaiveDate::from_ymd_opt(2024, 3, 5));
    }

    #[test]
    fn leap_day_is_representable() {
        let reference = NaiveDate::from_ymd_opt(2028, 2, 29).unwrap();
        assert!(is_today("Feb 29", reference));
        assert_eq!(parse_show_date("Feb 29"), NaiveDate::from_ymd_opt(2024, 2, 29));
    }
}
