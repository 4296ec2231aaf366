//! Structured signal extraction from raw document text.
//!
//! [`extract_metadata`] is a pure function: no I/O, no shared state, and the
//! output is sorted and deduplicated so it never depends on scan order.
//!
//! | Kind | Pattern | Normalization |
//! |------|---------|---------------|
//! | `dates` | `YYYY-MM-DD`, `M/D/YY(YY)`, `Month D, YYYY` | ISO-8601, invalid calendar dates dropped |
//! | `monetary_amounts` | `$1,200,000.00` | currency symbol stripped |
//! | `emails` | `local@domain.tld` | lower-cased |
//! | `entities` | two capitalized words | trimmed |

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{FragmentKind, Metadata};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid regex"))
}

fn slash_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\b").expect("valid regex")
    })
}

fn natural_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b({})\s+(\d{{1,2}}),?\s+(\d{{4}})\b",
            MONTHS.join("|")
        ))
        .expect("valid regex")
    })
}

fn money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+(?:\.\d{2})?|\d+(?:\.\d{2})?)").expect("valid regex")
    })
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").expect("valid regex"))
}

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+ [A-Z][a-z]+\b").expect("valid regex"))
}

/// Extract dates, monetary amounts, emails and entities from `text`.
///
/// All four kinds are always present in the result, possibly empty.
pub fn extract_metadata(text: &str) -> Metadata {
    let mut metadata = Metadata::new();
    for kind in FragmentKind::EXTRACTED {
        metadata.declare(kind);
    }

    metadata.extend(FragmentKind::Dates, extract_dates(text));
    metadata.extend(
        FragmentKind::MonetaryAmounts,
        money_re()
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
    );
    metadata.extend(
        FragmentKind::Emails,
        email_re().find_iter(text).map(|m| m.as_str().to_lowercase()),
    );
    metadata.extend(
        FragmentKind::Entities,
        entity_re().find_iter(text).map(|m| m.as_str().trim().to_string()),
    );

    metadata
}

/// All calendar dates mentioned in `text`, as ISO strings.
pub fn extract_dates(text: &str) -> Vec<String> {
    let mut dates = Vec::new();

    for caps in iso_date_re().captures_iter(text) {
        if let Some(date) = ymd(&caps[1], &caps[2], &caps[3]) {
            dates.push(date);
        }
    }

    for caps in slash_date_re().captures_iter(text) {
        if let Some(year) = expand_year(&caps[3]) {
            if let Some(date) = ymd(&year.to_string(), &caps[1], &caps[2]) {
                dates.push(date);
            }
        }
    }

    for caps in natural_date_re().captures_iter(text) {
        let month = month_number(&caps[1]);
        if let Some(month) = month {
            if let Some(date) = ymd(&caps[3], &month.to_string(), &caps[2]) {
                dates.push(date);
            }
        }
    }

    dates.sort();
    dates.dedup();
    dates
}

/// Normalize a single date string in any supported notation to ISO-8601.
///
/// Already-ISO input comes back unchanged.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(caps) = iso_date_re().captures(raw) {
        if caps[0].len() == raw.len() {
            return ymd(&caps[1], &caps[2], &caps[3]);
        }
    }
    if let Some(caps) = slash_date_re().captures(raw) {
        if caps[0].len() == raw.len() {
            let year = expand_year(&caps[3])?;
            return ymd(&year.to_string(), &caps[1], &caps[2]);
        }
    }
    if let Some(caps) = natural_date_re().captures(raw) {
        if caps[0].len() == raw.len() {
            let month = month_number(&caps[1])?;
            return ymd(&caps[3], &month.to_string(), &caps[2]);
        }
    }
    None
}

/// Two-digit years pivot at 50: `49` → 2049, `50` → 1950.
fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    if raw.len() == 2 {
        Some(if year < 50 { 2000 + year } else { 1900 + year })
    } else {
        Some(year)
    }
}

fn month_number(name: &str) -> Option<u32> {
    let lowered = name.to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lowered)
        .map(|idx| idx as u32 + 1)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<String> {
    let date = NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)?;
    Some(date.format("%Y-%m-%d").to_string())
}
