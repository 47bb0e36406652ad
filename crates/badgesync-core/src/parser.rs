//! Event parser: extracts typed badge events from the listing payload.
//!
//! The listing endpoint returns either a JSON envelope `{"html": "<tr>…"}`
//! or the markup directly. The markup is a rendered table whose rows carry
//! the badge serial in a `data-serial` attribute; cell layout is
//! `icon | date | type | serial | name`. Because the markup often arrives
//! JSON-escaped once more, literal `\n` and `\/` sequences and `<\/td>`
//! closers must be handled.
//!
//! Malformed rows (missing serial, short rows, bad dates) are skipped, never
//! surfaced as errors. Output preserves source row order and the function is
//! pure: same input, same output.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One badge passage. Uniquely identified by `(badge_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "badgeId")]
    pub badge_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Row/cell grammar
// ---------------------------------------------------------------------------

fn row_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<tr[\s>]").unwrap())
}

fn serial_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"data-serial="([^"]+)""#).unwrap())
}

fn cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Closing tag may arrive JSON-escaped as <\/td>.
    RE.get_or_init(|| Regex::new(r"(?is)<td[^>]*>(.*?)<\\?/td>").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{2})/(\d{2})/(\d{2})\s+(\d{2}):(\d{2})").unwrap())
}

/// Strip markup and literal escape sequences from a cell, then trim.
fn clean_cell(raw: &str) -> String {
    tag_re()
        .replace_all(raw, "")
        .replace("\\n", "")
        .replace("\\/", "/")
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Timestamp normalization
// ---------------------------------------------------------------------------

/// Convert portal wall-clock time to UTC using the fixed seasonal rule:
/// April through October is treated as UTC+2, November through March as
/// UTC+1. This approximates the portal's local timezone without a tzdb;
/// rows near the actual DST switchover may be off by an hour.
fn local_to_utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    let offset_hours = if (4..=10).contains(&month) { 2 } else { 1 };
    Some(Utc.from_utc_datetime(&naive) - chrono::Duration::hours(offset_hours))
}

// ---------------------------------------------------------------------------
// parse_events
// ---------------------------------------------------------------------------

/// Parse the raw listing payload into events, in source row order.
pub fn parse_events(raw: &str) -> Vec<Event> {
    // JSON envelope or bare markup; a JSON payload without an `html` field
    // yields nothing.
    let html = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => v
            .get("html")
            .and_then(|h| h.as_str())
            .map(str::to_string)
            .unwrap_or_default(),
        Err(_) => raw.to_string(),
    };

    if html.is_empty() {
        return Vec::new();
    }

    let mut events = Vec::new();

    for row in row_split_re().split(&html).skip(1) {
        // Header row.
        if row.contains("<th") {
            continue;
        }

        let Some(serial) = serial_re().captures(row) else {
            continue;
        };
        let badge_id = serial[1].trim().to_string();
        if badge_id.is_empty() {
            continue;
        }

        let cells: Vec<String> = cell_re()
            .captures_iter(row)
            .map(|c| c[1].to_string())
            .collect();
        if cells.len() < 5 {
            continue;
        }

        let date_raw = clean_cell(&cells[1]);
        let Some(parts) = date_re().captures(&date_raw) else {
            continue;
        };
        // Two-digit year, always 20YY.
        let (day, month, year, hour, minute) = (
            parts[1].parse::<u32>().unwrap_or(0),
            parts[2].parse::<u32>().unwrap_or(0),
            2000 + parts[3].parse::<i32>().unwrap_or(0),
            parts[4].parse::<u32>().unwrap_or(0),
            parts[5].parse::<u32>().unwrap_or(0),
        );
        let Some(timestamp) = local_to_utc(year, month, day, hour, minute) else {
            continue;
        };

        let name = clean_cell(&cells[4]);
        events.push(Event {
            badge_id,
            timestamp,
            name: if name.is_empty() { None } else { Some(name) },
        });
    }

    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
