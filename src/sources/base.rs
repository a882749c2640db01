use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::Html;

use crate::error::SyncError;

static LEADING_STAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*").expect("valid star prefix regex"));
static MIIS_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^MIIS\s*-+\s*").expect("valid MIIS prefix regex"));

/// Wrap every non-blank line of a plain-text description in its own paragraph.
pub fn paragraphs(text: &str) -> Option<String> {
    let body: String = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("<p>{line}</p>"))
        .collect();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

pub fn parse_public_flag(text: &str) -> Option<bool> {
    let lower = text.to_lowercase();
    if lower.contains("open to the public") {
        Some(true)
    } else if lower.contains("closed to the public") {
        Some(false)
    } else {
        None
    }
}

/// Decode character references only. Literal angle brackets are escaped
/// first so tag-shaped text survives as text.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let escaped = text.replace('<', "&lt;").replace('>', "&gt;");
    let fragment = Html::parse_fragment(&escaped);
    fragment.root_element().text().collect::<String>()
}

/// `*MIIS -- Lecture` -> `Lecture`.
pub fn clean_event_type(raw: &str) -> String {
    let without_star = LEADING_STAR_RE.replace(raw, "");
    let without_prefix = MIIS_PREFIX_RE.replace(&without_star, "");
    decode_entities(&without_prefix)
}

/// Parse a feed timestamp, keeping the offset the feed stated.
///
/// Values without an offset are read as wall-clock time in `zone`.
pub fn parse_feed_datetime(text: &str, zone: Tz) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for fmt in ["%Y%m%dT%H%M%S%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    if let Some(stripped) = text.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S") {
            return Some(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    for fmt in ["%Y%m%dT%H%M%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return localize(naive, zone);
        }
    }
    for fmt in ["%Y%m%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return localize(date.and_hms_opt(0, 0, 0)?, zone);
        }
    }
    None
}

fn localize(naive: NaiveDateTime, zone: Tz) -> Option<DateTime<FixedOffset>> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.fixed_offset()),
        LocalResult::Ambiguous(dt, _) => Some(dt.fixed_offset()),
        LocalResult::None => None,
    }
}

pub fn shift_hours(dt: DateTime<FixedOffset>, hours: i32) -> DateTime<FixedOffset> {
    dt + Duration::hours(i64::from(hours))
}

/// Feed URL for one page, adding `startdate=YYYYMMDD` when paging forward.
pub fn page_url(uri: &str, start_date: Option<NaiveDate>) -> Result<Url, SyncError> {
    let mut url =
        Url::parse(uri).map_err(|err| SyncError::config(format!("invalid uri {uri:?}: {err}")))?;
    if let Some(date) = start_date {
        url.query_pairs_mut()
            .append_pair("startdate", &date.format("%Y%m%d").to_string());
    }
    Ok(url)
}
