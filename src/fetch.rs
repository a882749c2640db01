//! Paginated fetch of one source.
//!
//! Feeds expose no total count and no next-page token, so the only way
//! forward is "ask again from the latest start time seen". `MAX_PAGES`
//! caps feeds that never run dry.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::models::{Event, EventSourceConfig};
use crate::sources::{SkippedItem, SourcePlugin};

pub const MAX_PAGES: usize = 5;

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Merged pages, one entry per event id, iterated in id order.
    pub events: BTreeMap<String, Event>,
    pub pages: usize,
    pub skipped: Vec<SkippedItem>,
    pub locations_created: Vec<String>,
    /// Set when a page failed; `events` still holds the pages merged before it.
    pub failure: Option<SyncError>,
    pub cancelled: bool,
}

pub async fn fetch_all(
    plugin: &dyn SourcePlugin,
    source: &EventSourceConfig,
    cancel: &CancellationToken,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    let mut cursor = None;

    for page_number in 1..=MAX_PAGES {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                break;
            }
            result = plugin.fetch_page(source, cursor) => result,
        };
        outcome.pages = page_number;

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(source = %source.id, page = page_number, "page fetch failed: {err}");
                outcome.failure = Some(err);
                break;
            }
        };

        outcome.skipped.extend(page.skipped.iter().cloned());
        outcome.locations_created.extend(page.locations_created.iter().cloned());

        if page.is_empty() {
            tracing::debug!(source = %source.id, page = page_number, "feed exhausted");
            break;
        }

        cursor = page.latest_start();
        tracing::debug!(
            source = %source.id,
            page = page_number,
            events = page.events.len(),
            cursor = ?cursor,
            "merged page"
        );
        outcome.events.extend(page.events);

        if page_number == MAX_PAGES {
            tracing::debug!(source = %source.id, "page limit reached");
        }
    }

    outcome
}
