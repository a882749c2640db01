//! RSS export of the campus calendar: `xCal` timing elements plus
//! `x-trumba:customfield` extensions keyed by numeric field id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use roxmltree::{Document, Node};

use super::normalize::{normalize, RawItem};
use super::{base, FetchedPage, PluginContext, SkippedItem, SourcePlugin};
use crate::error::SyncError;
use crate::location::LocationResolver;
use crate::models::EventSourceConfig;
use crate::transport::FeedTransport;

pub const TYPE_ID: &str = "r25rss";
pub const LABEL: &str = "R25 RSS";

const XCAL_NS: &str = "urn:ietf:params:xml:ns:xcal";
const TRUMBA_NS: &str = "http://schemas.trumba.com/rss/x-trumba";

pub struct R25Rss {
    transport: Arc<dyn FeedTransport>,
    resolver: LocationResolver,
}

impl R25Rss {
    pub fn new(context: &PluginContext) -> Self {
        Self {
            transport: context.transport.clone(),
            resolver: context.resolver.clone(),
        }
    }

    pub fn boxed(context: &PluginContext) -> Arc<dyn SourcePlugin> {
        Arc::new(Self::new(context))
    }

    /// The cursor is in shifted time; the feed is queried in its own time.
    fn cursor_date(
        source: &EventSourceConfig,
        after: Option<DateTime<FixedOffset>>,
    ) -> Option<NaiveDate> {
        after.map(|dt| base::shift_hours(dt, -source.time_shift).date_naive())
    }

    /// Normalize every item and resolve its location. Resolution hits the
    /// location store synchronously, so callers on the runtime go through
    /// `spawn_blocking`.
    pub(crate) fn build_page(
        resolver: &LocationResolver,
        source: &EventSourceConfig,
        body: &str,
    ) -> Result<FetchedPage, SyncError> {
        let mut page = FetchedPage::default();

        for item in parse_items(body)? {
            let mut event = match normalize(&item, source) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(
                        source = %source.id,
                        guid = ?item.guid,
                        "skipping feed item: {err}"
                    );
                    page.skipped.push(SkippedItem {
                        guid: item.guid.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if let Ok(label) = event.location_label() {
                let label = label.to_string();
                let resolution = resolver.resolve(&label)?;
                if resolution.created {
                    page.locations_created.push(label);
                }
                event.set_location_id(resolution.id);
            }

            page.events.insert(event.id().to_string(), event);
        }

        Ok(page)
    }
}

#[async_trait]
impl SourcePlugin for R25Rss {
    fn type_id(&self) -> &'static str {
        TYPE_ID
    }

    async fn fetch_page(
        &self,
        source: &EventSourceConfig,
        after: Option<DateTime<FixedOffset>>,
    ) -> Result<FetchedPage, SyncError> {
        let url = base::page_url(&source.uri, Self::cursor_date(source, after))?;
        let body = self
            .transport
            .get(&url, source.credentials.as_ref())
            .await?;

        let resolver = self.resolver.clone();
        let source = source.clone();
        tokio::task::spawn_blocking(move || Self::build_page(&resolver, &source, &body))
            .await
            .map_err(|err| SyncError::Store(format!("page build task failed: {err}")))?
    }
}

pub fn parse_items(body: &str) -> Result<Vec<RawItem>, SyncError> {
    let document =
        Document::parse(body).map_err(|err| SyncError::parse(format!("invalid feed xml: {err}")))?;
    let channel = document
        .root_element()
        .children()
        .find(|node| is_plain(node, "channel"))
        .ok_or_else(|| SyncError::parse("feed has no channel element"))?;

    Ok(channel
        .children()
        .filter(|node| is_plain(node, "item"))
        .map(extract_item)
        .collect())
}

fn extract_item(item: Node<'_, '_>) -> RawItem {
    let mut raw = RawItem::default();
    for child in item.children().filter(Node::is_element) {
        let tag = child.tag_name();
        match (tag.namespace(), tag.name()) {
            (None, "guid") => raw.guid = Some(text_of(child)),
            (None, "title") => raw.title = Some(text_of(child)),
            (Some(XCAL_NS), "dtstart") => raw.start = Some(text_of(child)),
            (Some(XCAL_NS), "dtend") => raw.end = Some(text_of(child)),
            (Some(XCAL_NS), "description") => raw.description = Some(text_of(child)),
            (Some(XCAL_NS), "location") => raw.location = Some(text_of(child)),
            (Some(TRUMBA_NS), "customfield") => {
                if let Some(id) = child.attribute("id") {
                    raw.custom_fields.push((id.to_string(), text_of(child)));
                }
            }
            _ => {}
        }
    }
    raw
}

fn is_plain(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().namespace().is_none() && node.tag_name().name() == name
}

/// Direct text content only, like the element's string value in the feed.
fn text_of(node: Node<'_, '_>) -> String {
    node.children()
        .filter(Node::is_text)
        .filter_map(|child| child.text())
        .collect()
}
