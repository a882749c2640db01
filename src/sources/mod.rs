pub mod base;
pub mod normalize;
pub mod r25_rss;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::error::SyncError;
use crate::location::LocationResolver;
use crate::models::{Event, EventSourceConfig};
use crate::transport::FeedTransport;

/// How to talk to one kind of external feed.
#[async_trait]
pub trait SourcePlugin: Send + Sync {
    fn type_id(&self) -> &'static str;

    /// Fetch the items starting at or after `after` (the feed's own start
    /// when `None`), with the source's time shift already applied.
    ///
    /// A feed with nothing left returns an empty page, not an error.
    async fn fetch_page(
        &self,
        source: &EventSourceConfig,
        after: Option<DateTime<FixedOffset>>,
    ) -> Result<FetchedPage, SyncError>;
}

/// One page of normalized events keyed by event id.
///
/// Iteration is in id order, not feed order.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub events: BTreeMap<String, Event>,
    pub skipped: Vec<SkippedItem>,
    pub locations_created: Vec<String>,
}

impl FetchedPage {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn latest_start(&self) -> Option<DateTime<FixedOffset>> {
        self.events.values().map(Event::start).max()
    }
}

/// An item dropped because it could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub guid: Option<String>,
    pub reason: String,
}

/// Collaborators handed to every plugin constructor.
#[derive(Clone)]
pub struct PluginContext {
    pub transport: Arc<dyn FeedTransport>,
    pub resolver: LocationResolver,
}

pub type PluginConstructor = fn(&PluginContext) -> Arc<dyn SourcePlugin>;

#[derive(Clone, Serialize)]
pub struct SourceTypeInfo {
    pub id: String,
    pub label: String,
}

struct Registration {
    type_id: String,
    label: String,
    constructor: PluginConstructor,
}

/// Type string -> plugin constructor, fixed at startup.
pub struct SourceRegistry {
    context: PluginContext,
    registrations: Vec<Registration>,
}

impl SourceRegistry {
    pub fn new(context: PluginContext) -> Self {
        Self {
            context,
            registrations: Vec::new(),
        }
    }

    pub fn builtin(context: PluginContext) -> Self {
        let mut registry = Self::new(context);
        registry.register(r25_rss::TYPE_ID, r25_rss::LABEL, r25_rss::R25Rss::boxed);
        registry
    }

    /// Later registrations for the same type replace earlier ones.
    pub fn register(&mut self, type_id: &str, label: &str, constructor: PluginConstructor) {
        self.registrations.retain(|r| r.type_id != type_id);
        self.registrations.push(Registration {
            type_id: type_id.to_string(),
            label: label.to_string(),
            constructor,
        });
    }

    pub fn types(&self) -> Vec<SourceTypeInfo> {
        self.registrations
            .iter()
            .map(|r| SourceTypeInfo {
                id: r.type_id.clone(),
                label: r.label.clone(),
            })
            .collect()
    }

    pub fn get(&self, type_id: &str) -> Result<Arc<dyn SourcePlugin>, SyncError> {
        self.registrations
            .iter()
            .find(|r| r.type_id == type_id)
            .map(|r| (r.constructor)(&self.context))
            .ok_or_else(|| SyncError::config(format!("unknown source type {type_id:?}")))
    }
}
