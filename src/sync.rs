//! Fan-out over configured sources behind a TTL gate.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfigStore;
use crate::error::SyncError;
use crate::fetch::{fetch_all, FetchOutcome};
use crate::models::{Event, EventSourceConfig};
use crate::sources::{SkippedItem, SourcePlugin, SourceRegistry};

/// Where "last synced at" lives between runs.
pub trait SyncStateStore: Send + Sync {
    fn last_synced_at(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, SyncError>;

    fn record_synced(&self, source_id: &str, at: DateTime<Utc>) -> Result<(), SyncError>;
}

/// Downstream consumer of a source's merged events.
pub trait EventSink: Send + Sync {
    fn store(&self, source: &EventSourceConfig, events: &[Event]) -> Result<usize, SyncError>;
}

/// A source is due when it has never synced or `ttl` seconds have passed.
pub fn is_due(last_synced: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl: u64) -> bool {
    match last_synced {
        None => true,
        Some(last) => {
            let elapsed = now.signed_duration_since(last).num_seconds().max(0);
            elapsed.unsigned_abs() >= ttl
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Synced { fetched: usize, pages: usize },
    Failed { cause: String, fetched: usize },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncMessage {
    pub source_id: String,
    pub source_label: String,
    pub status: SyncStatus,
    pub locations_created: Vec<String>,
    pub skipped: Vec<SkippedItem>,
}

impl SyncMessage {
    fn new(source: &EventSourceConfig, status: SyncStatus) -> Self {
        Self {
            source_id: source.id.clone(),
            source_label: source.label.clone(),
            status,
            locations_created: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn failed(source: &EventSourceConfig, err: &SyncError) -> Self {
        Self::new(
            source,
            SyncStatus::Failed {
                cause: err.to_string(),
                fetched: 0,
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, SyncStatus::Failed { .. })
    }
}

impl fmt::Display for SyncMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            SyncStatus::Synced { fetched, pages } => write!(
                f,
                "{}: fetched {fetched} events from {pages} page(s)",
                self.source_label
            )?,
            SyncStatus::Failed { cause, fetched: 0 } => {
                write!(f, "{}: sync failed: {cause}", self.source_label)?
            }
            SyncStatus::Failed { cause, fetched } => write!(
                f,
                "{}: sync failed after {fetched} events: {cause}",
                self.source_label
            )?,
            SyncStatus::Cancelled => write!(f, "{}: sync cancelled", self.source_label)?,
        }
        if !self.locations_created.is_empty() {
            write!(
                f,
                "; created locations: {}",
                self.locations_created.join(", ")
            )?;
        }
        if !self.skipped.is_empty() {
            write!(f, "; skipped {} item(s)", self.skipped.len())?;
        }
        Ok(())
    }
}

pub struct Synchronizer {
    sources: Arc<dyn SourceConfigStore>,
    state: Arc<dyn SyncStateStore>,
    sink: Arc<dyn EventSink>,
    registry: Arc<SourceRegistry>,
    max_parallel: usize,
}

impl Synchronizer {
    pub fn new(
        sources: Arc<dyn SourceConfigStore>,
        state: Arc<dyn SyncStateStore>,
        sink: Arc<dyn EventSink>,
        registry: SourceRegistry,
    ) -> Self {
        Self {
            sources,
            state,
            sink,
            registry: Arc::new(registry),
            max_parallel: 4,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Sync every enabled source that is due. Always returns; one message
    /// per attempted source, in configuration order.
    pub async fn sync_all(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<SyncMessage> {
        self.run_sources(now, cancel, false).await
    }

    /// Like `sync_all`, but every enabled source runs whatever its TTL says.
    pub async fn force_sync_all(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<SyncMessage> {
        self.run_sources(now, cancel, true).await
    }

    async fn run_sources(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        force: bool,
    ) -> Vec<SyncMessage> {
        let sources = match self.sources.list_enabled_sources() {
            Ok(sources) => sources,
            Err(err) => {
                tracing::error!("unable to list sources: {err}");
                return vec![SyncMessage {
                    source_id: String::new(),
                    source_label: "source configuration".to_string(),
                    status: SyncStatus::Failed {
                        cause: err.to_string(),
                        fetched: 0,
                    },
                    locations_created: Vec::new(),
                    skipped: Vec::new(),
                }];
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut running: Vec<(usize, EventSourceConfig, JoinHandle<SyncMessage>)> = Vec::new();
        let mut messages: Vec<(usize, SyncMessage)> = Vec::new();

        for (index, source) in sources.into_iter().enumerate() {
            let plugin = match self.prepare(&source, now, force) {
                Ok(Some(plugin)) => plugin,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(source = %source.id, "sync failed: {err}");
                    messages.push((index, SyncMessage::failed(&source, &err)));
                    continue;
                }
            };

            let semaphore = semaphore.clone();
            let state = self.state.clone();
            let sink = self.sink.clone();
            let cancel = cancel.clone();
            let task_source = source.clone();
            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => {
                        return SyncMessage::new(&task_source, SyncStatus::Cancelled);
                    }
                };
                run_source(plugin, task_source, state, sink, now, &cancel).await
            });
            running.push((index, source, handle));
        }

        // The tasks already run concurrently; a failed join still maps to its source.
        for (index, source, handle) in running {
            let message = match handle.await {
                Ok(message) => message,
                Err(err) => {
                    tracing::error!(source = %source.id, "source sync task failed: {err}");
                    SyncMessage::new(
                        &source,
                        SyncStatus::Failed {
                            cause: format!("source task failed: {err}"),
                            fetched: 0,
                        },
                    )
                }
            };
            messages.push((index, message));
        }

        messages.sort_by_key(|(index, _)| *index);
        messages.into_iter().map(|(_, message)| message).collect()
    }

    /// Sync one configured source now, ignoring its TTL and enabled flag.
    pub async fn sync_source(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SyncMessage, SyncError> {
        let source = self
            .sources
            .find_source(source_id)?
            .ok_or_else(|| SyncError::config(format!("unknown source id {source_id:?}")))?;
        source.validate()?;
        let plugin = self.registry.get(&source.source_type)?;
        Ok(run_source(
            plugin,
            source,
            self.state.clone(),
            self.sink.clone(),
            now,
            cancel,
        )
        .await)
    }

    /// `Ok(None)` when the source is not due yet and `force` is off.
    fn prepare(
        &self,
        source: &EventSourceConfig,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<Option<Arc<dyn SourcePlugin>>, SyncError> {
        source.validate()?;
        let last = self.state.last_synced_at(&source.id)?;
        if !force && !is_due(last, now, source.ttl) {
            tracing::debug!(source = %source.id, last_synced = ?last, ttl = source.ttl, "not due");
            return Ok(None);
        }
        self.registry.get(&source.source_type).map(Some)
    }
}

async fn run_source(
    plugin: Arc<dyn SourcePlugin>,
    source: EventSourceConfig,
    state: Arc<dyn SyncStateStore>,
    sink: Arc<dyn EventSink>,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> SyncMessage {
    let FetchOutcome {
        events,
        pages,
        skipped,
        locations_created,
        failure,
        cancelled,
    } = fetch_all(plugin.as_ref(), &source, cancel).await;

    let status = if cancelled {
        tracing::info!(source = %source.id, "sync cancelled");
        SyncStatus::Cancelled
    } else {
        let events: Vec<Event> = events.into_values().collect();
        let fetched = events.len();
        let commit_source = source.clone();
        let succeeded = failure.is_none();
        let committed = tokio::task::spawn_blocking(move || -> Result<(), SyncError> {
            if !events.is_empty() {
                sink.store(&commit_source, &events)?;
            }
            if succeeded {
                state.record_synced(&commit_source.id, now)?;
            }
            Ok(())
        })
        .await
        .map_err(|err| SyncError::Store(format!("commit task failed: {err}")))
        .and_then(|result| result);

        match (failure, committed) {
            (_, Err(err)) | (Some(err), Ok(())) => {
                tracing::warn!(source = %source.id, fetched, "sync failed: {err}");
                SyncStatus::Failed {
                    cause: err.to_string(),
                    fetched,
                }
            }
            (None, Ok(())) => {
                tracing::info!(source = %source.id, fetched, pages, "sync complete");
                SyncStatus::Synced { fetched, pages }
            }
        }
    };

    SyncMessage {
        locations_created,
        skipped,
        ..SyncMessage::new(&source, status)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn never_synced_is_due() {
        assert!(is_due(None, t(), 3600));
    }

    #[test]
    fn ttl_gate_boundaries() {
        let last = Some(t());
        assert!(!is_due(last, t() + Duration::seconds(1800), 3600));
        assert!(!is_due(last, t() + Duration::seconds(3599), 3600));
        assert!(is_due(last, t() + Duration::seconds(3600), 3600));
        assert!(is_due(last, t() + Duration::seconds(7200), 3600));
    }

    #[test]
    fn zero_ttl_is_always_due() {
        assert!(is_due(Some(t()), t(), 0));
    }

    #[test]
    fn message_text_covers_counts_locations_and_causes() {
        let source = EventSourceConfig::new("midd", "Middlebury", "r25rss", "https://e.edu/rss");
        let mut ok = SyncMessage::new(
            &source,
            SyncStatus::Synced {
                fetched: 12,
                pages: 2,
            },
        );
        ok.locations_created.push("Kirk Center".into());
        assert_eq!(
            ok.to_string(),
            "Middlebury: fetched 12 events from 2 page(s); created locations: Kirk Center"
        );

        let failed = SyncMessage::failed(&source, &SyncError::transport("timed out"));
        assert!(failed.is_failure());
        assert_eq!(
            failed.to_string(),
            "Middlebury: sync failed: transport error: timed out"
        );
    }

    mod orchestration {
        use std::sync::Arc;
        use std::time::Duration as StdDuration;

        use async_trait::async_trait;
        use chrono::FixedOffset;

        use super::*;
        use crate::config::{AppConfig, ConfigStore};
        use crate::db::Store;
        use crate::location::{LocationResolver, MemoryLocationStore};
        use crate::sources::{FetchedPage, PluginContext};
        use crate::transport::HttpTransport;

        struct OnePage;

        #[async_trait]
        impl SourcePlugin for OnePage {
            fn type_id(&self) -> &'static str {
                "one-page"
            }

            async fn fetch_page(
                &self,
                source: &EventSourceConfig,
                after: Option<DateTime<FixedOffset>>,
            ) -> Result<FetchedPage, SyncError> {
                let mut page = FetchedPage::default();
                if after.is_none() {
                    let start = DateTime::parse_from_rfc3339("2024-04-02T18:00:00+00:00").unwrap();
                    let id = format!("{}-1", source.id);
                    page.events
                        .insert(id.clone(), Event::new(id, &source.id, "Talk", start));
                }
                Ok(page)
            }
        }

        struct Broken;

        #[async_trait]
        impl SourcePlugin for Broken {
            fn type_id(&self) -> &'static str {
                "broken"
            }

            async fn fetch_page(
                &self,
                _source: &EventSourceConfig,
                _after: Option<DateTime<FixedOffset>>,
            ) -> Result<FetchedPage, SyncError> {
                Err(SyncError::transport("503 Service Unavailable"))
            }
        }

        struct Hanging;

        #[async_trait]
        impl SourcePlugin for Hanging {
            fn type_id(&self) -> &'static str {
                "hanging"
            }

            async fn fetch_page(
                &self,
                _source: &EventSourceConfig,
                _after: Option<DateTime<FixedOffset>>,
            ) -> Result<FetchedPage, SyncError> {
                std::future::pending().await
            }
        }

        struct Panicking;

        #[async_trait]
        impl SourcePlugin for Panicking {
            fn type_id(&self) -> &'static str {
                "panicking"
            }

            async fn fetch_page(
                &self,
                _source: &EventSourceConfig,
                _after: Option<DateTime<FixedOffset>>,
            ) -> Result<FetchedPage, SyncError> {
                panic!("feed parser blew up")
            }
        }

        fn registry() -> SourceRegistry {
            let context = PluginContext {
                transport: Arc::new(
                    HttpTransport::new(StdDuration::from_secs(1), "test").unwrap(),
                ),
                resolver: LocationResolver::new(Arc::new(MemoryLocationStore::new())),
            };
            let mut registry = SourceRegistry::new(context);
            registry.register("one-page", "One page", |_| Arc::new(OnePage) as Arc<dyn SourcePlugin>);
            registry.register("broken", "Broken", |_| Arc::new(Broken) as Arc<dyn SourcePlugin>);
            registry.register("hanging", "Hanging", |_| Arc::new(Hanging) as Arc<dyn SourcePlugin>);
            registry.register("panicking", "Panicking", |_| {
                Arc::new(Panicking) as Arc<dyn SourcePlugin>
            });
            registry
        }

        fn source(id: &str, source_type: &str) -> EventSourceConfig {
            EventSourceConfig::new(id, &id.to_uppercase(), source_type, "https://example.edu/rss")
        }

        fn synchronizer(sources: Vec<EventSourceConfig>) -> (Synchronizer, Arc<Store>) {
            let store = Arc::new(Store::open_in_memory().unwrap());
            let config = ConfigStore::from_config(AppConfig {
                sources,
                ..AppConfig::default()
            });
            let sync = Synchronizer::new(Arc::new(config), store.clone(), store.clone(), registry());
            (sync, store)
        }

        #[tokio::test]
        async fn second_run_inside_ttl_does_nothing() {
            let (sync, store) = synchronizer(vec![source("a", "one-page")]);
            let cancel = CancellationToken::new();

            let first = sync.sync_all(t(), &cancel).await;
            assert_eq!(first.len(), 1);
            assert_eq!(first[0].status, SyncStatus::Synced { fetched: 1, pages: 2 });
            assert_eq!(store.last_synced_at("a").unwrap(), Some(t()));

            let early = sync.sync_all(t() + Duration::seconds(1800), &cancel).await;
            assert!(early.is_empty());
            assert_eq!(store.last_synced_at("a").unwrap(), Some(t()));

            let due = sync.sync_all(t() + Duration::seconds(3600), &cancel).await;
            assert_eq!(due.len(), 1);
            assert_eq!(
                store.last_synced_at("a").unwrap(),
                Some(t() + Duration::seconds(3600))
            );
        }

        #[tokio::test]
        async fn one_failing_source_does_not_stop_the_others() {
            let (sync, store) = synchronizer(vec![
                source("a", "one-page"),
                source("b", "broken"),
                source("c", "ical"),
                source("d", "one-page"),
            ]);

            let messages = sync.sync_all(t(), &CancellationToken::new()).await;
            let ids: Vec<_> = messages.iter().map(|m| m.source_id.as_str()).collect();
            assert_eq!(ids, ["a", "b", "c", "d"]);

            assert!(!messages[0].is_failure());
            assert!(messages[1].to_string().contains("503"));
            assert!(messages[2].to_string().contains("unknown source type"));
            assert!(!messages[3].is_failure());

            assert_eq!(store.count_events("a").unwrap(), 1);
            assert_eq!(store.count_events("d").unwrap(), 1);
            assert_eq!(store.last_synced_at("b").unwrap(), None);
            assert_eq!(store.last_synced_at("c").unwrap(), None);
        }

        #[tokio::test]
        async fn panicking_source_still_gets_a_message() {
            let (sync, store) = synchronizer(vec![
                source("boom", "panicking"),
                source("a", "one-page"),
            ]);

            let messages = sync.sync_all(t(), &CancellationToken::new()).await;
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].source_id, "boom");
            assert!(messages[0].is_failure());
            assert!(messages[0].to_string().contains("source task failed"));
            assert!(!messages[1].is_failure());
            assert_eq!(store.last_synced_at("boom").unwrap(), None);
            assert_eq!(store.count_events("a").unwrap(), 1);
        }

        #[tokio::test]
        async fn forced_run_ignores_ttl_and_survives_bad_sources() {
            let mut bad = source("bad", "one-page");
            bad.uri = "not a url".into();
            let (sync, store) = synchronizer(vec![
                source("a", "one-page"),
                bad,
                source("c", "ical"),
                source("d", "one-page"),
            ]);
            let cancel = CancellationToken::new();
            sync.sync_all(t(), &cancel).await;

            let later = t() + Duration::seconds(60);
            assert!(sync.sync_all(later, &cancel).await.iter().all(|m| m.is_failure()));

            let forced = sync.force_sync_all(later, &cancel).await;
            let ids: Vec<_> = forced.iter().map(|m| m.source_id.as_str()).collect();
            assert_eq!(ids, ["a", "bad", "c", "d"]);
            assert!(forced[1].is_failure());
            assert!(forced[2].is_failure());
            assert!(!forced[3].is_failure());
            assert_eq!(store.last_synced_at("a").unwrap(), Some(later));
            assert_eq!(store.last_synced_at("d").unwrap(), Some(later));
        }

        #[tokio::test]
        async fn invalid_source_is_reported_not_fetched() {
            let mut bad = source("bad", "one-page");
            bad.uri = "not a url".into();
            let (sync, store) = synchronizer(vec![bad]);

            let messages = sync.sync_all(t(), &CancellationToken::new()).await;
            assert_eq!(messages.len(), 1);
            assert!(messages[0].is_failure());
            assert_eq!(store.count_events("bad").unwrap(), 0);
        }

        #[tokio::test]
        async fn cancellation_interrupts_hanging_source() {
            let (sync, store) = synchronizer(vec![
                source("a", "one-page"),
                source("slow", "hanging"),
            ]);
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(StdDuration::from_millis(50)).await;
                trigger.cancel();
            });

            let messages = tokio::time::timeout(StdDuration::from_secs(5), sync.sync_all(t(), &cancel))
                .await
                .expect("sync_all should return after cancellation");

            assert_eq!(messages.len(), 2);
            assert!(!messages[0].is_failure());
            assert_eq!(messages[1].status, SyncStatus::Cancelled);
            assert_eq!(store.last_synced_at("slow").unwrap(), None);
            assert_eq!(store.count_events("a").unwrap(), 1);
        }

        #[tokio::test]
        async fn manual_sync_ignores_ttl_and_rejects_unknown_ids() {
            let (sync, store) = synchronizer(vec![source("a", "one-page")]);
            let cancel = CancellationToken::new();

            sync.sync_all(t(), &cancel).await;
            let later = t() + Duration::seconds(60);
            let message = sync.sync_source("a", later, &cancel).await.unwrap();
            assert!(!message.is_failure());
            assert_eq!(store.last_synced_at("a").unwrap(), Some(later));

            assert!(matches!(
                sync.sync_source("missing", later, &cancel).await,
                Err(SyncError::Config(_))
            ));
        }
    }
}
