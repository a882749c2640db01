pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod location;
pub mod models;
pub mod scheduler;
pub mod sources;
pub mod sync;
pub mod transport;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

pub use config::{AppConfig, ConfigStore, SourceConfigStore};
pub use db::Store;
pub use error::{EventError, NormalizeError, SyncError};
pub use fetch::{fetch_all, FetchOutcome, MAX_PAGES};
pub use location::{LocationResolver, LocationStore, Resolution};
pub use models::{Credentials, CustomFieldMap, Event, EventSourceConfig, LocationId};
pub use scheduler::SyncScheduler;
pub use sources::{FetchedPage, PluginContext, SourcePlugin, SourceRegistry};
pub use sync::{is_due, EventSink, SyncMessage, SyncStateStore, SyncStatus, Synchronizer};
pub use transport::{FeedTransport, HttpTransport};

/// Wire the SQLite store, HTTP transport and built-in plugins behind one
/// synchronizer for the given configuration.
pub fn build_synchronizer(
    config: Arc<ConfigStore>,
    store: Arc<Store>,
) -> Result<Synchronizer, SyncError> {
    let settings = config.read();
    let transport = HttpTransport::new(
        Duration::from_secs(settings.http_timeout_secs),
        &settings.user_agent,
    )?;
    let context = PluginContext {
        transport: Arc::new(transport),
        resolver: LocationResolver::new(store.clone()),
    };
    Ok(Synchronizer::new(
        config,
        store.clone(),
        store,
        SourceRegistry::builtin(context),
    )
    .with_max_parallel(settings.max_parallel_sources))
}
