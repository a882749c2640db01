use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_sync::{
    build_synchronizer, utils, ConfigStore, Store, SyncMessage,
    SyncScheduler, SyncStateStore,
};

#[derive(Parser)]
#[command(name = "event-sync")]
#[command(about = "Pull calendar feeds into the local event store")]
struct Cli {
    /// Path to the JSON config file.
    ///
    /// Defaults to $EVENT_SYNC_CONFIG, then config.json in the data directory.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every enabled source that is due
    Sync {
        /// Only sync this source, whether or not it is due
        #[arg(short, long, value_name = "ID")]
        source: Option<String>,

        /// Ignore the TTL gate for every enabled source
        #[arg(long)]
        force: bool,
    },
    /// Keep syncing on the configured interval until interrupted
    Watch,
    /// List configured sources with their last sync time
    Sources,
    /// List the source types this build can fetch
    Types,
    /// List known locations
    Locations,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(utils::config_path);
    let config = Arc::new(ConfigStore::load_from(&config_path)?);
    let database_path = config.read().database_path();
    let store = Arc::new(
        Store::open(&database_path)
            .with_context(|| format!("unable to open database {database_path:?}"))?,
    );
    tracing::debug!(config = ?config.path(), database = ?database_path, "loaded configuration");

    match cli.command {
        Commands::Sync { source, force } => {
            let synchronizer = build_synchronizer(config.clone(), store)?;
            let cancel = cancel_on_ctrl_c();
            let now = Utc::now();

            let messages = match (source, force) {
                (Some(id), _) => vec![synchronizer.sync_source(&id, now, &cancel).await?],
                (None, true) => synchronizer.force_sync_all(now, &cancel).await,
                (None, false) => synchronizer.sync_all(now, &cancel).await,
            };
            report(&messages)?;
        }
        Commands::Watch => {
            let synchronizer = build_synchronizer(config.clone(), store)?;
            let scheduler = SyncScheduler::new(config, Arc::new(synchronizer));
            scheduler.run(cancel_on_ctrl_c()).await?;
        }
        Commands::Sources => {
            for source in config.read().sources {
                let last = store
                    .last_synced_at(&source.id)?
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                let events = store.count_events(&source.id)?;
                let state = if source.enabled { "" } else { " (disabled)" };
                println!(
                    "{}\t{}\t{}\tttl={}s\tlast_synced={}\tevents={}{}",
                    source.id, source.label, source.source_type, source.ttl, last, events, state
                );
            }
        }
        Commands::Types => {
            let synchronizer = build_synchronizer(config, store)?;
            for info in synchronizer.registry().types() {
                println!("{}\t{}", info.id, info.label);
            }
        }
        Commands::Locations => {
            for location in store.list_locations()? {
                println!("{}\t{}", location.id, location.name);
            }
        }
    }

    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn report(messages: &[SyncMessage]) -> Result<()> {
    if messages.is_empty() {
        println!("nothing due");
        return Ok(());
    }
    for message in messages {
        println!("{message}");
    }
    let failed = messages.iter().filter(|m| m.is_failure()).count();
    if failed > 0 {
        bail!("{failed} of {} source(s) failed", messages.len());
    }
    Ok(())
}
