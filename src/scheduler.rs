use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::sync::{SyncMessage, Synchronizer};

/// Periodic `sync_all` runs. The TTL gate decides which sources actually
/// fetch, so the interval only bounds how late a due source can be.
pub struct SyncScheduler {
    config: Arc<ConfigStore>,
    synchronizer: Arc<Synchronizer>,
}

impl SyncScheduler {
    pub fn new(config: Arc<ConfigStore>, synchronizer: Arc<Synchronizer>) -> Self {
        Self {
            config,
            synchronizer,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let interval = Duration::from_secs(self.config.read().poll_interval_secs.max(1));
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("sync scheduler started (interval: {:?})", interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tracing::debug!("running sync cycle");
            self.run_once(&shutdown).await;
        }

        tracing::info!("sync scheduler stopped");
        Ok(())
    }

    /// One cycle: pick up config edits, then sync under the run deadline.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> Vec<SyncMessage> {
        let config = match self.config.reload() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("config reload failed, keeping previous settings: {err:#}");
                self.config.read()
            }
        };
        if !config.enabled {
            tracing::info!("periodic sync disabled in config");
            return Vec::new();
        }

        let run = shutdown.child_token();
        let deadline = Duration::from_secs(config.sync_deadline_secs);
        let timer = run.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(deadline) => {
                    tracing::warn!("sync run exceeded {:?}, cancelling", deadline);
                    timer.cancel();
                }
                _ = timer.cancelled() => {}
            }
        });

        let messages = self.synchronizer.sync_all(Utc::now(), &run).await;
        run.cancel();

        for message in &messages {
            if message.is_failure() {
                tracing::warn!(source = %message.source_id, "{message}");
            } else {
                tracing::info!(source = %message.source_id, "{message}");
            }
        }
        messages
    }
}
