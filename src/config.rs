use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::EventSourceConfig;
use crate::utils;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Periodic runs are skipped while false; manual runs still work.
    pub enabled: bool,
    pub database_path: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub sync_deadline_secs: u64,
    pub poll_interval_secs: u64,
    pub max_parallel_sources: usize,
    pub sources: Vec<EventSourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: None,
            http_timeout_secs: 20,
            user_agent: "EventSync/0.1".to_string(),
            sync_deadline_secs: 300,
            poll_interval_secs: 300,
            max_parallel_sources: 4,
            sources: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }
}

/// Read side of the source configuration owned by the admin tooling.
pub trait SourceConfigStore: Send + Sync {
    fn list_enabled_sources(&self) -> Result<Vec<EventSourceConfig>, SyncError>;

    fn find_source(&self, id: &str) -> Result<Option<EventSourceConfig>, SyncError>;
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Result<Self> {
        Self::load_from(utils::config_path())
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = read_config(&path)?;
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self {
            path: PathBuf::new(),
            data: Mutex::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> AppConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-read the file so edits made between runs are picked up.
    pub fn reload(&self) -> Result<AppConfig> {
        if self.path.as_os_str().is_empty() {
            return Ok(self.read());
        }
        let fresh = read_config(&self.path)?;
        let mut guard = self
            .data
            .lock()
            .map_err(|_| anyhow::anyhow!("config mutex poisoned"))?;
        *guard = fresh.clone();
        Ok(fresh)
    }
}

impl SourceConfigStore for ConfigStore {
    fn list_enabled_sources(&self) -> Result<Vec<EventSourceConfig>, SyncError> {
        Ok(self
            .read()
            .sources
            .into_iter()
            .filter(|source| source.enabled)
            .collect())
    }

    fn find_source(&self, id: &str) -> Result<Option<EventSourceConfig>, SyncError> {
        Ok(self.read().sources.into_iter().find(|source| source.id == id))
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("unable to read config {path:?}"))?;
    serde_json::from_str(&contents).with_context(|| format!("invalid config {path:?}"))
}
