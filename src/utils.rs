use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs::data_dir;

const APP_DIR: &str = "event-sync";

/// Per-user data directory. Only computed here; directories are created by
/// `ensure_parent` when something is actually written.
pub fn data_root() -> PathBuf {
    data_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn database_path() -> PathBuf {
    data_root().join("event-sync.sqlite")
}

/// Config file location; `EVENT_SYNC_CONFIG` overrides the data-root default.
pub fn config_path() -> PathBuf {
    match env::var_os("EVENT_SYNC_CONFIG") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => data_root().join("config.json"),
    }
}

pub fn ensure_parent(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return;
    }
    if let Err(err) = fs::create_dir_all(parent) {
        tracing::warn!(path = ?parent, "failed to create parent: {err}");
    }
}
