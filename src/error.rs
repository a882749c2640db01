/// Failure of a whole source sync attempt (or of one of its collaborators).
///
/// Errors never cross the source boundary: the orchestrator turns every
/// variant into a failure message for that source and moves on.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        SyncError::Parse(message.into())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Store(format!("payload serialization failed: {err}"))
    }
}

/// A single feed item could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid timestamp in `{field}`: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// An optional event field was read without checking its presence first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event does not have `{0}` set")]
    Unset(&'static str),
}
