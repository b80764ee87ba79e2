use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("State storage error: {0}")]
    Storage(String),

    #[error("Failed to encode state record '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// A stored record no longer decodes. Callers treat the record as stale.
    #[error("Corrupt state record '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<sled::Error> for StateStoreError {
    fn from(err: sled::Error) -> Self {
        StateStoreError::Storage(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Invocation already in progress (held by {holder} since {acquired_at})")]
    Held {
        holder: String,
        acquired_at: DateTime<Utc>,
    },

    #[error("Lock contention: record changed while acquiring")]
    Contended,

    #[error(transparent)]
    Store(#[from] StateStoreError),
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Failed to load batch state: {0}")]
    Load(#[from] StateStoreError),
}
