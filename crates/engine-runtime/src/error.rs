use connectors::error::{EnrichError, TableError};
use engine_config::settings::error::SettingsError;
use engine_core::error::{LockError, ProgressError, StateStoreError};
use engine_processing::error::StepError;
use model::{batch::state::BatchState, core::identifiers::BatchId, error::ModelError};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level errors of the batch engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Initialization error.
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Environment variable '{0}' with the enrichment API key is not set")]
    MissingApiKey(String),

    #[error("Failed to read instructions from {path}: {source}")]
    Instructions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Enrichment client error: {0}")]
    Enrichment(#[from] EnrichError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Batch {batch_id} is already active (state {state})")]
    BatchAlreadyActive { batch_id: BatchId, state: BatchState },

    #[error("No active batch")]
    NoActiveBatch,

    #[error("Nothing to process: {0}")]
    NothingToProcess(String),
}

impl EngineError {
    /// Another invocation holds the lock; trying again later is expected to work.
    pub fn is_lock_held(&self) -> bool {
        matches!(
            self,
            EngineError::Lock(LockError::Held { .. } | LockError::Contended)
        )
    }
}
