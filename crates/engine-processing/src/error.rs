use connectors::error::TableError;
use engine_core::error::StateStoreError;
use thiserror::Error;

/// Failures that stop the current invocation. Per-row problems are not
/// errors: they become `Failed` row results.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Failed to read row {row} of '{sheet}': {source}")]
    Read {
        sheet: String,
        row: usize,
        #[source]
        source: TableError,
    },

    #[error("Failed to locate output row for input row {row}: {source}")]
    Locate {
        row: usize,
        #[source]
        source: TableError,
    },

    /// Nothing was recorded and the cursor did not move.
    #[error("StorageWriteFailed: writing results of row {row} to output row {output_row} failed: {source}")]
    StorageWriteFailed {
        row: usize,
        output_row: usize,
        #[source]
        source: TableError,
    },

    #[error("Failed to append ledger entry for row {row}: {source}")]
    Ledger {
        row: usize,
        #[source]
        source: StateStoreError,
    },

    #[error("Failed to persist cursor after row {row}: {source}")]
    Cursor {
        row: usize,
        #[source]
        source: StateStoreError,
    },

    /// The service refused the request itself; every further row would fail
    /// the same way.
    #[error("Enrichment rejected at row {row} (status {status}): {message}")]
    EnrichmentRejected {
        row: usize,
        status: u16,
        message: String,
    },
}

impl StepError {
    pub fn row(&self) -> usize {
        match self {
            StepError::Read { row, .. }
            | StepError::Locate { row, .. }
            | StepError::StorageWriteFailed { row, .. }
            | StepError::Ledger { row, .. }
            | StepError::Cursor { row, .. }
            | StepError::EnrichmentRejected { row, .. } => *row,
        }
    }
}
