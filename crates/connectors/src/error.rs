use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Row {index} not found in sheet '{sheet}'")]
    RowNotFound { sheet: String, index: usize },

    /// Header rows are never addressed as data.
    #[error("Row {index} of sheet '{sheet}' is a header row")]
    HeaderRow { sheet: String, index: usize },

    #[error("Column '{column}' not found in sheet '{sheet}'")]
    UnknownColumn { sheet: String, column: String },

    #[error("Write to row {index} of sheet '{sheet}' rejected: {reason}")]
    WriteRejected {
        sheet: String,
        index: usize,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl TableError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TableError::RowNotFound { .. })
    }
}

/// Failure modes of one enrichment call. Each calls for a different reaction
/// from the step engine, so they are kept distinct.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnrichError {
    /// Back off and retry later; the row must not be advanced past.
    #[error("Rate limited by the enrichment service (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The response could not be used. Retrying will not help.
    #[error("Malformed enrichment response: {0}")]
    Malformed(String),

    /// Network trouble or a timeout. Worth a bounded number of retries.
    #[error("Transient enrichment failure: {0}")]
    Transient(String),

    /// The service refused the request outright (bad credentials, bad model...).
    /// Every following row would fail the same way.
    #[error("Enrichment request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}
