use crate::{
    batch::state::BatchState,
    core::identifiers::{BatchId, RowId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A failed row as shown to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedRowRef {
    pub row_index: usize,
    pub row_id: RowId,
    pub reason: String,
}

/// Operator-facing view of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchStatus {
    pub batch_id: Option<BatchId>,
    pub state: BatchState,
    pub input_sheet: Option<String>,
    pub output_sheet: Option<String>,
    pub total_target: usize,
    pub processed: usize,
    pub remaining: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub last_error: Option<String>,
    pub failed_rows: Vec<FailedRowRef>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BatchStatus {
    pub fn idle() -> Self {
        BatchStatus {
            batch_id: None,
            state: BatchState::Idle,
            input_sheet: None,
            output_sheet: None,
            total_target: 0,
            processed: 0,
            remaining: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            last_error: None,
            failed_rows: Vec::new(),
            backoff_until: None,
            updated_at: None,
        }
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_target == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total_target as f64
    }
}

/// Final record of a batch, kept after its cursor is deleted so that
/// `status` still has something to report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub state: BatchState,
    pub input_sheet: String,
    pub output_sheet: String,
    pub total_target: usize,
    pub processed: usize,
    pub last_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}
