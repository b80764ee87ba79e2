use crate::{
    error::{ProgressError, StateStoreError},
    state::{
        StateStore,
        cursor::CursorStore,
        keys::StateKeys,
        ledger::{LedgerEntry, ProcessingLedger},
        summary::SummaryStore,
    },
};
use model::{
    batch::summary::{BatchStatus, FailedRowRef},
    core::identifiers::BatchId,
    records::result::RowStatus,
};
use std::sync::Arc;
use tracing::warn;

/// Read-only view over the persisted state of a job.
#[derive(Clone)]
pub struct ProgressService {
    store: Arc<dyn StateStore>,
    keys: StateKeys,
    cursors: CursorStore,
    summaries: SummaryStore,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    succeeded: usize,
    skipped: usize,
    failed: usize,
}

impl ProgressService {
    pub fn new(store: Arc<dyn StateStore>, keys: StateKeys) -> Self {
        ProgressService {
            cursors: CursorStore::new(store.clone(), &keys),
            summaries: SummaryStore::new(store.clone(), &keys),
            store,
            keys,
        }
    }

    pub fn ledger(&self, input_sheet: &str, output_sheet: &str) -> ProcessingLedger {
        ProcessingLedger::new(self.store.clone(), &self.keys, input_sheet, output_sheet)
    }

    pub async fn status(&self) -> Result<BatchStatus, ProgressError> {
        match self.cursors.load().await {
            Ok(Some(cursor)) => {
                let ledger = self.ledger(&cursor.input_sheet, &cursor.output_sheet);
                let entries = batch_entries(&ledger, &cursor.batch_id).await?;
                let processed = cursor.completed();
                let counts = count(&entries, processed);

                Ok(BatchStatus {
                    batch_id: Some(cursor.batch_id.clone()),
                    state: cursor.state,
                    input_sheet: Some(cursor.input_sheet.clone()),
                    output_sheet: Some(cursor.output_sheet.clone()),
                    total_target: cursor.total_target,
                    processed,
                    remaining: cursor.remaining(),
                    succeeded: counts.succeeded,
                    skipped: counts.skipped,
                    failed: counts.failed,
                    last_error: cursor.last_error.clone(),
                    failed_rows: failed_refs(&entries),
                    backoff_until: cursor.backoff_until,
                    updated_at: Some(cursor.updated_at),
                })
            }
            Ok(None) => self.summary_status().await,
            Err(StateStoreError::Corrupt { key, reason }) => {
                warn!(%key, %reason, "Cursor record is corrupt, reporting last summary");
                let mut status = self.summary_status().await?;
                status.last_error = Some(format!("corrupt cursor: {reason}"));
                Ok(status)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn summary_status(&self) -> Result<BatchStatus, ProgressError> {
        let Some(summary) = self.summaries.load().await? else {
            return Ok(BatchStatus::idle());
        };

        let ledger = self.ledger(&summary.input_sheet, &summary.output_sheet);
        let entries = batch_entries(&ledger, &summary.batch_id).await?;
        let counts = count(&entries, summary.processed);

        Ok(BatchStatus {
            batch_id: Some(summary.batch_id.clone()),
            state: summary.state,
            input_sheet: Some(summary.input_sheet.clone()),
            output_sheet: Some(summary.output_sheet.clone()),
            total_target: summary.total_target,
            processed: summary.processed,
            remaining: summary.total_target.saturating_sub(summary.processed),
            succeeded: counts.succeeded,
            skipped: counts.skipped,
            failed: counts.failed,
            last_error: summary.last_error.clone(),
            failed_rows: failed_refs(&entries),
            backoff_until: None,
            updated_at: Some(summary.finished_at),
        })
    }

    /// Rows of a sheet pair whose latest outcome is a failure.
    pub async fn failures(
        &self,
        input_sheet: &str,
        output_sheet: &str,
    ) -> Result<Vec<FailedRowRef>, ProgressError> {
        let failed = self.ledger(input_sheet, output_sheet).failed_rows().await?;
        Ok(failed_refs(&failed))
    }
}

async fn batch_entries(
    ledger: &ProcessingLedger,
    batch_id: &BatchId,
) -> Result<Vec<LedgerEntry>, StateStoreError> {
    Ok(ledger
        .latest_per_row()
        .await?
        .into_iter()
        .filter(|e| &e.batch_id == batch_id)
        .collect())
}

/// Rows skipped because the ledger already had them leave no entry, so the
/// skipped count is whatever of `processed` is not otherwise accounted for.
fn count(entries: &[LedgerEntry], processed: usize) -> Counts {
    let succeeded = entries
        .iter()
        .filter(|e| e.result.status == RowStatus::Success)
        .count();
    let failed = entries.iter().filter(|e| e.result.status.is_failed()).count();
    Counts {
        succeeded,
        failed,
        skipped: processed.saturating_sub(succeeded + failed),
    }
}

fn failed_refs(entries: &[LedgerEntry]) -> Vec<FailedRowRef> {
    let mut refs: Vec<FailedRowRef> = entries
        .iter()
        .filter_map(|e| match &e.result.status {
            RowStatus::Failed(reason) => Some(FailedRowRef {
                row_index: e.result.row_index,
                row_id: e.result.row_id.clone(),
                reason: reason.to_string(),
            }),
            _ => None,
        })
        .collect();
    refs.sort_by_key(|r| r.row_index);
    refs
}
