use super::{StateStore, decode, encode, keys::StateKeys};
use crate::error::StateStoreError;
use model::{
    core::identifiers::{BatchId, RowId},
    records::result::RowResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub batch_id: BatchId,
    pub result: RowResult,
}

/// Append-only record of per-row outcomes for one (input, output) sheet pair.
///
/// Entries of a row are keyed `{scope}{row hash}:{seq}` so a prefix scan
/// returns them oldest first. The newest entry decides whether the row is done.
#[derive(Clone)]
pub struct ProcessingLedger {
    store: Arc<dyn StateStore>,
    scope: String,
}

impl ProcessingLedger {
    pub fn new(
        store: Arc<dyn StateStore>,
        keys: &StateKeys,
        input_sheet: &str,
        output_sheet: &str,
    ) -> Self {
        ProcessingLedger {
            store,
            scope: keys.ledger_scope(input_sheet, output_sheet),
        }
    }

    pub async fn append(&self, entry: &LedgerEntry) -> Result<(), StateStoreError> {
        let row_prefix = StateKeys::ledger_row(&self.scope, &entry.result.row_id.key());
        let existing = self.store.scan_prefix(&row_prefix).await?;
        let seq = existing
            .last()
            .and_then(|(key, _)| key.rsplit(':').next())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|s| s + 1)
            .unwrap_or(0);

        let key = StateKeys::ledger_entry(&row_prefix, seq);
        let bytes = encode(&key, entry)?;
        self.store.set(&key, bytes).await?;
        debug!(
            row = %entry.result.row_id,
            status = %entry.result.status,
            seq,
            "Ledger entry appended"
        );
        Ok(())
    }

    pub async fn latest(&self, row_id: &RowId) -> Result<Option<LedgerEntry>, StateStoreError> {
        let row_prefix = StateKeys::ledger_row(&self.scope, &row_id.key());
        match self.store.scan_prefix(&row_prefix).await?.last() {
            Some((key, bytes)) => Ok(Some(decode(key, bytes)?)),
            None => Ok(None),
        }
    }

    /// Every entry of the scope, grouped by row, oldest first within a row.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, StateStoreError> {
        self.store
            .scan_prefix(&self.scope)
            .await?
            .iter()
            .map(|(key, bytes)| decode(key, bytes))
            .collect()
    }

    /// The newest entry of every row.
    pub async fn latest_per_row(&self) -> Result<Vec<LedgerEntry>, StateStoreError> {
        let mut latest: Vec<(String, LedgerEntry)> = Vec::new();
        for (key, bytes) in self.store.scan_prefix(&self.scope).await? {
            let row_prefix = match key.rsplit_once(':') {
                Some((prefix, _)) => prefix.to_string(),
                None => continue,
            };
            let entry: LedgerEntry = decode(&key, &bytes)?;
            match latest.last_mut() {
                Some((prefix, current)) if *prefix == row_prefix => *current = entry,
                _ => latest.push((row_prefix, entry)),
            }
        }
        Ok(latest.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Rows whose newest entry is a failure, ordered by input row index.
    pub async fn failed_rows(&self) -> Result<Vec<LedgerEntry>, StateStoreError> {
        let mut failed: Vec<LedgerEntry> = self
            .latest_per_row()
            .await?
            .into_iter()
            .filter(|e| e.result.status.is_failed())
            .collect();
        failed.sort_by_key(|e| e.result.row_index);
        Ok(failed)
    }
}
