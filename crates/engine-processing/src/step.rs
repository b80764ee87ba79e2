use crate::{
    error::StepError,
    retry::classify_enrich_error,
    validation::{to_columns, validate_response},
};
use chrono::Utc;
use connectors::{
    enrich::{EnrichRequest, EnrichmentClient},
    error::EnrichError,
    table::adapter::{Lookup, SheetAdapter},
};
use engine_config::settings::{Placement, validated::ValidatedSettings};
use engine_core::{
    event_bus::bus::EventBus,
    metrics::Metrics,
    retry::{RetryError, RetryPolicy},
    state::{
        cursor::CursorStore,
        ledger::{LedgerEntry, ProcessingLedger},
    },
};
use model::{
    batch::cursor::BatchCursor,
    core::identifiers::RowId,
    events::BatchEvent,
    records::{
        result::{FailureReason, RowResult, RowStatus},
        row::RowData,
    },
    schema::output::OutputSchema,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Per-row behaviour of the step engine.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub identifier_column: String,
    pub fallback_column: Option<String>,
    pub placement: Placement,
    pub skip_when_output_present: bool,
    pub retry: RetryPolicy,
}

impl StepConfig {
    pub fn from_settings(settings: &ValidatedSettings) -> Self {
        let enrichment = &settings.enrichment;
        StepConfig {
            identifier_column: settings.table.identifier_column.clone(),
            fallback_column: settings.table.fallback_column.clone(),
            placement: settings.table.placement,
            skip_when_output_present: settings.table.skip_when_output_present,
            retry: RetryPolicy::new(
                enrichment.max_attempts,
                enrichment.retry_base_delay,
                enrichment.retry_max_delay,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The row reached a final outcome and the cursor moved past it.
    Processed(RowResult),
    /// Rate limited. Nothing was recorded and the cursor still points at the row.
    Backoff {
        row_index: usize,
        retry_after: Option<Duration>,
    },
    /// No rows remain in the range.
    Exhausted,
}

/// Processes exactly one row per call.
///
/// Side effects happen in a fixed order: output write, ledger append, cursor
/// advance and save. A failure at any point leaves everything after it undone.
pub struct StepEngine {
    input: Arc<SheetAdapter>,
    output: Arc<SheetAdapter>,
    enricher: Arc<dyn EnrichmentClient>,
    ledger: ProcessingLedger,
    cursors: CursorStore,
    schema: OutputSchema,
    config: StepConfig,
    metrics: Metrics,
    events: EventBus,
}

impl StepEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: Arc<SheetAdapter>,
        output: Arc<SheetAdapter>,
        enricher: Arc<dyn EnrichmentClient>,
        ledger: ProcessingLedger,
        cursors: CursorStore,
        schema: OutputSchema,
        config: StepConfig,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        StepEngine {
            input,
            output,
            enricher,
            ledger,
            cursors,
            schema,
            config,
            metrics,
            events,
        }
    }

    pub async fn step(&self, cursor: &mut BatchCursor) -> Result<StepOutcome, StepError> {
        let Some(index) = cursor.current_row() else {
            return Ok(StepOutcome::Exhausted);
        };

        let row = match self.input.read_row(index).await {
            Ok(row) if !row.is_empty() => row,
            Ok(_) => {
                warn!(batch_id = %cursor.batch_id, row = index, "Input row is empty");
                let result =
                    RowResult::failed(RowId::Position(index), index, None, FailureReason::NotFound, 0);
                return self.record(cursor, result, true).await;
            }
            Err(err) if err.is_not_found() => {
                warn!(batch_id = %cursor.batch_id, row = index, "Input row does not exist");
                let result =
                    RowResult::failed(RowId::Position(index), index, None, FailureReason::NotFound, 0);
                return self.record(cursor, result, true).await;
            }
            Err(source) => {
                return Err(StepError::Read {
                    sheet: self.input.sheet().to_string(),
                    row: index,
                    source,
                });
            }
        };

        let row_id = self.resolve_row_id(&row);

        // The ledger is authoritative: a row already done is skipped without
        // spending an enrichment call, and without a new ledger entry. An
        // entry recorded for a different input row means the identifier is
        // not unique; that row is failed under its position so the first
        // row's record stays intact.
        if let Some(entry) = self
            .ledger
            .latest(&row_id)
            .await
            .map_err(|source| StepError::Ledger { row: index, source })?
        {
            if entry.result.row_index != index {
                warn!(
                    batch_id = %cursor.batch_id,
                    row = index,
                    %row_id,
                    first_row = entry.result.row_index,
                    "Identifier already used by another input row"
                );
                let reason = FailureReason::DuplicateIdentifier {
                    identifier: row_id.to_string(),
                    first_row: entry.result.row_index,
                };
                let result = RowResult::failed(RowId::Position(index), index, None, reason, 0);
                return self.record(cursor, result, true).await;
            }
            if entry.result.status.is_done() {
                debug!(batch_id = %cursor.batch_id, row = index, %row_id, "Already done, skipping");
                let result = RowResult::skipped(row_id, index, entry.result.output_index);
                return self.record(cursor, result, false).await;
            }
        }

        let Some(output_index) = self.locate_output(&row, &row_id).await? else {
            let result = RowResult::failed(row_id, index, None, FailureReason::NotFound, 0);
            return self.record(cursor, result, true).await;
        };

        if self.config.skip_when_output_present && self.output_present(index, output_index).await? {
            debug!(row = index, output_row = output_index, "Output already filled, skipping");
            let result = RowResult::skipped(row_id, index, Some(output_index));
            return self.record(cursor, result, true).await;
        }

        let request = EnrichRequest {
            row_id: row_id.clone(),
            payload: row.to_payload(),
            cache_key: self.enricher.cache_key(),
        };

        let metrics = self.metrics.clone();
        let attempt = self
            .config
            .retry
            .run(
                || self.enricher.enrich(request.clone()),
                classify_enrich_error,
                |err, attempt, delay| {
                    warn!(
                        row = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Enrichment failed, retrying"
                    );
                    metrics.increment_retries(1);
                },
            )
            .await;

        let (response, attempts) = match attempt {
            Ok((response, attempts)) => {
                self.metrics.increment_enrich_calls(attempts as u64);
                (response, attempts)
            }
            Err(err) => {
                let attempts = err.attempts();
                self.metrics.increment_enrich_calls(attempts as u64);
                let exhausted = matches!(err, RetryError::AttemptsExceeded { .. });

                let reason = match err.into_error() {
                    EnrichError::RateLimited { retry_after } => {
                        self.metrics.increment_backoffs();
                        warn!(
                            batch_id = %cursor.batch_id,
                            row = index,
                            retry_after_secs = retry_after.map(|d| d.as_secs()),
                            "Rate limited, backing off without advancing"
                        );
                        return Ok(StepOutcome::Backoff {
                            row_index: index,
                            retry_after,
                        });
                    }
                    EnrichError::Rejected { status, message } => {
                        return Err(StepError::EnrichmentRejected {
                            row: index,
                            status,
                            message,
                        });
                    }
                    EnrichError::Malformed(msg) => FailureReason::Malformed(msg),
                    EnrichError::Transient(msg) => {
                        if exhausted {
                            warn!(row = index, attempts, "Transient failures exhausted retries");
                        }
                        FailureReason::Transient(msg)
                    }
                };
                let result = RowResult::failed(row_id, index, Some(output_index), reason, attempts);
                return self.record(cursor, result, true).await;
            }
        };

        if response.cache_hit {
            self.metrics.increment_cache_hits();
        }

        let fields = match validate_response(&self.schema, &response.fields) {
            Ok(fields) => fields,
            Err(err) => {
                warn!(row = index, error = %err, "Enrichment response failed validation");
                let result = RowResult::failed(
                    row_id,
                    index,
                    Some(output_index),
                    FailureReason::Malformed(err.to_string()),
                    attempts,
                );
                return self.record(cursor, result, true).await;
            }
        };

        let columns = to_columns(&self.schema, &fields);
        self.output
            .write_row(output_index, &columns)
            .await
            .map_err(|source| StepError::StorageWriteFailed {
                row: index,
                output_row: output_index,
                source,
            })?;

        let result = RowResult::success(row_id, index, output_index, fields, attempts);
        self.record(cursor, result, true).await
    }

    /// Identifier column first, then the secondary key, then the position.
    fn resolve_row_id(&self, row: &RowData) -> RowId {
        if let Some(id) = row.get_text(&self.config.identifier_column) {
            return RowId::Primary(id);
        }
        if let Some(alt) = self
            .config
            .fallback_column
            .as_deref()
            .and_then(|c| row.get_text(c))
        {
            return RowId::Secondary(alt);
        }
        RowId::Position(row.index)
    }

    async fn locate_output(&self, row: &RowData, row_id: &RowId) -> Result<Option<usize>, StepError> {
        if self.config.placement == Placement::SameIndex {
            return Ok(Some(row.index));
        }

        if let Some(id) = row.get_text(&self.config.identifier_column) {
            match self
                .output
                .find_row_by_identifier(&self.config.identifier_column, &id)
                .await
                .map_err(|source| StepError::Locate {
                    row: row.index,
                    source,
                })? {
                Lookup::Found(i) => return Ok(Some(i)),
                Lookup::Ambiguous(rows) => {
                    warn!(row = row.index, %row_id, ?rows, "Identifier matches several output rows");
                }
                Lookup::Missing => {
                    debug!(row = row.index, %row_id, "Identifier not found in output sheet");
                }
            }
        }

        let Some(fallback) = self.config.fallback_column.as_deref() else {
            return Ok(None);
        };
        let Some(alt) = row.get_text(fallback) else {
            return Ok(None);
        };

        match self
            .output
            .find_row_by_identifier(fallback, &alt)
            .await
            .map_err(|source| StepError::Locate {
                row: row.index,
                source,
            })? {
            Lookup::Found(i) => {
                info!(row = row.index, output_row = i, "Located output row by secondary key");
                Ok(Some(i))
            }
            Lookup::Ambiguous(rows) => {
                warn!(row = row.index, ?rows, "Secondary key matches several output rows");
                Ok(None)
            }
            Lookup::Missing => Ok(None),
        }
    }

    /// Every schema column of the output row already has content.
    async fn output_present(&self, row: usize, output_index: usize) -> Result<bool, StepError> {
        match self.output.read_row(output_index).await {
            Ok(existing) => Ok(self
                .schema
                .columns()
                .all(|column| existing.get_text(column).is_some())),
            Err(err) if err.is_not_found() => Ok(false),
            Err(source) => Err(StepError::Read {
                sheet: self.output.sheet().to_string(),
                row,
                source,
            }),
        }
    }

    async fn record(
        &self,
        cursor: &mut BatchCursor,
        result: RowResult,
        append: bool,
    ) -> Result<StepOutcome, StepError> {
        let index = result.row_index;

        if append {
            self.ledger
                .append(&LedgerEntry {
                    batch_id: cursor.batch_id.clone(),
                    result: result.clone(),
                })
                .await
                .map_err(|source| StepError::Ledger { row: index, source })?;
        }

        cursor.advance();
        cursor.consecutive_backoffs = 0;
        self.cursors
            .save(cursor)
            .await
            .map_err(|source| StepError::Cursor { row: index, source })?;

        match &result.status {
            RowStatus::Success => self.metrics.record_success(),
            RowStatus::SkippedAlreadyDone => self.metrics.record_skip(),
            RowStatus::Failed(_) => self.metrics.record_failure(),
        }

        info!(
            batch_id = %cursor.batch_id,
            row = index,
            row_id = %result.row_id,
            status = %result.status,
            remaining = cursor.remaining(),
            "Row processed"
        );

        self.events
            .publish(BatchEvent::RowCompleted {
                batch_id: cursor.batch_id.clone(),
                row_index: index,
                row_id: result.row_id.clone(),
                status: result.status.clone(),
                remaining: cursor.remaining(),
                timestamp: Utc::now(),
            })
            .await;

        Ok(StepOutcome::Processed(result))
    }
}
