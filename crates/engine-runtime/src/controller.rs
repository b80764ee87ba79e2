use crate::{budget::InvocationBudget, context::EngineContext, error::EngineError, range};
use chrono::{DateTime, Utc};
use connectors::{
    enrich::EnrichmentClient,
    table::{RowStore, SheetLayout, adapter::SheetAdapter},
};
use engine_config::settings::validated::ValidatedSettings;
use engine_core::{
    error::StateStoreError,
    event_bus::bus::EventBus,
    metrics::{Metrics, MetricsSnapshot},
    progress::ProgressService,
    state::{
        control::ControlStore,
        cursor::CursorStore,
        keys::StateKeys,
        lock::{Acquired, InvocationLock},
        summary::SummaryStore,
    },
};
use engine_processing::{
    backoff::BackoffSchedule,
    step::{StepConfig, StepEngine, StepOutcome},
};
use model::{
    batch::{
        cursor::BatchCursor,
        mode::BatchMode,
        range::RowRange,
        state::BatchState,
        summary::{BatchStatus, BatchSummary, FailedRowRef},
    },
    core::identifiers::BatchId,
    events::BatchEvent,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of one time-boxed invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationReport {
    pub batch_id: BatchId,
    pub state: BatchState,
    /// Rows that reached an outcome during this invocation.
    pub processed: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Rows of the batch still to do.
    pub remaining: usize,
    pub last_error: Option<String>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub metrics: MetricsSnapshot,
}

/// How an operator request was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// No invocation was running; the batch state changed right away.
    Applied,
    /// An invocation is running and will act on the request between rows.
    Requested,
}

/// Owns the lifecycle of a batch: seeding the cursor, running invocations
/// and reacting to operator requests.
pub struct BatchController {
    settings: ValidatedSettings,
    rows: Arc<dyn RowStore>,
    layout: SheetLayout,
    input: Arc<SheetAdapter>,
    output: Arc<SheetAdapter>,
    enricher: Option<Arc<dyn EnrichmentClient>>,
    keys: StateKeys,
    cursors: CursorStore,
    control: ControlStore,
    summaries: SummaryStore,
    lock: InvocationLock,
    progress: ProgressService,
    backoff: BackoffSchedule,
    metrics: Metrics,
    events: EventBus,
    holder: String,
}

impl BatchController {
    pub fn new(ctx: EngineContext) -> Self {
        let EngineContext {
            settings,
            rows,
            state,
            enricher,
            metrics,
            events,
        } = ctx;

        let layout = SheetLayout::new(settings.table.header_rows);
        let keys = StateKeys::new(settings.job());
        let stale_after = chrono::Duration::from_std(settings.invocation.lock_stale_after)
            .unwrap_or(chrono::Duration::MAX);

        BatchController {
            input: Arc::new(SheetAdapter::new(rows.clone(), settings.input_sheet(), layout)),
            output: Arc::new(SheetAdapter::new(rows.clone(), settings.output_sheet(), layout)),
            rows,
            layout,
            enricher,
            cursors: CursorStore::new(state.clone(), &keys),
            control: ControlStore::new(state.clone(), &keys),
            summaries: SummaryStore::new(state.clone(), &keys),
            lock: InvocationLock::new(state.clone(), &keys, stale_after),
            progress: ProgressService::new(state.clone(), keys.clone()),
            backoff: BackoffSchedule::new(
                settings.invocation.backoff_base,
                settings.invocation.backoff_max,
            ),
            holder: format!("pid-{}-{}", std::process::id(), uuid::Uuid::new_v4()),
            keys,
            settings,
            metrics,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Seeds a new batch over the rows selected by `mode`.
    pub async fn start(&self, mode: BatchMode) -> Result<BatchCursor, EngineError> {
        self.ensure_no_active_batch().await?;

        self.input.refresh_headers().await?;
        self.output.refresh_headers().await?;

        let row_count = self.input.row_count().await?;
        let range = range::compute_range(&mode, self.settings.first_data_row(), row_count)?;
        self.seed(mode, range).await
    }

    /// Starts a new batch over exactly the rows whose latest outcome is a
    /// failure.
    pub async fn retry_failed(&self) -> Result<BatchCursor, EngineError> {
        self.ensure_no_active_batch().await?;

        let failed = self.failures().await?;
        let first_data_row = self.settings.first_data_row();
        let rows: Vec<usize> = failed
            .iter()
            .map(|f| f.row_index)
            .filter(|&row| row >= first_data_row)
            .collect();
        if rows.is_empty() {
            return Err(EngineError::NothingToProcess(
                "no failed rows to retry".to_string(),
            ));
        }

        self.input.refresh_headers().await?;
        self.output.refresh_headers().await?;

        info!(rows = rows.len(), "Retrying failed rows");
        let range = RowRange::list(rows.clone());
        self.seed(BatchMode::ExplicitList(rows), range).await
    }

    async fn ensure_no_active_batch(&self) -> Result<(), EngineError> {
        match self.cursors.load().await {
            Ok(Some(cursor)) => {
                let max_age = chrono::Duration::from_std(self.settings.invocation.cursor_stale_after)
                    .unwrap_or(chrono::Duration::MAX);
                if cursor.state.is_terminal() || cursor.is_stale(max_age, Utc::now()) {
                    warn!(
                        batch_id = %cursor.batch_id,
                        state = %cursor.state,
                        updated_at = %cursor.updated_at,
                        "Discarding stale cursor"
                    );
                    self.cursors.delete().await?;
                    return Ok(());
                }
                Err(EngineError::BatchAlreadyActive {
                    batch_id: cursor.batch_id,
                    state: cursor.state,
                })
            }
            Ok(None) => Ok(()),
            Err(StateStoreError::Corrupt { key, reason }) => {
                warn!(%key, %reason, "Discarding corrupt cursor");
                self.cursors.delete().await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn seed(&self, mode: BatchMode, range: RowRange) -> Result<BatchCursor, EngineError> {
        let cursor = BatchCursor::new(
            mode,
            self.settings.input_sheet(),
            self.settings.output_sheet(),
            range,
        );
        self.cursors.save(&cursor).await?;
        self.control.clear().await?;

        info!(
            batch_id = %cursor.batch_id,
            mode = %cursor.mode,
            rows = cursor.total_target,
            input = %cursor.input_sheet,
            output = %cursor.output_sheet,
            "Batch started"
        );
        self.events
            .publish(BatchEvent::Started {
                batch_id: cursor.batch_id.clone(),
                input_sheet: cursor.input_sheet.clone(),
                output_sheet: cursor.output_sheet.clone(),
                total_target: cursor.total_target,
                timestamp: Utc::now(),
            })
            .await;
        Ok(cursor)
    }

    /// Runs one invocation under the invocation lock.
    pub async fn run_invocation(
        &self,
        budget: InvocationBudget,
        shutdown: &CancellationToken,
    ) -> Result<InvocationReport, EngineError> {
        let Some(enricher) = self.enricher.clone() else {
            return Err(EngineError::MissingApiKey(
                self.settings.enrichment.api_key_env.clone(),
            ));
        };

        if let Acquired::Reclaimed(previous) = self.lock.acquire(&self.holder).await? {
            self.events
                .publish(BatchEvent::LockReclaimed {
                    holder: previous.holder,
                    acquired_at: previous.acquired_at,
                    timestamp: Utc::now(),
                })
                .await;
        }

        let result = self.invoke(enricher, budget, shutdown).await;

        match self.lock.release(&self.holder).await {
            Ok(true) => {}
            Ok(false) => warn!(holder = %self.holder, "Invocation lock was taken over while running"),
            Err(err) => error!(error = %err, "Failed to release invocation lock"),
        }
        result
    }

    async fn invoke(
        &self,
        enricher: Arc<dyn EnrichmentClient>,
        budget: InvocationBudget,
        shutdown: &CancellationToken,
    ) -> Result<InvocationReport, EngineError> {
        let baseline = self.metrics.snapshot();
        let mut cursor = self.load_cursor().await?;

        if cursor.state.is_terminal() {
            // A previous invocation stopped between marking the batch final
            // and deleting the cursor.
            let state = cursor.state;
            return self.finalize(cursor, state, &baseline).await;
        }

        cursor.invocations += 1;
        let flags = self.control.load().await?;
        if flags.cancel_requested {
            return self.finalize(cursor, BatchState::Cancelled, &baseline).await;
        }
        if flags.pause_requested {
            return self.pause_here(cursor, BatchState::PausedByUser, &baseline).await;
        }

        let now = Utc::now();
        if cursor.backoff_active(now) {
            info!(
                batch_id = %cursor.batch_id,
                until = ?cursor.backoff_until,
                "Backoff still active, not processing"
            );
            return Ok(self.report(&cursor, &baseline));
        }
        cursor.backoff_until = None;

        let resuming = cursor.state.is_paused();
        cursor.state = cursor.state.transition(BatchState::Running)?;
        cursor.touch();
        self.cursors.save(&cursor).await?;
        if resuming {
            self.events
                .publish(BatchEvent::Resumed {
                    batch_id: cursor.batch_id.clone(),
                    timestamp: Utc::now(),
                })
                .await;
        }
        info!(
            batch_id = %cursor.batch_id,
            invocation = cursor.invocations,
            next_row = cursor.next_index,
            remaining = cursor.remaining(),
            "Invocation started"
        );

        let step = self.step_engine(&cursor, enricher);
        let mut rows_done = 0usize;

        let next_state = loop {
            if cursor.is_exhausted() {
                break BatchState::Completed;
            }
            if shutdown.is_cancelled() {
                info!(batch_id = %cursor.batch_id, "Shutdown requested, stopping between rows");
                break BatchState::PausedForContinuation;
            }
            let flags = self.control.load().await?;
            if flags.cancel_requested {
                return self.finalize(cursor, BatchState::Cancelled, &baseline).await;
            }
            if flags.pause_requested {
                break BatchState::PausedByUser;
            }
            if !budget.allows_another(rows_done) {
                break BatchState::PausedForContinuation;
            }

            match step.step(&mut cursor).await {
                Ok(StepOutcome::Processed(_)) => rows_done += 1,
                Ok(StepOutcome::Exhausted) => break BatchState::Completed,
                Ok(StepOutcome::Backoff {
                    row_index,
                    retry_after,
                }) => {
                    cursor.consecutive_backoffs += 1;
                    let delay = self
                        .backoff
                        .delay_for(cursor.consecutive_backoffs, retry_after);
                    let until = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::hours(1));
                    cursor.backoff_until = Some(until);
                    cursor.last_error = Some(format!("RateLimited at row {row_index}"));

                    warn!(
                        batch_id = %cursor.batch_id,
                        row = row_index,
                        consecutive = cursor.consecutive_backoffs,
                        delay_secs = delay.as_secs(),
                        "Backing off"
                    );
                    self.events
                        .publish(BatchEvent::BackoffScheduled {
                            batch_id: cursor.batch_id.clone(),
                            row_index,
                            until,
                            timestamp: Utc::now(),
                        })
                        .await;
                    break BatchState::PausedForBackoff;
                }
                Err(err) => {
                    error!(
                        batch_id = %cursor.batch_id,
                        row = err.row(),
                        error = %err,
                        "Invocation aborted"
                    );
                    cursor.last_error = Some(err.to_string());
                    cursor.state = cursor.state.transition(BatchState::PausedForContinuation)?;
                    cursor.touch();
                    if let Err(save_err) = self.cursors.save(&cursor).await {
                        error!(error = %save_err, "Failed to persist cursor after abort");
                    }
                    return Err(err.into());
                }
            }
        };

        if next_state == BatchState::Completed {
            return self.finalize(cursor, BatchState::Completed, &baseline).await;
        }
        self.pause_here(cursor, next_state, &baseline).await
    }

    /// The step engine reads and writes the sheets the batch was started
    /// on, which are the sheets its ledger is scoped to.
    fn step_engine(&self, cursor: &BatchCursor, enricher: Arc<dyn EnrichmentClient>) -> StepEngine {
        StepEngine::new(
            self.adapter_for(&self.input, &cursor.input_sheet),
            self.adapter_for(&self.output, &cursor.output_sheet),
            enricher,
            self.progress.ledger(&cursor.input_sheet, &cursor.output_sheet),
            self.cursors.clone(),
            self.settings.schema.clone(),
            StepConfig::from_settings(&self.settings),
            self.metrics.clone(),
            self.events.clone(),
        )
    }

    fn adapter_for(&self, configured: &Arc<SheetAdapter>, sheet: &str) -> Arc<SheetAdapter> {
        if configured.sheet() == sheet {
            return configured.clone();
        }
        warn!(
            configured = %configured.sheet(),
            batch_sheet = %sheet,
            "Settings name a different sheet than the active batch, using the batch's sheet"
        );
        Arc::new(SheetAdapter::new(self.rows.clone(), sheet, self.layout))
    }

    async fn load_cursor(&self) -> Result<BatchCursor, EngineError> {
        match self.cursors.load().await? {
            Some(cursor) => Ok(cursor),
            None => Err(EngineError::NoActiveBatch),
        }
    }

    async fn pause_here(
        &self,
        mut cursor: BatchCursor,
        state: BatchState,
        baseline: &MetricsSnapshot,
    ) -> Result<InvocationReport, EngineError> {
        cursor.state = cursor.state.transition(state)?;
        cursor.touch();
        self.cursors.save(&cursor).await?;

        info!(
            batch_id = %cursor.batch_id,
            state = %cursor.state,
            processed = cursor.completed(),
            remaining = cursor.remaining(),
            "Invocation paused"
        );
        self.events
            .publish(BatchEvent::Paused {
                batch_id: cursor.batch_id.clone(),
                state: cursor.state,
                processed: cursor.completed(),
                remaining: cursor.remaining(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(self.report(&cursor, baseline))
    }

    /// Moves the batch to a terminal state, keeps a summary and deletes the
    /// cursor. The cursor is saved in its final state first so a crash in
    /// between is finished by the next invocation.
    async fn finalize(
        &self,
        mut cursor: BatchCursor,
        state: BatchState,
        baseline: &MetricsSnapshot,
    ) -> Result<InvocationReport, EngineError> {
        if cursor.state != state {
            cursor.state = cursor.state.transition(state)?;
        }
        cursor.backoff_until = None;
        cursor.touch();
        self.cursors.save(&cursor).await?;

        let status = self.progress.status().await?;
        let summary = BatchSummary {
            batch_id: cursor.batch_id.clone(),
            state: cursor.state,
            input_sheet: cursor.input_sheet.clone(),
            output_sheet: cursor.output_sheet.clone(),
            total_target: cursor.total_target,
            processed: cursor.completed(),
            last_error: cursor.last_error.clone(),
            finished_at: Utc::now(),
        };
        self.summaries.save(&summary).await?;
        self.cursors.delete().await?;
        self.control.clear().await?;

        let event = match cursor.state {
            BatchState::Cancelled => {
                warn!(
                    batch_id = %cursor.batch_id,
                    processed = summary.processed,
                    "Batch cancelled"
                );
                BatchEvent::Cancelled {
                    batch_id: cursor.batch_id.clone(),
                    processed: summary.processed,
                    timestamp: Utc::now(),
                }
            }
            _ => {
                info!(
                    batch_id = %cursor.batch_id,
                    processed = summary.processed,
                    succeeded = status.succeeded,
                    skipped = status.skipped,
                    failed = status.failed,
                    "Batch completed"
                );
                if status.failed > 0 {
                    let rows: Vec<usize> = status.failed_rows.iter().map(|f| f.row_index).collect();
                    warn!(batch_id = %cursor.batch_id, failed = status.failed, ?rows, "Batch completed with failures");
                }
                BatchEvent::Completed {
                    batch_id: cursor.batch_id.clone(),
                    processed: summary.processed,
                    failed: status.failed,
                    timestamp: Utc::now(),
                }
            }
        };
        self.events.publish(event).await;
        Ok(self.report(&cursor, baseline))
    }

    fn report(&self, cursor: &BatchCursor, baseline: &MetricsSnapshot) -> InvocationReport {
        let delta = self.metrics.snapshot().since(baseline);
        InvocationReport {
            batch_id: cursor.batch_id.clone(),
            state: cursor.state,
            processed: delta.rows_processed,
            succeeded: delta.rows_succeeded,
            skipped: delta.rows_skipped,
            failed: delta.rows_failed,
            remaining: cursor.remaining(),
            last_error: cursor.last_error.clone(),
            backoff_until: cursor.backoff_until,
            metrics: delta,
        }
    }

    /// Asks the batch to pause. Applied at once when no invocation runs.
    pub async fn pause(&self) -> Result<ControlOutcome, EngineError> {
        let mut cursor = self.load_cursor().await?;
        self.control.request_pause().await?;

        if self.lock.live().await?.is_some() {
            info!(batch_id = %cursor.batch_id, "Pause requested");
            return Ok(ControlOutcome::Requested);
        }
        if cursor.state != BatchState::PausedByUser {
            cursor.state = cursor.state.transition(BatchState::PausedByUser)?;
            cursor.touch();
            self.cursors.save(&cursor).await?;
            self.events
                .publish(BatchEvent::Paused {
                    batch_id: cursor.batch_id.clone(),
                    state: cursor.state,
                    processed: cursor.completed(),
                    remaining: cursor.remaining(),
                    timestamp: Utc::now(),
                })
                .await;
        }
        info!(batch_id = %cursor.batch_id, "Batch paused");
        Ok(ControlOutcome::Applied)
    }

    /// Clears a pause request. The next invocation moves the batch back to
    /// `Running`.
    pub async fn resume(&self) -> Result<BatchCursor, EngineError> {
        let cursor = self.load_cursor().await?;
        self.control.clear_pause().await?;
        info!(batch_id = %cursor.batch_id, state = %cursor.state, "Batch resumed");
        self.events
            .publish(BatchEvent::Resumed {
                batch_id: cursor.batch_id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(cursor)
    }

    /// Cancels the batch. Applied at once when no invocation runs.
    pub async fn cancel(&self) -> Result<ControlOutcome, EngineError> {
        let cursor = self.load_cursor().await?;
        self.control.request_cancel().await?;

        if self.lock.live().await?.is_some() {
            info!(batch_id = %cursor.batch_id, "Cancel requested");
            return Ok(ControlOutcome::Requested);
        }
        let baseline = self.metrics.snapshot();
        self.finalize(cursor, BatchState::Cancelled, &baseline).await?;
        Ok(ControlOutcome::Applied)
    }

    pub async fn status(&self) -> Result<BatchStatus, EngineError> {
        Ok(self.progress.status().await?)
    }

    /// Rows of the configured sheet pair whose latest outcome is a failure.
    pub async fn failures(&self) -> Result<Vec<FailedRowRef>, EngineError> {
        Ok(self
            .progress
            .failures(self.settings.input_sheet(), self.settings.output_sheet())
            .await?)
    }

    /// Drops the invocation lock regardless of its holder.
    pub async fn force_unlock(&self) -> Result<(), EngineError> {
        warn!(key = %self.keys.lock(), "Force-releasing invocation lock");
        self.lock.force_release().await?;
        Ok(())
    }
}
