use crate::{
    batch::state::BatchState,
    core::identifiers::{BatchId, RowId},
    records::result::RowStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A trait for events that can be published on the EventBus.
pub trait Event: Send + Sync + Debug + 'static {
    /// Returns a unique identifier for this event type.
    fn event_type(&self) -> &'static str;
}

/// Lifecycle events of a batch, for operator-facing hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        batch_id: BatchId,
        input_sheet: String,
        output_sheet: String,
        total_target: usize,
        timestamp: DateTime<Utc>,
    },

    RowCompleted {
        batch_id: BatchId,
        row_index: usize,
        row_id: RowId,
        status: RowStatus,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },

    Paused {
        batch_id: BatchId,
        state: BatchState,
        processed: usize,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },

    Resumed {
        batch_id: BatchId,
        timestamp: DateTime<Utc>,
    },

    BackoffScheduled {
        batch_id: BatchId,
        row_index: usize,
        until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    Completed {
        batch_id: BatchId,
        processed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    Cancelled {
        batch_id: BatchId,
        processed: usize,
        timestamp: DateTime<Utc>,
    },

    /// An abandoned invocation lock was cleared before starting.
    LockReclaimed {
        holder: String,
        acquired_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::Started { .. } => "batch.started",
            BatchEvent::RowCompleted { .. } => "batch.row_completed",
            BatchEvent::Paused { .. } => "batch.paused",
            BatchEvent::Resumed { .. } => "batch.resumed",
            BatchEvent::BackoffScheduled { .. } => "batch.backoff_scheduled",
            BatchEvent::Completed { .. } => "batch.completed",
            BatchEvent::Cancelled { .. } => "batch.cancelled",
            BatchEvent::LockReclaimed { .. } => "lock.reclaimed",
        }
    }
}
