use crate::core::{identifiers::RowId, value::Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

pub type EnrichedFields = BTreeMap<String, Value>;

/// Why a row ended up `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureReason {
    /// The row, or its output row, could not be located even via the
    /// secondary key.
    NotFound,

    /// The enrichment response could not be used.
    Malformed(String),

    /// Transient enrichment errors outlasted the retry budget.
    Transient(String),

    /// Another input row already carries this identifier. The row is left
    /// untouched until the sheet is fixed.
    DuplicateIdentifier { identifier: String, first_row: usize },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => f.write_str("NotFound"),
            FailureReason::Malformed(msg) => write!(f, "Malformed({msg})"),
            FailureReason::Transient(msg) => write!(f, "Transient({msg})"),
            FailureReason::DuplicateIdentifier {
                identifier,
                first_row,
            } => write!(f, "DuplicateIdentifier({identifier}, first seen at row {first_row})"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RowStatus {
    Success,
    SkippedAlreadyDone,
    Failed(FailureReason),
}

impl RowStatus {
    /// Whether a row with this status needs no further work.
    pub fn is_done(&self) -> bool {
        matches!(self, RowStatus::Success | RowStatus::SkippedAlreadyDone)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RowStatus::Failed(_))
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Success => f.write_str("Success"),
            RowStatus::SkippedAlreadyDone => f.write_str("SkippedAlreadyDone"),
            RowStatus::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Outcome of processing one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowResult {
    pub row_id: RowId,
    /// Input row index.
    pub row_index: usize,
    /// Output row the fields were written to, when one was located.
    pub output_index: Option<usize>,
    pub status: RowStatus,
    pub enriched_fields: EnrichedFields,
    /// Enrichment attempts spent on this row.
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl RowResult {
    pub fn success(
        row_id: RowId,
        row_index: usize,
        output_index: usize,
        enriched_fields: EnrichedFields,
        attempts: u32,
    ) -> Self {
        RowResult {
            row_id,
            row_index,
            output_index: Some(output_index),
            status: RowStatus::Success,
            enriched_fields,
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn skipped(row_id: RowId, row_index: usize, output_index: Option<usize>) -> Self {
        RowResult {
            row_id,
            row_index,
            output_index,
            status: RowStatus::SkippedAlreadyDone,
            enriched_fields: EnrichedFields::new(),
            attempts: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        row_id: RowId,
        row_index: usize,
        output_index: Option<usize>,
        reason: FailureReason,
        attempts: u32,
    ) -> Self {
        RowResult {
            row_id,
            row_index,
            output_index,
            status: RowStatus::Failed(reason),
            enriched_fields: EnrichedFields::new(),
            attempts,
            recorded_at: Utc::now(),
        }
    }
}
