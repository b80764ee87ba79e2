use crate::{
    batch::{mode::BatchMode, range::RowRange, state::BatchState},
    core::identifiers::BatchId,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Persisted pointer to the next unit of work in a batch.
///
/// `next_index` always names the next row to process. Only the step engine
/// moves it, and only after the row's outcome has been written and recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BatchCursor {
    pub batch_id: BatchId,
    pub mode: BatchMode,
    pub input_sheet: String,
    pub output_sheet: String,
    pub range: RowRange,
    pub next_index: usize,
    pub total_target: usize,
    pub state: BatchState,
    pub invocations: u32,
    pub consecutive_backoffs: u32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchCursor {
    pub fn new(mode: BatchMode, input_sheet: &str, output_sheet: &str, range: RowRange) -> Self {
        let now = Utc::now();
        BatchCursor {
            batch_id: BatchId::generate(),
            mode,
            input_sheet: input_sheet.to_string(),
            output_sheet: output_sheet.to_string(),
            next_index: range.first().unwrap_or(0),
            total_target: range.len(),
            range,
            state: BatchState::Idle,
            invocations: 0,
            consecutive_backoffs: 0,
            backoff_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The row the next step will process, if any remain.
    pub fn current_row(&self) -> Option<usize> {
        self.range.first_at_or_after(self.next_index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_row().is_none()
    }

    pub fn remaining(&self) -> usize {
        self.range.remaining_from(self.next_index)
    }

    pub fn completed(&self) -> usize {
        self.total_target - self.remaining()
    }

    /// Moves past the current row. Called by the step engine only.
    pub fn advance(&mut self) {
        let current = self.current_row();
        self.next_index = current
            .and_then(|row| self.range.next_after(row))
            .unwrap_or_else(|| self.range.end_marker());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// A cursor nobody has updated for `max_age` is considered abandoned.
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.updated_at) > max_age
    }

    pub fn backoff_active(&self, now: DateTime<Utc>) -> bool {
        self.backoff_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_through_span() {
        let mut c = BatchCursor::new(BatchMode::FirstN(3), "In", "Out", RowRange::span(3, 5));
        assert_eq!(c.current_row(), Some(3));
        assert_eq!(c.total_target, 3);

        c.advance();
        c.advance();
        assert_eq!(c.current_row(), Some(5));
        assert_eq!(c.remaining(), 1);

        c.advance();
        assert!(c.is_exhausted());
        assert_eq!(c.next_index, 6);
        assert_eq!(c.completed(), 3);
    }

    #[test]
    fn advances_through_list_gaps() {
        let mut c = BatchCursor::new(
            BatchMode::ExplicitList(vec![4, 10]),
            "In",
            "Out",
            RowRange::list(vec![4, 10]),
        );
        c.advance();
        assert_eq!(c.next_index, 10);
        c.advance();
        assert!(c.is_exhausted());
        assert_eq!(c.next_index, 11);
    }

    #[test]
    fn staleness() {
        let c = BatchCursor::new(BatchMode::AllRows, "In", "Out", RowRange::span(3, 9));
        let later = c.updated_at + Duration::hours(2);
        assert!(c.is_stale(Duration::hours(1), later));
        assert!(!c.is_stale(Duration::hours(3), later));
    }
}
