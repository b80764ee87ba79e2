use crate::error::EngineError;
use model::batch::{mode::BatchMode, range::RowRange};
use tracing::warn;

/// Row range of a new batch.
///
/// `row_count` is the last non-empty row of the input sheet and
/// `first_data_row` the first row below the header. Explicit lists bypass
/// the detected bounds but never include header rows.
pub fn compute_range(
    mode: &BatchMode,
    first_data_row: usize,
    row_count: usize,
) -> Result<RowRange, EngineError> {
    let range = match mode {
        BatchMode::AllRows => RowRange::span(first_data_row, row_count),
        BatchMode::FirstN(0) => {
            return Err(EngineError::NothingToProcess(
                "first 0 rows requested".to_string(),
            ));
        }
        BatchMode::FirstN(n) => {
            let end = first_data_row.saturating_add(n - 1).min(row_count);
            RowRange::span(first_data_row, end)
        }
        BatchMode::ExplicitList(rows) => {
            let (headers, data): (Vec<usize>, Vec<usize>) =
                rows.iter().copied().partition(|&row| row < first_data_row);
            if !headers.is_empty() {
                warn!(
                    ?headers,
                    first_data_row, "Dropping header rows from explicit row list"
                );
            }
            RowRange::list(data)
        }
    };

    if range.is_empty() {
        return Err(EngineError::NothingToProcess(format!(
            "{mode} selects no data rows (first data row {first_data_row}, last row {row_count})"
        )));
    }
    Ok(range)
}
