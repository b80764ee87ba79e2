use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// Which rows a batch targets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum BatchMode {
    /// Every data row in the input sheet.
    AllRows,

    /// The first `n` data rows.
    FirstN(usize),

    /// Exactly these 1-based row indices.
    ExplicitList(Vec<usize>),
}

impl BatchMode {
    /// Builds an explicit-list mode from a textual row spec such as
    /// `"5-10,15,20-25"`.
    pub fn from_row_spec(spec: &str) -> Result<Self, ModelError> {
        parse_row_spec(spec).map(BatchMode::ExplicitList)
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::AllRows => f.write_str("all rows"),
            BatchMode::FirstN(n) => write!(f, "first {n} rows"),
            BatchMode::ExplicitList(rows) => write!(f, "{} explicit rows", rows.len()),
        }
    }
}

/// Parses `"5,10,15"`, `"5-10"` or mixed `"5-10,15,20-25"` into a sorted,
/// de-duplicated list of row indices. Any malformed part rejects the whole row spec.
pub fn parse_row_spec(spec: &str) -> Result<Vec<usize>, ModelError> {
    let invalid = |reason: String| ModelError::InvalidRowSpec {
        spec: spec.to_string(),
        reason,
    };

    let mut rows = BTreeSet::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_index(start).map_err(&invalid)?;
                let end = parse_index(end).map_err(&invalid)?;
                if start > end {
                    return Err(invalid(format!("range {start}-{end} is descending")));
                }
                rows.extend(start..=end);
            }
            None => {
                rows.insert(parse_index(part).map_err(&invalid)?);
            }
        }
    }

    if rows.is_empty() {
        return Err(invalid("no rows given".to_string()));
    }

    Ok(rows.into_iter().collect())
}

fn parse_index(raw: &str) -> Result<usize, String> {
    let raw = raw.trim();
    match raw.parse::<usize>() {
        Ok(0) => Err("row indices are 1-based".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("'{raw}' is not a row number")),
    }
}
