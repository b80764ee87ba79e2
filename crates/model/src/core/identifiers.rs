use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a data row.
///
/// Rows are identified by the configured identifier column. Rows whose
/// identifier cell is empty fall back to the secondary key column, and rows
/// lacking both are keyed by their position so that failures can still be
/// recorded against them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowId {
    Primary(String),
    Secondary(String),
    Position(usize),
}

impl RowId {
    /// Canonical text form, used as the ledger key.
    pub fn key(&self) -> String {
        match self {
            RowId::Primary(v) => format!("id:{v}"),
            RowId::Secondary(v) => format!("alt:{v}"),
            RowId::Position(i) => format!("row:{i}"),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Identifier of one batch run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_per_kind() {
        assert_eq!(RowId::Primary("7".into()).key(), "id:7");
        assert_eq!(RowId::Secondary("7".into()).key(), "alt:7");
        assert_eq!(RowId::Position(7).key(), "row:7");
    }
}
