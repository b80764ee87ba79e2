use serde::{Deserialize, Serialize};

/// The concrete, gap-free set of row indices a batch walks through.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum RowRange {
    /// Contiguous, inclusive on both ends.
    Span { start: usize, end: usize },

    /// Sorted, de-duplicated indices.
    List(Vec<usize>),
}

impl RowRange {
    pub fn span(start: usize, end: usize) -> Self {
        RowRange::Span { start, end }
    }

    /// Sorts and de-duplicates the given indices.
    pub fn list(mut rows: Vec<usize>) -> Self {
        rows.sort_unstable();
        rows.dedup();
        RowRange::List(rows)
    }

    pub fn len(&self) -> usize {
        match self {
            RowRange::Span { start, end } => {
                if end < start {
                    0
                } else {
                    end - start + 1
                }
            }
            RowRange::List(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first(&self) -> Option<usize> {
        match self {
            RowRange::Span { start, end } => (start <= end).then_some(*start),
            RowRange::List(rows) => rows.first().copied(),
        }
    }

    pub fn last(&self) -> Option<usize> {
        match self {
            RowRange::Span { start, end } => (start <= end).then_some(*end),
            RowRange::List(rows) => rows.last().copied(),
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        match self {
            RowRange::Span { start, end } => (*start..=*end).contains(&index),
            RowRange::List(rows) => rows.binary_search(&index).is_ok(),
        }
    }

    /// Smallest member that is `>= index`.
    pub fn first_at_or_after(&self, index: usize) -> Option<usize> {
        match self {
            RowRange::Span { start, end } => {
                let candidate = index.max(*start);
                (candidate <= *end).then_some(candidate)
            }
            RowRange::List(rows) => {
                let pos = rows.partition_point(|r| *r < index);
                rows.get(pos).copied()
            }
        }
    }

    /// Smallest member that is strictly greater than `index`.
    pub fn next_after(&self, index: usize) -> Option<usize> {
        self.first_at_or_after(index.saturating_add(1))
    }

    /// Number of members `>= index`.
    pub fn remaining_from(&self, index: usize) -> usize {
        match self {
            RowRange::Span { start, end } => {
                let from = index.max(*start);
                if from > *end { 0 } else { end - from + 1 }
            }
            RowRange::List(rows) => rows.len() - rows.partition_point(|r| *r < index),
        }
    }

    /// One past the last member; the resting position of an exhausted cursor.
    pub fn end_marker(&self) -> usize {
        self.last().map(|l| l + 1).unwrap_or(0)
    }

    pub fn indices(&self) -> Vec<usize> {
        match self {
            RowRange::Span { start, end } => (*start..=*end).collect(),
            RowRange::List(rows) => rows.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_walk() {
        let r = RowRange::span(3, 5);
        assert_eq!(r.len(), 3);
        assert_eq!(r.first_at_or_after(1), Some(3));
        assert_eq!(r.next_after(3), Some(4));
        assert_eq!(r.next_after(5), None);
        assert_eq!(r.remaining_from(4), 2);
        assert_eq!(r.end_marker(), 6);
    }

    #[test]
    fn empty_span() {
        let r = RowRange::span(3, 2);
        assert!(r.is_empty());
        assert_eq!(r.first(), None);
        assert_eq!(r.remaining_from(0), 0);
    }

    #[test]
    fn list_walk_skips_gaps() {
        let r = RowRange::list(vec![9, 4, 4, 12]);
        assert_eq!(r, RowRange::List(vec![4, 9, 12]));
        assert_eq!(r.next_after(4), Some(9));
        assert_eq!(r.first_at_or_after(10), Some(12));
        assert_eq!(r.remaining_from(5), 2);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        assert_eq!(r.end_marker(), 13);
    }
}
