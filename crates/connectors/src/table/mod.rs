use crate::error::TableError;
use async_trait::async_trait;
use model::core::value::Value;

pub mod adapter;
pub mod csv;
pub mod memory;

/// Raw access to an ordered table of rows, addressed by 1-based index.
///
/// Column positions in `write_cells` are 0-based. Implementations must apply
/// all cells of one `write_cells` call or none of them.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn read_row(&self, sheet: &str, index: usize) -> Result<Vec<Value>, TableError>;

    async fn write_cells(
        &self,
        sheet: &str,
        index: usize,
        cells: &[(usize, Value)],
    ) -> Result<(), TableError>;

    async fn row_count(&self, sheet: &str) -> Result<usize, TableError>;
}

/// Header geometry of a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    /// Number of header rows. The last one carries the field names; a
    /// two-row header puts a category row above it.
    pub header_rows: usize,
}

impl SheetLayout {
    pub fn new(header_rows: usize) -> Self {
        SheetLayout {
            header_rows: header_rows.max(1),
        }
    }

    pub fn names_row(&self) -> usize {
        self.header_rows
    }

    pub fn first_data_row(&self) -> usize {
        self.header_rows + 1
    }

    pub fn is_header(&self, index: usize) -> bool {
        index <= self.header_rows
    }
}

impl Default for SheetLayout {
    fn default() -> Self {
        SheetLayout::new(1)
    }
}

pub(crate) fn normalize_col_name(name: &str) -> String {
    name.trim().to_lowercase()
}
