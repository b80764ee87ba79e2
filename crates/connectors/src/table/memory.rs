use super::RowStore;
use crate::error::TableError;
use async_trait::async_trait;
use model::core::value::Value;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// In-process row store. Rows are kept per sheet as plain cell vectors.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    sheets: RwLock<HashMap<String, Vec<Vec<Value>>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sheet with the given rows (header rows included).
    pub fn with_sheet(mut self, name: &str, rows: Vec<Vec<Value>>) -> Self {
        self.sheets
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), rows);
        self
    }

    /// Copy of every row of a sheet.
    pub fn snapshot(&self, sheet: &str) -> Result<Vec<Vec<Value>>, TableError> {
        let sheets = self
            .sheets
            .read()
            .map_err(|_| TableError::Lock("memory sheets poisoned".into()))?;
        sheets
            .get(sheet)
            .cloned()
            .ok_or_else(|| TableError::SheetNotFound(sheet.to_string()))
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn read_row(&self, sheet: &str, index: usize) -> Result<Vec<Value>, TableError> {
        let sheets = self
            .sheets
            .read()
            .map_err(|_| TableError::Lock("memory sheets poisoned".into()))?;
        let rows = sheets
            .get(sheet)
            .ok_or_else(|| TableError::SheetNotFound(sheet.to_string()))?;

        index
            .checked_sub(1)
            .and_then(|i| rows.get(i))
            .cloned()
            .ok_or_else(|| TableError::RowNotFound {
                sheet: sheet.to_string(),
                index,
            })
    }

    async fn write_cells(
        &self,
        sheet: &str,
        index: usize,
        cells: &[(usize, Value)],
    ) -> Result<(), TableError> {
        if index == 0 {
            return Err(TableError::RowNotFound {
                sheet: sheet.to_string(),
                index,
            });
        }

        let mut sheets = self
            .sheets
            .write()
            .map_err(|_| TableError::Lock("memory sheets poisoned".into()))?;
        let rows = sheets
            .get_mut(sheet)
            .ok_or_else(|| TableError::SheetNotFound(sheet.to_string()))?;

        if rows.len() < index {
            rows.resize_with(index, Vec::new);
        }
        let row = &mut rows[index - 1];
        for (col, value) in cells {
            if row.len() <= *col {
                row.resize(col + 1, Value::Null);
            }
            row[*col] = value.clone();
        }
        Ok(())
    }

    async fn row_count(&self, sheet: &str) -> Result<usize, TableError> {
        let sheets = self
            .sheets
            .read()
            .map_err(|_| TableError::Lock("memory sheets poisoned".into()))?;
        sheets
            .get(sheet)
            .map(|rows| rows.len())
            .ok_or_else(|| TableError::SheetNotFound(sheet.to_string()))
    }
}
