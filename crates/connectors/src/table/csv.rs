use super::RowStore;
use crate::error::TableError;
use async_trait::async_trait;
use model::core::value::Value;
use std::{collections::HashMap, io::Write, path::PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Row store backed by one CSV file per sheet (`{dir}/{sheet}.csv`).
///
/// Every record of the file is a row, header lines included, and so is every
/// blank line between records. Without quoted line breaks, row indices match
/// line numbers. Sheets are loaded lazily and kept in memory; a write rewrites
/// the whole file through a temporary file and a rename, and the in-memory
/// copy only changes once the rename succeeded. Blank rows are written back as
/// blank lines.
pub struct CsvRowStore {
    dir: PathBuf,
    delimiter: u8,
    sheets: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl CsvRowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvRowStore {
            dir: dir.into(),
            delimiter: b',',
            sheets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn sheet_path(&self, sheet: &str) -> Result<PathBuf, TableError> {
        if sheet.is_empty() || sheet.contains(['/', '\\']) || sheet.contains("..") {
            return Err(TableError::SheetNotFound(sheet.to_string()));
        }
        Ok(self.dir.join(format!("{sheet}.csv")))
    }

    fn load(&self, sheet: &str) -> Result<Vec<Vec<String>>, TableError> {
        let path = self.sheet_path(sheet)?;
        if !path.exists() {
            return Err(TableError::SheetNotFound(sheet.to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_path(&path)?;

        // The reader skips blank lines; they are restored from the line
        // each record starts on.
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut next_line = 1u64;
        for record in reader.records() {
            let record = record?;
            if let Some(position) = record.position() {
                while next_line < position.line() {
                    rows.push(Vec::new());
                    next_line += 1;
                }
            }
            let breaks: usize = record.iter().map(|field| field.matches('\n').count()).sum();
            next_line += 1 + breaks as u64;
            rows.push(record.iter().map(str::to_string).collect());
        }
        debug!("Loaded {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }

    fn persist(&self, sheet: &str, rows: &[Vec<String>]) -> Result<(), TableError> {
        let path = self.sheet_path(sheet)?;
        let tmp = path.with_extension("csv.tmp");

        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .delimiter(self.delimiter)
                .from_path(&tmp)?;
            for row in rows {
                if row.is_empty() {
                    writer.flush()?;
                    (&mut writer.get_ref()).write_all(b"\n")?;
                } else {
                    writer.write_record(row)?;
                }
            }
            writer.flush()?;
        }

        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn with_sheet<T>(
        &self,
        sheet: &str,
        f: impl FnOnce(&Vec<Vec<String>>) -> Result<T, TableError>,
    ) -> Result<T, TableError> {
        let mut sheets = self.sheets.lock().await;
        if !sheets.contains_key(sheet) {
            let rows = self.load(sheet)?;
            sheets.insert(sheet.to_string(), rows);
        }
        match sheets.get(sheet) {
            Some(rows) => f(rows),
            None => Err(TableError::SheetNotFound(sheet.to_string())),
        }
    }
}

fn cell_to_value(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else {
        Value::String(cell.to_string())
    }
}

#[async_trait]
impl RowStore for CsvRowStore {
    async fn read_row(&self, sheet: &str, index: usize) -> Result<Vec<Value>, TableError> {
        self.with_sheet(sheet, |rows| {
            index
                .checked_sub(1)
                .and_then(|i| rows.get(i))
                .map(|row| row.iter().map(|c| cell_to_value(c)).collect())
                .ok_or_else(|| TableError::RowNotFound {
                    sheet: sheet.to_string(),
                    index,
                })
        })
        .await
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

        let mut sheets = self.sheets.lock().await;
        let mut rows = match sheets.get(sheet) {
            Some(rows) => rows.clone(),
            None => self.load(sheet)?,
        };

        if rows.len() < index {
            rows.resize_with(index, Vec::new);
        }
        let row = &mut rows[index - 1];
        for (col, value) in cells {
            if row.len() <= *col {
                row.resize(col + 1, String::new());
            }
            row[*col] = value.to_string();
        }

        self.persist(sheet, &rows)?;
        sheets.insert(sheet.to_string(), rows);
        Ok(())
    }

    async fn row_count(&self, sheet: &str) -> Result<usize, TableError> {
        self.with_sheet(sheet, |rows| Ok(rows.len())).await
    }
}
