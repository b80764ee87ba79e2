use super::{RowStore, SheetLayout, normalize_col_name};
use crate::error::TableError;
use model::{
    core::value::{FieldValue, Value},
    records::row::RowData,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Result of looking a row up by an identifier column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(usize),
    Missing,
    /// More than one data row carries the identifier.
    Ambiguous(Vec<usize>),
}

#[derive(Debug, Clone, Default)]
struct HeaderMap {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderMap {
    fn from_cells(cells: &[Value]) -> Self {
        let names: Vec<String> = cells.iter().map(|c| c.to_string().trim().to_string()).collect();
        let mut positions = HashMap::new();
        for (pos, name) in names.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            // First occurrence wins for duplicated header names.
            positions.entry(normalize_col_name(name)).or_insert(pos);
        }
        HeaderMap { names, positions }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(&normalize_col_name(column)).copied()
    }
}

/// Typed access to one sheet of a [`RowStore`].
///
/// Keeps a header cache and per-column identifier indices for the duration
/// of a batch run. Both are rebuilt lazily after [`invalidate_headers`].
///
/// [`invalidate_headers`]: SheetAdapter::invalidate_headers
pub struct SheetAdapter {
    store: Arc<dyn RowStore>,
    sheet: String,
    layout: SheetLayout,
    headers: RwLock<Option<HeaderMap>>,
    key_index: RwLock<HashMap<String, HashMap<String, Vec<usize>>>>,
}

impl SheetAdapter {
    pub fn new(store: Arc<dyn RowStore>, sheet: &str, layout: SheetLayout) -> Self {
        SheetAdapter {
            store,
            sheet: sheet.to_string(),
            layout,
            headers: RwLock::new(None),
            key_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn layout(&self) -> SheetLayout {
        self.layout
    }

    pub async fn invalidate_headers(&self) {
        *self.headers.write().await = None;
        self.key_index.write().await.clear();
        debug!(sheet = %self.sheet, "Header cache invalidated");
    }

    /// Re-reads the header row and drops every cached identifier index.
    pub async fn refresh_headers(&self) -> Result<(), TableError> {
        let map = self.load_headers().await?;
        *self.headers.write().await = Some(map);
        self.key_index.write().await.clear();
        Ok(())
    }

    async fn load_headers(&self) -> Result<HeaderMap, TableError> {
        let cells = self
            .store
            .read_row(&self.sheet, self.layout.names_row())
            .await?;
        Ok(HeaderMap::from_cells(&cells))
    }

    async fn headers(&self) -> Result<HeaderMap, TableError> {
        if let Some(map) = self.headers.read().await.as_ref() {
            return Ok(map.clone());
        }
        let map = self.load_headers().await?;
        *self.headers.write().await = Some(map.clone());
        Ok(map)
    }

    /// 0-based position of a column in the sheet, matched case-insensitively.
    pub async fn header_index(&self, column: &str) -> Result<Option<usize>, TableError> {
        Ok(self.headers().await?.position(column))
    }

    fn guard_data_row(&self, index: usize) -> Result<(), TableError> {
        if index == 0 {
            return Err(TableError::RowNotFound {
                sheet: self.sheet.clone(),
                index,
            });
        }
        if self.layout.is_header(index) {
            return Err(TableError::HeaderRow {
                sheet: self.sheet.clone(),
                index,
            });
        }
        Ok(())
    }

    pub async fn read_row(&self, index: usize) -> Result<RowData, TableError> {
        self.guard_data_row(index)?;
        let headers = self.headers().await?;
        let cells = self.store.read_row(&self.sheet, index).await?;

        let fields = cells
            .into_iter()
            .enumerate()
            .map(|(pos, value)| FieldValue {
                name: headers.names.get(pos).cloned().unwrap_or_default(),
                value,
            })
            .collect();
        Ok(RowData::new(index, fields))
    }

    /// Writes every field of one row in a single backend call.
    ///
    /// All columns are resolved before anything is written; an unknown column
    /// fails the whole write. Cached positions are checked against the live
    /// header row first, and the cache is rebuilt if the sheet was edited.
    pub async fn write_row(
        &self,
        index: usize,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), TableError> {
        self.guard_data_row(index)?;
        if fields.is_empty() {
            return Ok(());
        }

        let cached = self.headers().await?;
        let live = self.load_headers().await?;

        let stale = fields.keys().any(|column| {
            match cached.position(column) {
                Some(pos) => live
                    .names
                    .get(pos)
                    .map(|name| normalize_col_name(name) != normalize_col_name(column))
                    .unwrap_or(true),
                None => live.position(column).is_some(),
            }
        });
        if stale {
            info!(sheet = %self.sheet, "Header row changed since it was cached, rebuilding");
            *self.headers.write().await = Some(live.clone());
            self.key_index.write().await.clear();
        }

        let mut cells = Vec::with_capacity(fields.len());
        for (column, value) in fields {
            let pos = live
                .position(column)
                .ok_or_else(|| TableError::UnknownColumn {
                    sheet: self.sheet.clone(),
                    column: column.clone(),
                })?;
            cells.push((pos, value.clone()));
        }

        self.store.write_cells(&self.sheet, index, &cells).await?;

        let mut index_cache = self.key_index.write().await;
        for column in fields.keys() {
            index_cache.remove(&normalize_col_name(column));
        }
        Ok(())
    }

    pub async fn row_count(&self) -> Result<usize, TableError> {
        self.store.row_count(&self.sheet).await
    }

    /// Finds the data row whose `column` cell equals `value` (trimmed).
    pub async fn find_row_by_identifier(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Lookup, TableError> {
        let key = normalize_col_name(column);
        let needle = value.trim();
        if needle.is_empty() {
            return Ok(Lookup::Missing);
        }

        if let Some(index) = self.key_index.read().await.get(&key) {
            return Ok(to_lookup(index.get(needle)));
        }

        let index = self.build_key_index(column).await?;
        let lookup = to_lookup(index.get(needle));
        self.key_index.write().await.insert(key, index);
        Ok(lookup)
    }

    async fn build_key_index(
        &self,
        column: &str,
    ) -> Result<HashMap<String, Vec<usize>>, TableError> {
        let pos = self
            .header_index(column)
            .await?
            .ok_or_else(|| TableError::UnknownColumn {
                sheet: self.sheet.clone(),
                column: column.to_string(),
            })?;

        let count = self.row_count().await?;
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for row in self.layout.first_data_row()..=count {
            let cells = self.store.read_row(&self.sheet, row).await?;
            if let Some(text) = cells.get(pos).and_then(Value::as_text) {
                index.entry(text).or_default().push(row);
            }
        }

        let duplicates = index.values().filter(|rows| rows.len() > 1).count();
        if duplicates > 0 {
            warn!(
                sheet = %self.sheet,
                column,
                duplicates,
                "Identifier column has duplicate values"
            );
        }
        debug!(sheet = %self.sheet, column, keys = index.len(), "Built identifier index");
        Ok(index)
    }
}

fn to_lookup(rows: Option<&Vec<usize>>) -> Lookup {
    match rows.map(Vec::as_slice) {
        None | Some([]) => Lookup::Missing,
        Some([single]) => Lookup::Found(*single),
        Some(many) => Lookup::Ambiguous(many.to_vec()),
    }
}
