#![allow(dead_code)]

use async_trait::async_trait;
use connectors::{
    enrich::{EnrichRequest, EnrichResponse, EnrichmentClient},
    error::{EnrichError, TableError},
    table::{RowStore, memory::MemoryRowStore},
};
use engine_config::settings::{
    Placement,
    validated::{
        EnrichmentConfig, InstructionsSource, InvocationConfig, TableConfig, ValidatedSettings,
    },
};
use engine_core::state::{
    StateStore, cursor::CursorStore, keys::StateKeys, ledger::ProcessingLedger,
    sled_store::SledStateStore,
};
use engine_runtime::{
    budget::InvocationBudget,
    context::EngineContext,
    controller::{BatchController, InvocationReport},
};
use model::{
    core::{identifiers::RowId, value::Value},
    schema::output::{OutputField, OutputSchema},
};
use serde_json::json;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const INPUT: &str = "Input";
pub const OUTPUT: &str = "Output";
pub const HEADER_ROWS: usize = 2;

/// Column layout shared by both sheets of the fixtures.
pub const COLUMNS: [&str; 5] = ["case_id", "alt_key", "title", "category", "notes"];
pub const CATEGORY_COL: usize = 3;

pub fn case_id(n: usize) -> String {
    format!("C-{n:04}")
}

pub fn alt_key(n: usize) -> String {
    format!("ALT-{n:04}")
}

/// Header rows: a category row over the field-name row, then none, one or
/// more extra header rows so `header_rows` can vary.
pub fn header_block(header_rows: usize) -> Vec<Vec<Value>> {
    let mut rows = Vec::with_capacity(header_rows);
    for i in 0..header_rows.saturating_sub(1) {
        rows.push(vec![Value::from(format!("Section {}", i + 1))]);
    }
    rows.push(COLUMNS.iter().map(|c| Value::from(*c)).collect());
    rows
}

pub fn data_row(id: &str, alt: &str, title: &str) -> Vec<Value> {
    vec![
        Value::from(id),
        Value::from(alt),
        Value::from(title),
        Value::Null,
        Value::Null,
    ]
}

/// `n` data rows below `header_rows` header rows. Data row `k` (0-based) is
/// case `k + 1`.
pub fn case_sheet(n: usize, header_rows: usize) -> Vec<Vec<Value>> {
    let mut rows = header_block(header_rows);
    for k in 1..=n {
        rows.push(data_row(&case_id(k), &alt_key(k), &format!("Case title {k}")));
    }
    rows
}

pub fn schema() -> OutputSchema {
    OutputSchema::new(vec![
        OutputField::new("category", true),
        OutputField::new("notes", false),
    ])
}

pub fn settings(header_rows: usize, placement: Placement, max_rows: Option<usize>) -> ValidatedSettings {
    ValidatedSettings {
        job: "test".to_string(),
        state_path: None,
        table: TableConfig {
            data_dir: PathBuf::from("."),
            delimiter: b',',
            input_sheet: INPUT.to_string(),
            output_sheet: OUTPUT.to_string(),
            header_rows,
            identifier_column: "case_id".to_string(),
            fallback_column: Some("alt_key".to_string()),
            placement,
            skip_when_output_present: false,
        },
        schema: schema(),
        enrichment: EnrichmentConfig {
            endpoint: "http://localhost".to_string(),
            model: "test-model".to_string(),
            api_key_env: "TEST_API_KEY".to_string(),
            instructions: InstructionsSource::Inline("Categorise the case.".to_string()),
            prompt_cache: true,
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
        },
        invocation: InvocationConfig {
            time_budget: Duration::from_secs(3600),
            max_rows,
            row_estimate: Duration::ZERO,
            lock_stale_after: Duration::from_secs(7200),
            cursor_stale_after: Duration::from_secs(7 * 24 * 3600),
            continuation_interval: Duration::ZERO,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(900),
        },
    }
}

pub fn budget(max_rows: usize) -> InvocationBudget {
    InvocationBudget::new(Duration::from_secs(3600), Duration::ZERO, Some(max_rows))
}

/// Canned enrichment outcomes per row identifier. Rows without a script get
/// a category derived from their title.
#[derive(Default)]
pub struct ScriptedEnricher {
    scripts: Mutex<HashMap<RowId, VecDeque<Result<EnrichResponse, EnrichError>>>>,
    calls: Mutex<Vec<RowId>>,
}

impl ScriptedEnricher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, row_id: RowId, outcomes: Vec<Result<EnrichResponse, EnrichError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(row_id)
            .or_default()
            .extend(outcomes);
    }

    pub fn calls(&self) -> Vec<RowId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, row_id: &RowId) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == row_id).count()
    }
}

pub fn category_response(category: &str) -> Result<EnrichResponse, EnrichError> {
    Ok(EnrichResponse {
        fields: json!({ "category": category }).as_object().cloned().unwrap_or_default(),
        cache_hit: false,
    })
}

#[async_trait]
impl EnrichmentClient for ScriptedEnricher {
    async fn enrich(&self, request: EnrichRequest) -> Result<EnrichResponse, EnrichError> {
        self.calls.lock().unwrap().push(request.row_id.clone());
        if let Some(next) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.row_id)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        let title = request
            .payload
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("untitled");
        category_response(&format!("cat:{title}"))
    }
}

/// Row store whose writes fail for selected output rows.
pub struct FlakyRowStore {
    inner: Arc<MemoryRowStore>,
    failing_rows: Mutex<HashSet<usize>>,
}

impl FlakyRowStore {
    pub fn new(inner: Arc<MemoryRowStore>) -> Arc<Self> {
        Arc::new(FlakyRowStore {
            inner,
            failing_rows: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_writes_to(&self, row: usize) {
        self.failing_rows.lock().unwrap().insert(row);
    }

    pub fn heal(&self) {
        self.failing_rows.lock().unwrap().clear();
    }
}

#[async_trait]
impl RowStore for FlakyRowStore {
    async fn read_row(&self, sheet: &str, index: usize) -> Result<Vec<Value>, TableError> {
        self.inner.read_row(sheet, index).await
    }

    async fn write_cells(
        &self,
        sheet: &str,
        index: usize,
        cells: &[(usize, Value)],
    ) -> Result<(), TableError> {
        if self.failing_rows.lock().unwrap().contains(&index) {
            return Err(TableError::WriteRejected {
                sheet: sheet.to_string(),
                index,
                reason: "injected write failure".to_string(),
            });
        }
        self.inner.write_cells(sheet, index, cells).await
    }

    async fn row_count(&self, sheet: &str) -> Result<usize, TableError> {
        self.inner.row_count(sheet).await
    }
}

/// A controller over in-memory sheets and a sled store in a temp dir.
///
/// `restart` drops the controller and builds a new one over the same stores,
/// which is what a process crash followed by a new invocation looks like.
pub struct Harness {
    pub sheets: Arc<MemoryRowStore>,
    pub rows: Arc<FlakyRowStore>,
    pub state: Arc<dyn StateStore>,
    pub enricher: Arc<ScriptedEnricher>,
    pub settings: ValidatedSettings,
    pub controller: Arc<BatchController>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(input: Vec<Vec<Value>>, output: Vec<Vec<Value>>, settings: ValidatedSettings) -> Self {
        Self::over(
            MemoryRowStore::new()
                .with_sheet(INPUT, input)
                .with_sheet(OUTPUT, output),
            settings,
        )
    }

    /// A harness over a store that may hold more sheets than the input and
    /// output pair.
    pub fn over(sheets: MemoryRowStore, settings: ValidatedSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state: Arc<dyn StateStore> =
            Arc::new(SledStateStore::open(dir.path().join("state")).unwrap());
        let sheets = Arc::new(sheets);
        let rows = FlakyRowStore::new(sheets.clone());
        let enricher = ScriptedEnricher::new();
        let controller = Self::controller(&rows, &state, &enricher, &settings);
        Harness {
            sheets,
            rows,
            state,
            enricher,
            settings,
            controller,
            _dir: dir,
        }
    }

    /// Same-index placement over `n` rows in both sheets.
    pub fn same_index(n: usize, max_rows: usize) -> Self {
        Self::new(
            case_sheet(n, HEADER_ROWS),
            case_sheet(n, HEADER_ROWS),
            settings(HEADER_ROWS, Placement::SameIndex, Some(max_rows)),
        )
    }

    fn controller(
        rows: &Arc<FlakyRowStore>,
        state: &Arc<dyn StateStore>,
        enricher: &Arc<ScriptedEnricher>,
        settings: &ValidatedSettings,
    ) -> Arc<BatchController> {
        let rows: Arc<dyn RowStore> = rows.clone();
        let enricher: Arc<dyn EnrichmentClient> = enricher.clone();
        Arc::new(BatchController::new(EngineContext::new(
            settings.clone(),
            rows,
            state.clone(),
            Some(enricher),
        )))
    }

    pub fn restart(&mut self) {
        self.controller = Self::controller(&self.rows, &self.state, &self.enricher, &self.settings);
    }

    pub fn ledger(&self) -> ProcessingLedger {
        ProcessingLedger::new(self.state.clone(), &StateKeys::new("test"), INPUT, OUTPUT)
    }

    pub fn cursors(&self) -> CursorStore {
        CursorStore::new(self.state.clone(), &StateKeys::new("test"))
    }

    pub async fn invoke(&self, max_rows: usize) -> InvocationReport {
        self.controller
            .run_invocation(budget(max_rows), &CancellationToken::new())
            .await
            .unwrap()
    }

    pub fn output_cell(&self, row: usize, col: usize) -> Value {
        self.sheets
            .snapshot(OUTPUT)
            .unwrap()
            .get(row - 1)
            .and_then(|r| r.get(col).cloned())
            .unwrap_or(Value::Null)
    }
}
