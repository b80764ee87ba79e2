use crate::settings::Placement;
use model::schema::output::OutputSchema;
use std::{path::PathBuf, time::Duration};

/// Where the static enrichment instructions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionsSource {
    Inline(String),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub data_dir: PathBuf,
    pub delimiter: u8,
    pub input_sheet: String,
    pub output_sheet: String,
    pub header_rows: usize,
    pub identifier_column: String,
    pub fallback_column: Option<String>,
    pub placement: Placement,
    pub skip_when_output_present: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub instructions: InstructionsSource,
    pub prompt_cache: bool,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationConfig {
    pub time_budget: Duration,
    pub max_rows: Option<usize>,
    pub row_estimate: Duration,
    pub lock_stale_after: Duration,
    pub cursor_stale_after: Duration,
    pub continuation_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

/// Immutable, validated configuration used throughout a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSettings {
    pub job: String,
    pub state_path: Option<PathBuf>,
    pub table: TableConfig,
    pub schema: OutputSchema,
    pub enrichment: EnrichmentConfig,
    pub invocation: InvocationConfig,
}

impl ValidatedSettings {
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn input_sheet(&self) -> &str {
        &self.table.input_sheet
    }

    pub fn output_sheet(&self) -> &str {
        &self.table.output_sheet
    }

    pub fn first_data_row(&self) -> usize {
        self.table.header_rows + 1
    }
}
