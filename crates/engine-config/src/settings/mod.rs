use crate::settings::error::SettingsError;
use model::schema::output::OutputSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod error;
pub mod validated;
pub mod validator;

/// How an input row finds the output row its results go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Output row N receives the results of input row N.
    #[default]
    SameIndex,
    /// The output row carrying the same identifier receives the results.
    MatchByKey,
}

/// Settings as written in the JSON settings file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Namespace of all persisted state.
    #[serde(default = "default_job")]
    pub job: String,

    /// Directory of the state database. The CLI picks a per-user default.
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    pub table: TableSettings,

    pub schema: OutputSchema,

    #[serde(default)]
    pub enrichment: EnrichmentSettings,

    #[serde(default)]
    pub invocation: InvocationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSettings {
    /// Directory holding one `{sheet}.csv` file per sheet.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default = "default_input_sheet")]
    pub input_sheet: String,

    #[serde(default = "default_output_sheet")]
    pub output_sheet: String,

    /// Rows at the top of each sheet that hold headers, not data.
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,

    pub identifier_column: String,

    /// Secondary key used when the identifier is empty or cannot be matched.
    #[serde(default)]
    pub fallback_column: Option<String>,

    #[serde(default)]
    pub placement: Placement,

    /// Treat a row as done when its output cells already have content.
    #[serde(default)]
    pub skip_when_output_present: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub instructions_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub prompt_cache: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationSettings {
    /// Wall-clock budget of one invocation.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,

    /// Optional cap on rows per invocation.
    #[serde(default)]
    pub max_rows: Option<usize>,

    /// Expected duration of one row; no row is started unless it fits in the
    /// remaining budget.
    #[serde(default = "default_row_estimate_secs")]
    pub row_estimate_secs: u64,

    /// Defaults to twice the time budget.
    #[serde(default)]
    pub lock_stale_after_secs: Option<u64>,

    #[serde(default = "default_cursor_stale_after_secs")]
    pub cursor_stale_after_secs: u64,

    #[serde(default = "default_continuation_interval_secs")]
    pub continuation_interval_secs: u64,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

impl EngineSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        EnrichmentSettings {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            instructions: None,
            instructions_path: None,
            prompt_cache: true,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for InvocationSettings {
    fn default() -> Self {
        InvocationSettings {
            time_budget_secs: default_time_budget_secs(),
            max_rows: None,
            row_estimate_secs: default_row_estimate_secs(),
            lock_stale_after_secs: None,
            cursor_stale_after_secs: default_cursor_stale_after_secs(),
            continuation_interval_secs: default_continuation_interval_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

fn default_job() -> String {
    "default".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_delimiter() -> char {
    ','
}

fn default_input_sheet() -> String {
    "Input".into()
}

fn default_output_sheet() -> String {
    "Output".into()
}

fn default_header_rows() -> usize {
    2
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    8_000
}

fn default_time_budget_secs() -> u64 {
    270
}

fn default_row_estimate_secs() -> u64 {
    15
}

fn default_cursor_stale_after_secs() -> u64 {
    7 * 24 * 3600
}

fn default_continuation_interval_secs() -> u64 {
    60
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_backoff_max_secs() -> u64 {
    900
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "table": { "identifier_column": "case_id" },
        "schema": { "fields": [ { "name": "category" } ] }
    }"#;

    #[test]
    fn minimal_settings_get_defaults() {
        let settings = EngineSettings::from_json(MINIMAL).unwrap();
        assert_eq!(settings.job, "default");
        assert_eq!(settings.table.header_rows, 2);
        assert_eq!(settings.table.input_sheet, "Input");
        assert_eq!(settings.table.placement, Placement::SameIndex);
        assert_eq!(settings.enrichment.model, "gpt-4o-mini");
        assert!(settings.enrichment.prompt_cache);
        assert_eq!(settings.invocation.lock_stale_after_secs, None);
    }

    #[test]
    fn placement_is_snake_case() {
        let json = r#"{
            "table": { "identifier_column": "id", "placement": "match_by_key" },
            "schema": { "fields": [] }
        }"#;
        let settings = EngineSettings::from_json(json).unwrap();
        assert_eq!(settings.table.placement, Placement::MatchByKey);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineSettings::load(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, MINIMAL).unwrap();
        assert_eq!(
            EngineSettings::load(&path).unwrap().table.identifier_column,
            "case_id"
        );
    }
}
