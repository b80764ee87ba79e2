use engine_config::settings::error::SettingsError;
use engine_runtime::error::EngineError;
use model::error::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid configuration: {0}")]
    Settings(#[from] SettingsError),

    #[error("Invalid row selection: {0}")]
    RowSelection(#[from] ModelError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
