use crate::error::EngineError;
use connectors::{
    enrich::{
        EnrichmentClient,
        openai::{OpenAiClient, OpenAiConfig},
        prompt::PromptTemplate,
    },
    table::{RowStore, csv::CsvRowStore},
};
use engine_config::settings::validated::{
    EnrichmentConfig, InstructionsSource, TableConfig, ValidatedSettings,
};
use engine_core::state::{StateStore, sled_store::SledStateStore};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};

pub fn create_row_store(table: &TableConfig) -> Arc<dyn RowStore> {
    info!(dir = %table.data_dir.display(), "Using CSV row store");
    Arc::new(CsvRowStore::new(table.data_dir.clone()).with_delimiter(table.delimiter))
}

/// Configured path, else `~/.enrich/state`.
pub fn state_path(settings: &ValidatedSettings) -> Result<PathBuf, EngineError> {
    if let Some(path) = &settings.state_path {
        return Ok(path.clone());
    }
    let home_dir = dirs::home_dir().ok_or_else(|| {
        EngineError::InitializationError("Could not determine home directory".to_string())
    })?;
    Ok(home_dir.join(".enrich/state"))
}

pub fn open_state_store(settings: &ValidatedSettings) -> Result<Arc<dyn StateStore>, EngineError> {
    let path = state_path(settings)?;
    info!(path = %path.display(), "Opening state store");
    Ok(Arc::new(SledStateStore::open(path)?))
}

/// `api_key` is the value of `config.api_key_env` as seen by the caller.
/// Without a key there is no client; operator commands still work.
pub fn create_enricher(
    config: &EnrichmentConfig,
    api_key: Option<String>,
) -> Result<Option<Arc<dyn EnrichmentClient>>, EngineError> {
    let Some(api_key) = api_key.filter(|key| !key.trim().is_empty()) else {
        debug!(env = %config.api_key_env, "No enrichment API key configured");
        return Ok(None);
    };

    let template = match &config.instructions {
        InstructionsSource::Inline(text) => PromptTemplate::new(text.clone()),
        InstructionsSource::File(path) => {
            PromptTemplate::from_file(path).map_err(|source| EngineError::Instructions {
                path: path.clone(),
                source,
            })?
        }
    };

    let client = OpenAiClient::new(
        OpenAiConfig {
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            timeout: config.timeout,
            prompt_cache: config.prompt_cache,
        },
        template,
    )?;
    info!(
        model = %config.model,
        prompt_cache = config.prompt_cache,
        "Enrichment client ready"
    );
    Ok(Some(Arc::new(client)))
}
