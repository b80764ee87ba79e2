use crate::{error::EngineError, factory};
use connectors::{enrich::EnrichmentClient, table::RowStore};
use engine_config::settings::validated::ValidatedSettings;
use engine_core::{event_bus::bus::EventBus, metrics::Metrics, state::StateStore};
use std::sync::Arc;

/// Everything a controller needs, shared for the lifetime of the process.
#[derive(Clone)]
pub struct EngineContext {
    pub settings: ValidatedSettings,
    pub rows: Arc<dyn RowStore>,
    pub state: Arc<dyn StateStore>,
    /// Absent when no API key is configured.
    pub enricher: Option<Arc<dyn EnrichmentClient>>,
    pub metrics: Metrics,
    pub events: EventBus,
}

impl EngineContext {
    pub fn new(
        settings: ValidatedSettings,
        rows: Arc<dyn RowStore>,
        state: Arc<dyn StateStore>,
        enricher: Option<Arc<dyn EnrichmentClient>>,
    ) -> Self {
        EngineContext {
            settings,
            rows,
            state,
            enricher,
            metrics: Metrics::new(),
            events: EventBus::new(),
        }
    }

    /// Builds the CSV row store, the sled state store and the HTTP
    /// enrichment client described by the settings.
    pub fn from_settings(
        settings: ValidatedSettings,
        api_key: Option<String>,
    ) -> Result<Self, EngineError> {
        let rows = factory::create_row_store(&settings.table);
        let state = factory::open_state_store(&settings)?;
        let enricher = factory::create_enricher(&settings.enrichment, api_key)?;
        Ok(Self::new(settings, rows, state, enricher))
    }
}
