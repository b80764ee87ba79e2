use super::{StateStore, decode, encode, keys::StateKeys};
use crate::error::StateStoreError;
use model::batch::summary::BatchSummary;
use std::sync::Arc;

/// Keeps the summary of the last finished batch.
#[derive(Clone)]
pub struct SummaryStore {
    store: Arc<dyn StateStore>,
    key: String,
}

impl SummaryStore {
    pub fn new(store: Arc<dyn StateStore>, keys: &StateKeys) -> Self {
        SummaryStore {
            store,
            key: keys.summary(),
        }
    }

    pub async fn load(&self) -> Result<Option<BatchSummary>, StateStoreError> {
        match self.store.get(&self.key).await? {
            Some(bytes) => Ok(Some(decode(&self.key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, summary: &BatchSummary) -> Result<(), StateStoreError> {
        self.store.set(&self.key, encode(&self.key, summary)?).await
    }
}
