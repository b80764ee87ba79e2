use super::{StateStore, decode, encode, keys::StateKeys};
use crate::error::StateStoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Operator requests, picked up by the running invocation between rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlFlags {
    pub pause_requested: bool,
    pub cancel_requested: bool,
    pub requested_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ControlStore {
    store: Arc<dyn StateStore>,
    key: String,
}

impl ControlStore {
    pub fn new(store: Arc<dyn StateStore>, keys: &StateKeys) -> Self {
        ControlStore {
            store,
            key: keys.control(),
        }
    }

    /// Current flags. An unreadable record counts as no request.
    pub async fn load(&self) -> Result<ControlFlags, StateStoreError> {
        match self.store.get(&self.key).await? {
            Some(bytes) => match decode(&self.key, &bytes) {
                Ok(flags) => Ok(flags),
                Err(StateStoreError::Corrupt { .. }) => Ok(ControlFlags::default()),
                Err(err) => Err(err),
            },
            None => Ok(ControlFlags::default()),
        }
    }

    async fn update(&self, f: impl FnOnce(&mut ControlFlags)) -> Result<(), StateStoreError> {
        let mut flags = self.load().await?;
        f(&mut flags);
        flags.requested_at = Some(Utc::now());
        self.store.set(&self.key, encode(&self.key, &flags)?).await
    }

    pub async fn request_pause(&self) -> Result<(), StateStoreError> {
        self.update(|f| f.pause_requested = true).await
    }

    pub async fn request_cancel(&self) -> Result<(), StateStoreError> {
        self.update(|f| f.cancel_requested = true).await
    }

    pub async fn clear_pause(&self) -> Result<(), StateStoreError> {
        self.update(|f| f.pause_requested = false).await
    }

    pub async fn clear(&self) -> Result<(), StateStoreError> {
        self.store.delete(&self.key).await
    }
}
