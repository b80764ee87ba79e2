use crate::error::StateStoreError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

pub mod control;
pub mod cursor;
pub mod keys;
pub mod ledger;
pub mod lock;
pub mod sled_store;
pub mod summary;

/// Durable key-value store holding all engine state.
///
/// Every operation is atomic for its own key only. Callers never rely on
/// multi-key transactions.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateStoreError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StateStoreError>;

    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StateStoreError>;

    /// Replaces the value at `key` only if it currently equals `expected`
    /// (`None` meaning absent). `new = None` deletes. Returns whether the swap
    /// happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<bool, StateStoreError>;
}

pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StateStoreError> {
    bincode::serialize(value).map_err(|e| StateStoreError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StateStoreError> {
    bincode::deserialize(bytes).map_err(|e| StateStoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
