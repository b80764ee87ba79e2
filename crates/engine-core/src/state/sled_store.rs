use crate::{error::StateStoreError, state::StateStore};
use async_trait::async_trait;
use std::path::Path;

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Store that lives only as long as the process.
    pub fn temporary() -> Result<Self, StateStoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    async fn flush(&self) -> Result<(), StateStoreError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateStoreError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StateStoreError> {
        self.db.insert(key, value)?;
        self.flush().await
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.db.remove(key)?;
        self.flush().await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StateStoreError> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
        }
        Ok(entries)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<bool, StateStoreError> {
        let swapped = self.db.compare_and_swap(key, expected, new)?.is_ok();
        if swapped {
            self.flush().await?;
        }
        Ok(swapped)
    }
}
