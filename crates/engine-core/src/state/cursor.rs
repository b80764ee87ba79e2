use super::{StateStore, decode, encode, keys::StateKeys};
use crate::error::StateStoreError;
use model::batch::cursor::BatchCursor;
use std::sync::Arc;
use tracing::debug;

/// Typed access to the single batch cursor of a job.
#[derive(Clone)]
pub struct CursorStore {
    store: Arc<dyn StateStore>,
    key: String,
}

impl CursorStore {
    pub fn new(store: Arc<dyn StateStore>, keys: &StateKeys) -> Self {
        CursorStore {
            store,
            key: keys.cursor(),
        }
    }

    /// Loads the cursor. A record that no longer decodes surfaces as
    /// [`StateStoreError::Corrupt`].
    pub async fn load(&self) -> Result<Option<BatchCursor>, StateStoreError> {
        match self.store.get(&self.key).await? {
            Some(bytes) => Ok(Some(decode(&self.key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, cursor: &BatchCursor) -> Result<(), StateStoreError> {
        let bytes = encode(&self.key, cursor)?;
        self.store.set(&self.key, bytes).await?;
        debug!(
            batch_id = %cursor.batch_id,
            next_index = cursor.next_index,
            state = %cursor.state,
            "Cursor saved"
        );
        Ok(())
    }

    pub async fn delete(&self) -> Result<(), StateStoreError> {
        self.store.delete(&self.key).await
    }
}
