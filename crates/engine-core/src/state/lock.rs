use super::{StateStore, decode, encode, keys::StateKeys};
use crate::error::{LockError, StateStoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    Fresh,
    /// An abandoned lock was taken over.
    Reclaimed(LockRecord),
}

/// Single-key "invocation in progress" lock, taken with compare-and-swap.
///
/// A holder that crashed leaves its record behind; once the record is older
/// than `stale_after` the next invocation reclaims it.
#[derive(Clone)]
pub struct InvocationLock {
    store: Arc<dyn StateStore>,
    key: String,
    stale_after: Duration,
}

impl InvocationLock {
    pub fn new(store: Arc<dyn StateStore>, keys: &StateKeys, stale_after: Duration) -> Self {
        InvocationLock {
            store,
            key: keys.lock(),
            stale_after,
        }
    }

    pub async fn current(&self) -> Result<Option<LockRecord>, StateStoreError> {
        match self.store.get(&self.key).await? {
            Some(bytes) => Ok(Some(decode(&self.key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// The lock record, unless it is old enough to be reclaimed or unreadable.
    pub async fn live(&self) -> Result<Option<LockRecord>, StateStoreError> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            return Ok(None);
        };
        match decode::<LockRecord>(&self.key, &bytes) {
            Ok(record) if !self.is_stale(&record, Utc::now()) => Ok(Some(record)),
            Ok(_) | Err(_) => Ok(None),
        }
    }

    fn is_stale(&self, record: &LockRecord, now: DateTime<Utc>) -> bool {
        now - record.acquired_at >= self.stale_after
    }

    pub async fn acquire(&self, holder: &str) -> Result<Acquired, LockError> {
        let now = Utc::now();
        let record = LockRecord {
            holder: holder.to_string(),
            acquired_at: now,
        };
        let new_bytes = encode(&self.key, &record)?;

        let existing = self.store.get(&self.key).await?;
        let outcome = match &existing {
            None => Acquired::Fresh,
            Some(bytes) => match decode::<LockRecord>(&self.key, bytes) {
                Ok(current) if !self.is_stale(&current, now) => {
                    return Err(LockError::Held {
                        holder: current.holder,
                        acquired_at: current.acquired_at,
                    });
                }
                Ok(current) => {
                    warn!(
                        holder = %current.holder,
                        acquired_at = %current.acquired_at,
                        "StaleLock: reclaiming abandoned invocation lock"
                    );
                    Acquired::Reclaimed(current)
                }
                Err(err) => {
                    warn!(error = %err, "StaleLock: lock record unreadable, reclaiming");
                    Acquired::Reclaimed(LockRecord {
                        holder: String::from("<corrupt>"),
                        acquired_at: now,
                    })
                }
            },
        };

        if self
            .store
            .compare_and_swap(&self.key, existing, Some(new_bytes))
            .await?
        {
            debug!(holder, "Invocation lock acquired");
            Ok(outcome)
        } else {
            Err(LockError::Contended)
        }
    }

    /// Releases the lock if `holder` still owns it. Returns whether it did.
    pub async fn release(&self, holder: &str) -> Result<bool, StateStoreError> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            return Ok(false);
        };
        let current: LockRecord = decode(&self.key, &bytes)?;
        if current.holder != holder {
            warn!(holder, owner = %current.holder, "Lock owned by another holder, not releasing");
            return Ok(false);
        }
        let released = self
            .store
            .compare_and_swap(&self.key, Some(bytes), None)
            .await?;
        debug!(holder, released, "Invocation lock released");
        Ok(released)
    }

    /// Removes the lock regardless of holder.
    pub async fn force_release(&self) -> Result<(), StateStoreError> {
        self.store.delete(&self.key).await
    }
}
