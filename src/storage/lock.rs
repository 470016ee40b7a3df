/*!
The dataset-wide advisory lock: a `.LOCK` object at the dataset root,
created atomically. Destructive operations (journal flush, optimise,
recreate) take the lock; reads do not. An operation that cannot acquire
the lock fails fast with [LakeError::Busy] rather than queuing.
*/

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conventions::path;
use crate::error::{LakeError, Result};
use crate::storage::object::Storage;

/// Contents of the lock object, for diagnostics.
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired: chrono::DateTime<Utc>,
}

/// A held dataset lock. Call [DatasetLock::release]; a dropped lock that
/// was never released stays on disk and must be cleared manually (the
/// holder may still be alive).
#[derive(Debug)]
#[must_use = "the dataset lock must be released"]
pub struct DatasetLock {
    storage: Storage,
    released: bool,
}

impl DatasetLock {
    /// Try to acquire the dataset lock. Fails with [LakeError::Busy] when
    /// it is already held.
    pub async fn acquire(storage: &Storage, holder: &str) -> Result<DatasetLock> {
        let info = LockInfo {
            holder: holder.to_string(),
            acquired: Utc::now(),
        };
        let data = serde_json::to_vec(&info)?;
        match storage.put_new(path::LOCK, Bytes::from(data)).await {
            Ok(()) => {
                debug!(holder, "acquired dataset lock");
                Ok(DatasetLock {
                    storage: storage.clone(),
                    released: false,
                })
            }
            Err(LakeError::Conflict(_)) => Err(LakeError::Busy(storage.uri().to_string())),
            Err(err) => Err(err),
        }
    }

    /// Release the lock.
    pub async fn release(mut self) -> Result<()> {
        self.storage.delete(path::LOCK).await?;
        self.released = true;
        Ok(())
    }
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        if !self.released {
            debug!("dataset lock dropped without release");
        }
    }
}
