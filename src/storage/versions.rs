/*!
The version store: timestamped snapshots of serialised models. Writing to
a versioned path also writes the current copy and stamps the tag for that
path, so freshness checks and history walk the same clock.

Serialisation follows the file extension: `.json` or `.yml`.
*/

use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::conventions::path;
use crate::error::{LakeError, Result};
use crate::storage::object::Storage;
use crate::storage::tags::TagStore;

/// Versioned model snapshots on a dataset's storage.
#[derive(Debug, Clone)]
pub struct VersionStore {
    storage: Storage,
    tags: TagStore,
}

impl VersionStore {
    /// Open the version store.
    pub fn new(storage: Storage, tags: TagStore) -> Self {
        VersionStore { storage, tags }
    }

    /// Serialise `model` to `key`, write a timestamped copy under
    /// `versions/YYYY/MM/<TS>/<key>` and stamp the tag for `key`. Returns
    /// the versioned path.
    pub async fn make<T: Serialize>(&self, key: &str, model: &T) -> Result<String> {
        let data = serialize_model(key, model)?;
        let versioned = path::version(key, &Utc::now());
        self.storage
            .put(&versioned, Bytes::from(data.clone()))
            .await?;
        self.storage.put(key, Bytes::from(data)).await?;
        self.tags.set(key, None).await?;
        info!(key, version = %versioned, "wrote versioned model");
        Ok(versioned)
    }

    /// Read the current copy of a versioned model.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let data = self.storage.get(key).await?;
        deserialize_model(key, &data)
    }

    /// Read the current copy, returning `None` when missing.
    pub async fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await {
            Ok(model) => Ok(Some(model)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Whether the current copy exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.storage.exists(key).await
    }

    /// All versioned copies of a key, sorted by timestamp.
    pub async fn list_versions(&self, key: &str) -> Result<Vec<String>> {
        let suffix = format!("/{key}");
        let mut versions: Vec<String> = self
            .storage
            .iterate_keys(Some(path::VERSIONS), None, None)
            .await?
            .into_iter()
            .filter(|candidate| candidate.ends_with(&suffix))
            .collect();
        versions.sort();
        Ok(versions)
    }
}

fn serialize_model<T: Serialize>(key: &str, model: &T) -> Result<Vec<u8>> {
    match extension(key) {
        Some("json") => {
            let mut data = serde_json::to_vec(model)?;
            data.push(b'\n');
            Ok(data)
        }
        Some("yml") | Some("yaml") => Ok(serde_yaml::to_string(model)?.into_bytes()),
        _ => Err(LakeError::BadInput(format!(
            "cannot serialize model for `{key}`"
        ))),
    }
}

fn deserialize_model<T: DeserializeOwned>(key: &str, data: &[u8]) -> Result<T> {
    match extension(key) {
        Some("json") => Ok(serde_json::from_slice(data)?),
        Some("yml") | Some("yaml") => Ok(serde_yaml::from_slice(data)?),
        _ => Err(LakeError::BadInput(format!(
            "cannot deserialize model for `{key}`"
        ))),
    }
}

fn extension(key: &str) -> Option<&str> {
    key.rsplit('.').next()
}
