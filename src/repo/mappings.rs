/*!
Mapping configuration storage: one `mapping.yml` per archived CSV file,
keyed by its content hash, written versioned so edits keep their history.
*/

use tracing::info;

use crate::conventions::{path, tag};
use crate::error::Result;
use crate::model::mapping::MappingSpec;
use crate::storage::object::Storage;
use crate::storage::tags::TagStore;
use crate::storage::versions::VersionStore;

/// Mapping configuration operations for one dataset.
#[derive(Debug, Clone)]
pub struct MappingRepository {
    storage: Storage,
    tags: TagStore,
    versions: VersionStore,
}

impl MappingRepository {
    /// Open the repository on a dataset's storage.
    pub fn new(storage: Storage, tags: TagStore, versions: VersionStore) -> Self {
        MappingRepository {
            storage,
            tags,
            versions,
        }
    }

    /// Store (or update) the mapping for an archived CSV, versioned, and
    /// stamp its configuration tag.
    pub async fn put(&self, content_hash: &str, spec: &MappingSpec) -> Result<()> {
        crate::util::checksum_key(content_hash)?;
        let key = path::mapping(content_hash);
        self.versions.make(&key, spec).await?;
        self.tags
            .set(&tag::mapping_config(content_hash), None)
            .await?;
        info!(content_hash, "stored mapping configuration");
        Ok(())
    }

    /// Load the mapping for an archived CSV. Fails with
    /// [crate::LakeError::NotFound] when none is configured.
    pub async fn get(&self, content_hash: &str) -> Result<MappingSpec> {
        let data = self.storage.get(&path::mapping(content_hash)).await?;
        MappingSpec::from_yaml(&data)
    }

    /// Whether a mapping is configured for the content hash.
    pub async fn exists(&self, content_hash: &str) -> Result<bool> {
        self.storage.exists(&path::mapping(content_hash)).await
    }

    /// All content hashes with a configured mapping.
    pub async fn list(&self) -> Result<Vec<String>> {
        let keys = self
            .storage
            .iterate_keys(Some(path::MAPPINGS), None, None)
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let mut parts = key.split('/');
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(_), Some(hash), Some(name), None) if name == path::MAPPING => {
                        Some(hash.to_string())
                    }
                    _ => None,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::sha1_digest;

    fn repo() -> MappingRepository {
        let storage = Storage::memory();
        let tags = TagStore::new(storage.clone());
        let versions = VersionStore::new(storage.clone(), tags.clone());
        MappingRepository::new(storage, tags, versions)
    }

    fn spec() -> MappingSpec {
        MappingSpec::from_yaml(
            b"queries:\n  - schema: Person\n    keys: [id]\n    properties:\n      name:\n        column: name\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let repo = repo();
        let hash = sha1_digest(b"csv content");
        repo.put(&hash, &spec()).await.unwrap();
        assert!(repo.exists(&hash).await.unwrap());
        assert_eq!(repo.get(&hash).await.unwrap(), spec());
        assert!(repo
            .tags
            .get(&tag::mapping_config(&hash))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_versions_accumulate() {
        let repo = repo();
        let hash = sha1_digest(b"csv content");
        repo.put(&hash, &spec()).await.unwrap();
        repo.put(&hash, &spec()).await.unwrap();
        let versions = repo
            .versions
            .list_versions(&path::mapping(&hash))
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn test_list() {
        let repo = repo();
        let a = sha1_digest(b"a");
        let b = sha1_digest(b"b");
        repo.put(&a, &spec()).await.unwrap();
        repo.put(&b, &spec()).await.unwrap();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(repo.list().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_invalid_hash_rejected() {
        let repo = repo();
        assert!(repo.put("nope", &spec()).await.is_err());
    }
}
