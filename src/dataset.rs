/*!
The per-dataset facade: one [Dataset] owns the storage handles, tag and
version stores, the journal, and the domain repositories, and offers the
configuration lifecycle (`config.yml` is the marker of existence and is
always written versioned).
*/

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conventions::path;
use crate::error::{LakeError, Result};
use crate::model::dataset::{DatasetConfig, DatasetConfigPatch};
use crate::repo::archive::ArchiveRepository;
use crate::repo::documents::DocumentRepository;
use crate::repo::entities::EntityRepository;
use crate::repo::jobs::JobRepository;
use crate::repo::mappings::MappingRepository;
use crate::settings::Settings;
use crate::storage::journal::JournalStore;
use crate::storage::object::Storage;
use crate::storage::tags::TagStore;
use crate::storage::versions::VersionStore;

/// One dataset of a lakehouse with all its stores and repositories.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    settings: Settings,
    storage: Storage,
    tags: TagStore,
    versions: VersionStore,
    entities: EntityRepository,
    archive: ArchiveRepository,
    documents: DocumentRepository,
    mappings: MappingRepository,
    jobs: JobRepository,
}

impl Dataset {
    /// Open a dataset within a lakehouse storage. The dataset lives under
    /// `<lake>/<name>/`; its journal location derives from the settings.
    pub fn open(lake_storage: &Storage, name: &str, settings: &Settings) -> Result<Self> {
        validate_name(name)?;
        let storage = lake_storage.child(name);
        let journal = JournalStore::open(&settings.journal_uri_for(name), name)?;
        Ok(Dataset::assemble(name, settings.clone(), storage, journal))
    }

    /// Open a dataset directly on its own storage root.
    pub fn from_storage(
        storage: Storage,
        name: &str,
        settings: &Settings,
        journal: JournalStore,
    ) -> Result<Self> {
        validate_name(name)?;
        Ok(Dataset::assemble(name, settings.clone(), storage, journal))
    }

    fn assemble(name: &str, settings: Settings, storage: Storage, journal: JournalStore) -> Self {
        let tags = TagStore::new(storage.clone());
        let versions = VersionStore::new(storage.clone(), tags.clone());
        let entities = EntityRepository::new(name, storage.clone(), tags.clone(), journal);
        let archive = ArchiveRepository::new(name, storage.clone(), tags.clone());
        let documents = DocumentRepository::new(name, storage.clone());
        let mappings = MappingRepository::new(storage.clone(), tags.clone(), versions.clone());
        let jobs = JobRepository::new(storage.clone());
        Dataset {
            name: name.to_string(),
            settings,
            storage,
            tags,
            versions,
            entities,
            archive,
            documents,
            mappings,
            jobs,
        }
    }

    /// The dataset name (also known as the foreign id).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dataset-rooted storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The tag store.
    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    /// The version store.
    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// The entity repository.
    pub fn entities(&self) -> &EntityRepository {
        &self.entities
    }

    /// The file archive.
    pub fn archive(&self) -> &ArchiveRepository {
        &self.archive
    }

    /// The document repository.
    pub fn documents(&self) -> &DocumentRepository {
        &self.documents
    }

    /// The mapping repository.
    pub fn mappings(&self) -> &MappingRepository {
        &self.mappings
    }

    /// The job run repository.
    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    /// Whether the dataset exists (it has a `config.yml`).
    pub async fn exists(&self) -> Result<bool> {
        self.storage.exists(path::CONFIG).await
    }

    /// Create the dataset configuration if it does not exist yet.
    pub async fn ensure(&self) -> Result<()> {
        if self.exists().await? {
            return Ok(());
        }
        let config = DatasetConfig::new(&self.name);
        self.versions.make(path::CONFIG, &config).await?;
        info!(dataset = %self.name, "created dataset configuration");
        Ok(())
    }

    /// Load the dataset configuration, falling back to a minimal default
    /// when none is written yet.
    pub async fn config(&self) -> Result<DatasetConfig> {
        match self.versions.get_optional::<DatasetConfig>(path::CONFIG).await? {
            Some(config) => {
                if config.name != self.name {
                    return Err(LakeError::BadInput(format!(
                        "config.yml names dataset `{}`, expected `{}`",
                        config.name, self.name
                    )));
                }
                Ok(config)
            }
            None => Ok(DatasetConfig::new(&self.name)),
        }
    }

    /// Patch the configuration and write it versioned.
    pub async fn make_config(&self, patch: DatasetConfigPatch) -> Result<DatasetConfig> {
        let mut config = self.config().await?;
        config.patch(patch);
        self.versions.make(path::CONFIG, &config).await?;
        Ok(config)
    }

    /// The effective public URL prefix for this dataset: the config
    /// override, or the settings template expanded with the dataset name.
    pub async fn public_url_prefix(&self) -> Result<Option<String>> {
        let config = self.config().await?;
        Ok(config
            .public_url_prefix
            .or_else(|| self.settings.public_url_prefix_for(&self.name)))
    }

    /// Run the full make workflow: flush and produce all exports and the
    /// index, each skipped when already up-to-date.
    pub async fn make(&self, force: bool) -> Result<()> {
        self.ensure().await?;
        crate::ops::make(self, force, &CancellationToken::new()).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(LakeError::BadInput(format!(
            "invalid dataset name: `{name}`"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn memory_dataset(name: &str) -> Dataset {
        let lake = Storage::memory();
        let settings = Settings {
            journal_uri: "sqlite:///:memory:".to_string(),
            ..Settings::default()
        };
        Dataset::open(&lake, name, &settings).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_and_config() {
        let dataset = memory_dataset("acme");
        assert!(!dataset.exists().await.unwrap());
        dataset.ensure().await.unwrap();
        assert!(dataset.exists().await.unwrap());
        // idempotent
        dataset.ensure().await.unwrap();
        assert_eq!(
            dataset
                .versions()
                .list_versions(path::CONFIG)
                .await
                .unwrap()
                .len(),
            1
        );
        let config = dataset.config().await.unwrap();
        assert_eq!(config.name, "acme");
    }

    #[tokio::test]
    async fn test_make_config_patches_versioned() {
        let dataset = memory_dataset("acme");
        dataset.ensure().await.unwrap();
        let config = dataset
            .make_config(DatasetConfigPatch {
                title: Some("ACME Papers".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(config.title.as_deref(), Some("ACME Papers"));
        assert_eq!(
            dataset
                .versions()
                .list_versions(path::CONFIG)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_mismatched_config_name_rejected() {
        let dataset = memory_dataset("acme");
        let rogue = DatasetConfig::new("other");
        dataset
            .versions()
            .make(path::CONFIG, &rogue)
            .await
            .unwrap();
        assert!(dataset.config().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let lake = Storage::memory();
        let settings = Settings {
            journal_uri: "sqlite:///:memory:".to_string(),
            ..Settings::default()
        };
        assert!(Dataset::open(&lake, "", &settings).is_err());
        assert!(Dataset::open(&lake, "a/b", &settings).is_err());
        assert!(Dataset::open(&lake, "acme_2024", &settings).is_ok());
    }

    #[tokio::test]
    async fn test_public_url_prefix_resolution() {
        let lake = Storage::memory();
        let settings = Settings {
            journal_uri: "sqlite:///:memory:".to_string(),
            public_url_prefix: Some("https://data.example.org/{dataset}".to_string()),
            ..Settings::default()
        };
        let dataset = Dataset::open(&lake, "acme", &settings).unwrap();
        assert_eq!(
            dataset.public_url_prefix().await.unwrap().as_deref(),
            Some("https://data.example.org/acme")
        );
        // config override wins
        dataset
            .make_config(DatasetConfigPatch {
                public_url_prefix: Some("https://mirror.example.org".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            dataset.public_url_prefix().await.unwrap().as_deref(),
            Some("https://mirror.example.org")
        );
    }
}
