/*!
The lakehouse catalog: a storage root holding one dataset per child
directory. A child is a dataset iff it has a `config.yml`. The catalog
composes its own versioned `index.json` over the dataset indexes.
*/

use chrono::Utc;
use tracing::info;

use crate::conventions::path;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::model::dataset::{CatalogIndex, DatasetIndex};
use crate::settings::Settings;
use crate::storage::object::Storage;
use crate::storage::tags::TagStore;
use crate::storage::versions::VersionStore;

/// A multi-dataset lakehouse rooted at one storage URI.
#[derive(Debug, Clone)]
pub struct Lakehouse {
    storage: Storage,
    settings: Settings,
    versions: VersionStore,
}

impl Lakehouse {
    /// Open a lakehouse from settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let storage = Storage::open(&settings.uri)?;
        Ok(Lakehouse::with_storage(storage, settings))
    }

    /// Open a lakehouse from the process environment.
    pub fn from_env() -> Result<Self> {
        Lakehouse::new(Settings::from_env())
    }

    /// Open a lakehouse on an existing storage handle.
    pub fn with_storage(storage: Storage, settings: Settings) -> Self {
        let tags = TagStore::new(storage.clone());
        let versions = VersionStore::new(storage.clone(), tags);
        Lakehouse {
            storage,
            settings,
            versions,
        }
    }

    /// The catalog root storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Get a dataset handle. The dataset need not exist yet; call
    /// [Dataset::ensure] to create it.
    pub fn get_dataset(&self, name: &str) -> Result<Dataset> {
        Dataset::open(&self.storage, name, &self.settings)
    }

    /// The names of all existing datasets (children with a `config.yml`).
    pub async fn dataset_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for prefix in self.storage.list_prefixes(None).await? {
            let candidate = prefix.trim_end_matches('/').to_string();
            if self
                .storage
                .exists(&format!("{candidate}/{}", path::CONFIG))
                .await?
            {
                names.push(candidate);
            }
        }
        Ok(names)
    }

    /// All existing datasets.
    pub async fn datasets(&self) -> Result<Vec<Dataset>> {
        let mut datasets = Vec::new();
        for name in self.dataset_names().await? {
            datasets.push(self.get_dataset(&name)?);
        }
        Ok(datasets)
    }

    /// Compose and write the versioned catalog `index.json` from the
    /// datasets' current indexes (falling back to their configuration for
    /// datasets that were never exported).
    pub async fn make_index(&self) -> Result<CatalogIndex> {
        let mut entries = Vec::new();
        for dataset in self.datasets().await? {
            let index: Option<DatasetIndex> = dataset
                .versions()
                .get_optional(path::INDEX)
                .await?;
            let entry = match index {
                Some(index) => index,
                None => DatasetIndex::from_config(&dataset.config().await?),
            };
            entries.push(entry);
        }
        let index = CatalogIndex {
            updated_at: Utc::now(),
            datasets: entries,
        };
        self.versions.make(path::INDEX, &index).await?;
        info!(datasets = index.datasets.len(), "wrote catalog index");
        Ok(index)
    }
}
