/*!
Dataset configuration (`config.yml`), the generated dataset index
(`index.json`) and its resource entries, and the catalog index composed
over multiple datasets.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::stats::DatasetStats;

/// User-editable dataset configuration, stored as `config.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset name (also known as the foreign id).
    pub name: String,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Public URL prefix override for this dataset's resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url_prefix: Option<String>,
}

impl DatasetConfig {
    /// A minimal configuration for a dataset name.
    pub fn new(name: &str) -> Self {
        DatasetConfig {
            name: name.to_string(),
            title: None,
            summary: None,
            public_url_prefix: None,
        }
    }

    /// Merge non-empty fields of `patch` over this configuration.
    pub fn patch(&mut self, patch: DatasetConfigPatch) {
        if let Some(title) = patch.title {
            self.title = Some(title);
        }
        if let Some(summary) = patch.summary {
            self.summary = Some(summary);
        }
        if let Some(prefix) = patch.public_url_prefix {
            self.public_url_prefix = Some(prefix);
        }
    }
}

/// Partial configuration update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfigPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// New public URL prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url_prefix: Option<String>,
}

/// One downloadable resource listed in `index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResource {
    /// Resource file name, e.g. `entities.ftm.json`.
    pub name: String,
    /// Dataset-relative location.
    pub url: String,
    /// Public download URL, when a public prefix is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// MIME type of the resource.
    pub mime_type: String,
    /// Size in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Generated dataset catalog entry, stored as `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetIndex {
    /// Dataset name.
    pub name: String,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// When the index was generated.
    pub updated_at: DateTime<Utc>,
    /// Exported resources.
    #[serde(default)]
    pub resources: Vec<DataResource>,
    /// Dataset statistics, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<DatasetStats>,
}

impl DatasetIndex {
    /// Start an index from a configuration.
    pub fn from_config(config: &DatasetConfig) -> Self {
        DatasetIndex {
            name: config.name.clone(),
            title: config.title.clone(),
            summary: config.summary.clone(),
            updated_at: Utc::now(),
            resources: Vec::new(),
            statistics: None,
        }
    }
}

/// Catalog index over all datasets of a lakehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndex {
    /// When the catalog index was generated.
    pub updated_at: DateTime<Utc>,
    /// Per-dataset indexes.
    #[serde(default)]
    pub datasets: Vec<DatasetIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_yaml_round_trip() {
        let mut config = DatasetConfig::new("acme");
        config.title = Some("ACME Papers".to_string());
        let data = serde_yaml::to_string(&config).unwrap();
        let parsed: DatasetConfig = serde_yaml::from_str(&data).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_patch() {
        let mut config = DatasetConfig::new("acme");
        config.patch(DatasetConfigPatch {
            title: Some("ACME Papers".to_string()),
            ..Default::default()
        });
        assert_eq!(config.title.as_deref(), Some("ACME Papers"));
        assert_eq!(config.name, "acme");
    }

    #[test]
    fn test_index_from_config() {
        let config = DatasetConfig::new("acme");
        let index = DatasetIndex::from_config(&config);
        assert_eq!(index.name, "acme");
        assert!(index.resources.is_empty());
    }
}
