/*!
The [Document] row model of the `documents.csv` export: user-facing
metadata about archived files, compiled from `Document`-family entities in
the statement store.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};
use crate::model::entity::Entity;

/// One row of `documents.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Entity id of the document.
    pub id: String,
    /// Content checksum, usable to fetch the blob from the archive.
    pub checksum: String,
    /// File name.
    pub name: String,
    /// Slash-separated folder path, empty when no parent folder resolves.
    #[serde(default)]
    pub path: String,
    /// Content size in bytes.
    #[serde(default)]
    pub size: u64,
    /// MIME type.
    #[serde(default)]
    pub mimetype: String,
    /// Last time the underlying statements were seen.
    ///
    /// Kept non-skipping so CSV rows always carry all columns.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Optional public download URL.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Document {
    /// Build a document row from a `Document`-family entity. Fails with
    /// [LakeError::BadInput] when the entity has no `contentHash`.
    pub fn from_entity(entity: &Entity) -> Result<Self> {
        let checksum = entity.first("contentHash").ok_or_else(|| {
            LakeError::BadInput(format!("entity `{}` has no contentHash", entity.id))
        })?;
        Ok(Document {
            id: entity.id.clone(),
            checksum: checksum.to_string(),
            name: entity
                .first("fileName")
                .unwrap_or(entity.caption())
                .to_string(),
            path: String::new(),
            size: entity
                .first("fileSize")
                .and_then(|size| size.parse().ok())
                .unwrap_or_default(),
            mimetype: entity.first("mimeType").unwrap_or_default().to_string(),
            updated_at: entity.last_seen,
            public_url: None,
        })
    }

    /// The download path of this document: `<path>/<name>`, or just the
    /// name for documents without a folder.
    pub fn relative_path(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_entity() {
        let mut entity = Entity::new("file-1", "Pages");
        entity.add("contentHash", "5a6acf229ba576d9a40b09292595658bbb74ef56");
        entity.add("fileName", "report.pdf");
        entity.add("fileSize", "42");
        entity.add("mimeType", "application/pdf");
        let document = Document::from_entity(&entity).unwrap();
        assert_eq!(document.name, "report.pdf");
        assert_eq!(document.size, 42);
        assert_eq!(document.relative_path(), "report.pdf");
    }

    #[test]
    fn test_missing_checksum_is_bad_input() {
        let entity = Entity::new("file-1", "Pages");
        assert!(Document::from_entity(&entity).is_err());
    }

    #[test]
    fn test_relative_path_with_folder() {
        let mut entity = Entity::new("file-1", "Pages");
        entity.add("contentHash", "5a6acf229ba576d9a40b09292595658bbb74ef56");
        entity.add("fileName", "report.pdf");
        let mut document = Document::from_entity(&entity).unwrap();
        document.path = "projects/2024".to_string();
        assert_eq!(document.relative_path(), "projects/2024/report.pdf");
    }
}
