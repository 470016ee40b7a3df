/*!
Archive file metadata. The blob for a checksum is stored exactly once; any
number of [File] records may point to it, one per unique source path,
disambiguated by the [File::file_id].
*/

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::entity::Entity;
use crate::model::ontology;
use crate::util::{checksum_key, data_checksum};

/// Metadata for one archived file instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// Lowercase-hex SHA-1 of the file content.
    pub checksum: String,
    /// Source name (the key within the crawled source).
    pub key: String,
    /// Full source location the file was ingested from.
    pub path: String,
    /// Content size in bytes.
    pub size: u64,
    /// MIME type, detected or provided.
    pub mimetype: String,
    /// Owning dataset name.
    pub dataset: String,
    /// Provenance tag, e.g. `crawl`.
    pub origin: String,
    /// When this metadata record was first written.
    pub created_at: DateTime<Utc>,
    /// When this metadata record was last written.
    pub updated_at: DateTime<Utc>,
    /// Forward-compatible side channel for additional metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl File {
    /// The file id: `file-<hash(path, checksum)>`. This uniquely binds a
    /// source path to a content checksum, so metadata records never
    /// collide.
    pub fn file_id(&self) -> String {
        make_file_id(&self.path, &self.checksum)
    }

    /// Dataset-relative path of the blob.
    pub fn blob_path(&self) -> Result<String> {
        Ok(crate::conventions::path::archive_blob(&checksum_key(
            &self.checksum,
        )?))
    }

    /// Dataset-relative path of this metadata record.
    pub fn meta_path(&self) -> Result<String> {
        Ok(crate::conventions::path::archive_meta(
            &checksum_key(&self.checksum)?,
            &self.file_id(),
        ))
    }

    /// The file name component of the source key.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Create the document entity describing this file. The schema is
    /// derived from the MIME type.
    pub fn to_entity(&self) -> Entity {
        let mut entity = Entity::new(&self.file_id(), ontology::mime_to_schema(&self.mimetype));
        entity.add("contentHash", self.checksum.clone());
        entity.add("fileName", self.name().to_string());
        entity.add("fileSize", self.size.to_string());
        entity.add("mimeType", self.mimetype.clone());
        if let Some(parent) = parent_folder_id(&self.key) {
            entity.add("parent", parent);
        }
        entity
    }

    /// Create the document entity plus one `Folder` entity per path segment
    /// of the source key, linked through `parent` properties.
    pub fn make_entities(&self) -> Vec<Entity> {
        let mut entities = make_folders(&self.key);
        entities.push(self.to_entity());
        entities
    }
}

/// Compute a file id from a source path and content checksum.
pub fn make_file_id(path: &str, checksum: &str) -> String {
    format!("file-{}", data_checksum([path, checksum]))
}

/// Compute a folder id from its name and optional parent folder id.
pub fn make_folder_id(name: &str, parent_id: Option<&str>) -> String {
    match parent_id {
        Some(parent) => format!("folder-{}", data_checksum([parent, name])),
        None => format!("folder-{}", data_checksum([name])),
    }
}

/// Create a `Folder` entity.
pub fn make_folder(name: &str, parent_id: Option<&str>) -> Entity {
    let mut folder = Entity::new(&make_folder_id(name, parent_id), "Folder");
    folder.add("fileName", name.to_string());
    if let Some(parent) = parent_id {
        folder.add("parent", parent.to_string());
    }
    folder
}

/// Create the chain of `Folder` entities for the parent directories of a
/// source key, outermost first.
pub fn make_folders(key: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut parent_id: Option<String> = None;
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    for name in segments.iter().take(segments.len().saturating_sub(1)) {
        let folder = make_folder(name, parent_id.as_deref());
        parent_id = Some(folder.id.clone());
        entities.push(folder);
    }
    entities
}

/// The folder id of the immediate parent directory of a source key, if the
/// key has one.
pub fn parent_folder_id(key: &str) -> Option<String> {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    let mut parent_id: Option<String> = None;
    for name in segments.iter().take(segments.len() - 1) {
        parent_id = Some(make_folder_id(name, parent_id.as_deref()));
    }
    parent_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(key: &str) -> File {
        let now = Utc::now();
        File {
            checksum: "5a6acf229ba576d9a40b09292595658bbb74ef56".to_string(),
            key: key.to_string(),
            path: format!("file:///src/{key}"),
            size: 42,
            mimetype: "application/pdf".to_string(),
            dataset: "test".to_string(),
            origin: "crawl".to_string(),
            created_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_file_id_binds_path_and_checksum() {
        let a = file("src1/a.txt");
        let mut b = file("src1/a.txt");
        b.path = "file:///elsewhere/a.txt".to_string();
        assert_ne!(a.file_id(), b.file_id());
        assert!(a.file_id().starts_with("file-"));
    }

    #[test]
    fn test_paths() {
        let f = file("a.pdf");
        assert_eq!(
            f.blob_path().unwrap(),
            "archive/5a/6a/cf/5a6acf229ba576d9a40b09292595658bbb74ef56/blob"
        );
        assert!(f
            .meta_path()
            .unwrap()
            .ends_with(&format!("{}.json", f.file_id())));
    }

    #[test]
    fn test_to_entity() {
        let f = file("docs/report.pdf");
        let entity = f.to_entity();
        assert_eq!(entity.schema, "Pages");
        assert_eq!(entity.first("fileName"), Some("report.pdf"));
        assert_eq!(entity.first("contentHash"), Some(f.checksum.as_str()));
        assert!(entity.first("parent").is_some());
    }

    #[test]
    fn test_folder_chain() {
        let f = file("a/b/c.pdf");
        let entities = f.make_entities();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].schema, "Folder");
        assert_eq!(entities[0].first("fileName"), Some("a"));
        assert_eq!(entities[1].first("fileName"), Some("b"));
        assert_eq!(
            entities[1].first("parent"),
            Some(entities[0].id.as_str())
        );
        // document links to the innermost folder
        assert_eq!(
            entities[2].first("parent"),
            Some(entities[1].id.as_str())
        );
    }

    #[test]
    fn test_folder_ids_are_stable_per_level() {
        assert_eq!(make_folder_id("a", None), make_folder_id("a", None));
        assert_ne!(
            make_folder_id("b", Some("folder-x")),
            make_folder_id("b", Some("folder-y"))
        );
    }

    #[test]
    fn test_top_level_file_has_no_parent() {
        let f = file("report.pdf");
        assert!(f.to_entity().first("parent").is_none());
        assert!(f.make_entities().len() == 1);
    }
}
