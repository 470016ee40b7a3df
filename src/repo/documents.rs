/*!
The document repository: compiles `documents.csv`, a streamable list of
user-facing document metadata, from `Document`-family entities in the
statement table. Folder entities contribute slash-separated paths,
resolved by walking parent chains with cycle protection.
*/

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::conventions::path;
use crate::error::{LakeError, Result};
use crate::model::document::Document;
use crate::model::ontology;
use crate::repo::diff::DiffTarget;
use crate::storage::object::Storage;
use crate::storage::parquet::{Change, Query, StatementTable};

/// Document metadata operations for one dataset.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    dataset: String,
    storage: Storage,
    statements: StatementTable,
}

impl DocumentRepository {
    /// Open the repository on a dataset's storage.
    pub fn new(dataset: &str, storage: Storage) -> Self {
        let statements = StatementTable::new(storage.clone(), dataset);
        DocumentRepository {
            dataset: dataset.to_string(),
            storage,
            statements,
        }
    }

    pub(crate) fn statements(&self) -> &StatementTable {
        &self.statements
    }

    /// Resolve the folder graph into complete paths: folder id →
    /// slash-separated path. Cycles are broken with a visited set.
    pub async fn make_paths(&self) -> Result<BTreeMap<String, String>> {
        let query = Query::new().with_schema("Folder");
        let mut folders: BTreeMap<String, (String, Option<String>)> = BTreeMap::new();
        for folder in self.statements.query(&query).await? {
            let caption = folder.caption().to_string();
            let parent = folder.first("parent").map(str::to_string);
            folders.insert(folder.id.clone(), (caption, parent));
        }

        let mut paths = BTreeMap::new();
        for folder_id in folders.keys() {
            let mut parts: Vec<&str> = Vec::new();
            let mut current: Option<&String> = Some(folder_id);
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            while let Some(id) = current {
                if !seen.insert(id) {
                    break;
                }
                match folders.get(id) {
                    Some((caption, parent)) => {
                        parts.push(caption);
                        current = parent.as_ref();
                    }
                    None => break,
                }
            }
            parts.reverse();
            paths.insert(folder_id.clone(), parts.join("/"));
        }
        Ok(paths)
    }

    /// Collect document rows, ordered by checksum. Documents inherit their
    /// path from their parent folder; a document with no resolvable parent
    /// is emitted once with an empty path.
    pub async fn collect(
        &self,
        public_url_prefix: Option<&str>,
        entity_ids: Option<&BTreeSet<String>>,
    ) -> Result<Vec<Document>> {
        let paths = self.make_paths().await?;
        let mut query = Query::new().with_schemata(document_schemata());
        if let Some(ids) = entity_ids {
            query = query.with_entity_ids(ids.iter().cloned());
        }

        let mut documents = Vec::new();
        for entity in self.statements.query(&query).await? {
            if ontology::is_folder(&entity.schema) {
                continue;
            }
            let mut document = match Document::from_entity(&entity) {
                Ok(document) => document,
                Err(LakeError::BadInput(reason)) => {
                    debug!(entity = %entity.id, %reason, "skipping document entity");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(prefix) = public_url_prefix {
                let blob = path::archive_blob(&crate::util::checksum_key(&document.checksum)?);
                document.public_url =
                    Some(format!("{}/{blob}", prefix.trim_end_matches('/')));
            }
            let mut emitted = false;
            for parent in entity.get("parent") {
                if let Some(folder_path) = paths.get(parent) {
                    if !folder_path.is_empty() {
                        let mut instance = document.clone();
                        instance.path = folder_path.clone();
                        documents.push(instance);
                        emitted = true;
                    }
                }
            }
            if !emitted {
                documents.push(document);
            }
        }
        documents.sort_by(|a, b| {
            (&a.checksum, &a.path, &a.name).cmp(&(&b.checksum, &b.path, &b.name))
        });
        Ok(documents)
    }

    /// Write `exports/documents.csv`. Returns the number of rows.
    pub async fn export_csv(&self, public_url_prefix: Option<&str>) -> Result<u64> {
        let documents = self.collect(public_url_prefix, None).await?;
        let data = write_documents_csv(&documents)?;
        self.storage
            .put(path::EXPORTS_DOCUMENTS, Bytes::from(data))
            .await?;
        info!(
            dataset = %self.dataset,
            count = documents.len(),
            "exported documents csv"
        );
        Ok(documents.len() as u64)
    }

    /// Read the current `exports/documents.csv`.
    pub async fn stream(&self) -> Result<Vec<Document>> {
        let data = self.storage.get(path::EXPORTS_DOCUMENTS).await?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(data.as_ref());
        let mut documents = Vec::new();
        for row in reader.deserialize() {
            documents.push(row?);
        }
        Ok(documents)
    }
}

/// Schemata of the document family, excluding nothing: the `Folder`
/// filter happens after assembly, because folders are needed for paths.
fn document_schemata() -> Vec<&'static str> {
    vec![
        "Document",
        "Pages",
        "HyperText",
        "Table",
        "Workbook",
        "Image",
        "Video",
        "Audio",
        "Email",
        "PlainText",
        "Package",
        "Folder",
    ]
}

pub(crate) fn write_documents_csv(documents: &[Document]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for document in documents {
        writer.serialize(document)?;
    }
    writer
        .into_inner()
        .map_err(|e| LakeError::Serde(e.to_string()))
}

#[async_trait]
impl DiffTarget for DocumentRepository {
    fn diff_base(&self) -> &'static str {
        path::DIFFS_DOCUMENTS
    }

    /// Only `contentHash` changes on non-folder document entities trigger
    /// a document diff; origin-only changes do not.
    fn filter_changes(&self, changes: &[Change]) -> BTreeSet<String> {
        changes
            .iter()
            .filter(|change| {
                let stmt = &change.statement;
                ontology::is_document(&stmt.schema)
                    && !ontology::is_folder(&stmt.schema)
                    && stmt.prop == "contentHash"
            })
            .map(|change| change.statement.canonical_id.clone())
            .collect()
    }

    async fn write_initial_diff(&self, version: i64, ts: &DateTime<Utc>) -> Result<String> {
        if !self.storage.exists(path::EXPORTS_DOCUMENTS).await? {
            debug!("exporting documents.csv first to seed the initial diff");
            self.export_csv(None).await?;
        }
        let data = self.storage.get(path::EXPORTS_DOCUMENTS).await?;
        let key = path::documents_diff(version, ts);
        self.storage.put(&key, data).await?;
        Ok(key)
    }

    async fn write_diff(
        &self,
        entity_ids: &BTreeSet<String>,
        version: i64,
        ts: &DateTime<Utc>,
    ) -> Result<String> {
        let documents = self.collect(None, Some(entity_ids)).await?;
        let data = write_documents_csv(&documents)?;
        let key = path::documents_diff(version, ts);
        self.storage.put(&key, Bytes::from(data)).await?;
        Ok(key)
    }
}
