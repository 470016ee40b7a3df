/*!
The content-addressed blob archive: file bytes stored exactly once per
SHA-1 checksum, any number of metadata records pointing at them, plus
extracted-text and auxiliary-data sidecars.

```text
archive/<c0:2>/<c2:4>/<c4:6>/<checksum>/blob
archive/<c0:2>/<c2:4>/<c4:6>/<checksum>/<file_id>.json
archive/<c0:2>/<c2:4>/<c4:6>/<checksum>/<origin>.txt
```

Writes are write-once: when the blob is already present, re-ingestion is
a metadata-only operation. The metadata sidecar is written only after the
blob is fully committed.
*/

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::conventions::{path, tag};
use crate::error::{LakeError, Result};
use crate::model::file::File;
use crate::storage::object::{LocalPath, Storage};
use crate::storage::tags::TagStore;
use crate::util::{checksum_key, ChecksumWriter};

/// Extra metadata accepted by [ArchiveRepository::store].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Known content checksum, skipping recomputation.
    pub checksum: Option<String>,
    /// Provenance tag, defaults to `default`.
    pub origin: Option<String>,
    /// MIME type override.
    pub mimetype: Option<String>,
    /// Free-form extra metadata.
    pub extra: std::collections::BTreeMap<String, serde_json::Value>,
}

/// File archive operations for one dataset.
#[derive(Debug, Clone)]
pub struct ArchiveRepository {
    dataset: String,
    storage: Storage,
    tags: TagStore,
}

impl ArchiveRepository {
    /// Open the archive on a dataset's storage.
    pub fn new(dataset: &str, storage: Storage, tags: TagStore) -> Self {
        ArchiveRepository {
            dataset: dataset.to_string(),
            storage,
            tags,
        }
    }

    /// Whether the blob for a checksum exists.
    pub async fn exists(&self, checksum: &str) -> Result<bool> {
        let key = checksum_key(checksum)?;
        self.storage.exists(&path::archive_blob(&key)).await
    }

    /// Archive a file from a source store. The blob is streamed and its
    /// SHA-1 computed on the fly, short-circuiting when it is already
    /// archived; the metadata record is written per unique source path.
    /// Stamps `archive/last_updated`.
    pub async fn store(&self, source: &Storage, key: &str, opts: StoreOptions) -> Result<File> {
        let checksum = self.store_blob(source, key, opts.checksum.clone()).await?;
        let size = self.storage.size(&path::archive_blob(&checksum_key(&checksum)?)).await?;
        let now = Utc::now();
        let mut file = File {
            checksum,
            key: key.to_string(),
            path: source.to_uri(key),
            size,
            mimetype: opts
                .mimetype
                .unwrap_or_else(|| guess_mimetype(key).to_string()),
            dataset: self.dataset.clone(),
            origin: opts.origin.unwrap_or_else(|| tag::DEFAULT_ORIGIN.to_string()),
            created_at: now,
            updated_at: now,
            extra: opts.extra,
        };
        if let Some(existing) = self.get_file_optional(&file.checksum, Some(&file.file_id())).await? {
            file.created_at = existing.created_at;
        }
        self.put_file(&file).await?;
        self.tags.set(tag::ARCHIVE_UPDATED, None).await?;
        info!(
            dataset = %self.dataset,
            checksum = %file.checksum,
            key = %file.key,
            "archived file"
        );
        Ok(file)
    }

    /// Store the blob for a source key if it is not archived yet,
    /// returning its checksum. With a known checksum the source is not
    /// even opened when the blob exists.
    pub async fn store_blob(
        &self,
        source: &Storage,
        key: &str,
        checksum: Option<String>,
    ) -> Result<String> {
        if let Some(checksum) = &checksum {
            if self.exists(checksum).await? {
                debug!(checksum = %checksum, "blob already archived, skipping");
                return Ok(checksum.to_ascii_lowercase());
            }
        }
        // stream the source once, hashing while buffering
        let mut stream = source.stream(key).await?;
        let mut hasher = ChecksumWriter::new();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            buffer.extend_from_slice(&chunk);
        }
        let (computed, _) = hasher.finish();
        if let Some(expected) = &checksum {
            if !expected.eq_ignore_ascii_case(&computed) {
                return Err(LakeError::Corruption(format!(
                    "checksum mismatch for `{key}`: expected {expected}, got {computed}"
                )));
            }
        }
        if self.exists(&computed).await? {
            debug!(checksum = %computed, "blob already archived, skipping");
            return Ok(computed);
        }
        self.write_blob(Bytes::from(buffer), &computed).await?;
        Ok(computed)
    }

    /// Write blob bytes for a known checksum, verifying the digest.
    pub async fn write_blob(&self, data: Bytes, checksum: &str) -> Result<()> {
        let computed = crate::util::sha1_digest(&data);
        if !checksum.eq_ignore_ascii_case(&computed) {
            return Err(LakeError::Corruption(format!(
                "blob bytes hash to {computed}, not {checksum}"
            )));
        }
        let blob = path::archive_blob(&checksum_key(checksum)?);
        self.storage.put(&blob, data).await?;
        debug!(checksum, "stored blob");
        Ok(())
    }

    /// Persist a metadata record at its derived path.
    pub async fn put_file(&self, file: &File) -> Result<()> {
        let data = serde_json::to_vec(file)?;
        self.storage.put(&file.meta_path()?, Bytes::from(data)).await
    }

    /// One metadata record for a checksum: by file id when given,
    /// otherwise the first found. Fails with [LakeError::NotFound] when
    /// none exists.
    pub async fn get_file(&self, checksum: &str, file_id: Option<&str>) -> Result<File> {
        self.get_file_optional(checksum, file_id)
            .await?
            .ok_or_else(|| LakeError::NotFound(checksum.to_string()))
    }

    /// Like [ArchiveRepository::get_file], returning `None` when missing.
    pub async fn get_file_optional(
        &self,
        checksum: &str,
        file_id: Option<&str>,
    ) -> Result<Option<File>> {
        if let Some(file_id) = file_id {
            let key = path::archive_meta(&checksum_key(checksum)?, file_id);
            return match self.storage.get(&key).await {
                Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            };
        }
        Ok(self.get_all_files(checksum).await?.into_iter().next())
    }

    /// All metadata records for a checksum.
    pub async fn get_all_files(&self, checksum: &str) -> Result<Vec<File>> {
        let prefix = path::archive_prefix(&checksum_key(checksum)?);
        let mut files = Vec::new();
        for key in self.storage.iterate_keys(Some(&prefix), None, None).await? {
            if is_meta_key(&key) {
                let data = self.storage.get(&key).await?;
                files.push(serde_json::from_slice(&data)?);
            }
        }
        Ok(files)
    }

    /// Every metadata record in the archive.
    pub async fn iterate_files(&self) -> Result<Vec<File>> {
        let mut files = Vec::new();
        for key in self
            .storage
            .iterate_keys(Some(path::ARCHIVE), None, None)
            .await?
        {
            if is_meta_key(&key) {
                let data = self.storage.get(&key).await?;
                files.push(serde_json::from_slice(&data)?);
            }
        }
        Ok(files)
    }

    /// Stream blob contents.
    pub async fn stream(
        &self,
        checksum: &str,
    ) -> Result<futures::stream::BoxStream<'static, Result<Bytes>>> {
        let key = path::archive_blob(&checksum_key(checksum)?);
        self.storage.stream(&key).await
    }

    /// Fetch the whole blob.
    pub async fn open(&self, checksum: &str) -> Result<Bytes> {
        let key = path::archive_blob(&checksum_key(checksum)?);
        self.storage.get(&key).await
    }

    /// A scoped local path to the blob.
    pub async fn local_path(&self, checksum: &str) -> Result<LocalPath> {
        let key = path::archive_blob(&checksum_key(checksum)?);
        self.storage.local_path(&key).await
    }

    /// Remove a metadata record. The blob is never deleted; garbage
    /// collecting unreferenced blobs is an explicit separate sweep.
    pub async fn delete(&self, file: &File) -> Result<()> {
        warn!(
            checksum = %file.checksum,
            file_id = %file.file_id(),
            "deleting file metadata"
        );
        self.storage.delete(&file.meta_path()?).await
    }

    /// Store extracted text for a checksum, keyed by extraction origin.
    pub async fn put_txt(&self, checksum: &str, text: &str, origin: Option<&str>) -> Result<()> {
        let key = path::archive_txt(
            &checksum_key(checksum)?,
            origin.unwrap_or(tag::DEFAULT_ORIGIN),
        );
        self.storage
            .put(&key, Bytes::from(text.as_bytes().to_vec()))
            .await
    }

    /// Extracted text for a checksum: by origin when given, otherwise the
    /// first stored extraction.
    pub async fn get_txt(&self, checksum: &str, origin: Option<&str>) -> Result<Option<String>> {
        let prefix = checksum_key(checksum)?;
        if let Some(origin) = origin {
            let key = path::archive_txt(&prefix, origin);
            return match self.storage.get(&key).await {
                Ok(data) => Ok(Some(String::from_utf8_lossy(&data).to_string())),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            };
        }
        let keys = self
            .storage
            .iterate_keys(Some(&path::archive_prefix(&prefix)), Some("*.txt"), None)
            .await?;
        match keys.first() {
            Some(key) => {
                let data = self.storage.get(key).await?;
                Ok(Some(String::from_utf8_lossy(&data).to_string()))
            }
            None => Ok(None),
        }
    }

    /// Store an auxiliary artifact under the checksum directory.
    pub async fn put_data(&self, checksum: &str, subpath: &str, data: Bytes) -> Result<()> {
        let key = format!("{}/{subpath}", path::archive_prefix(&checksum_key(checksum)?));
        self.storage.put(&key, data).await
    }

    /// Fetch an auxiliary artifact.
    pub async fn get_data(&self, checksum: &str, subpath: &str) -> Result<Bytes> {
        let key = format!("{}/{subpath}", path::archive_prefix(&checksum_key(checksum)?));
        self.storage.get(&key).await
    }
}

fn is_meta_key(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .map(|name| name.starts_with("file-") && name.ends_with(".json"))
        .unwrap_or(false)
}

fn guess_mimetype(key: &str) -> &'static str {
    match key.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("pdf") => "application/pdf",
        Some("html") | Some("htm") => "text/html",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("eml") => "message/rfc822",
        _ => "application/octet-stream",
    }
}
