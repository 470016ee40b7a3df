/*!
A uniform key-value interface over pluggable [ObjectStore] backends: local
filesystem, in-memory, S3-compatible object storage and read-only HTTP.

`put` is atomic at object granularity: concurrent writers to the same key
pick one winner and readers never observe a torn object. Transient backend
failures are retried with bounded exponential backoff here and nowhere
else.
*/

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use glob::Pattern;
use object_store::http::HttpBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::{aws::AmazonS3Builder, ObjectStore, PutMode, PutOptions, PutPayload};
use tracing::debug;

use crate::error::{LakeError, Result};
use crate::util::sha1_digest;

/// Retry attempts for transient backend failures.
const RETRY_ATTEMPTS: u32 = 3;

/// Initial retry backoff; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Backend flavour, used to decide what is locally cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Local,
    Memory,
    S3,
    Http,
}

/// Uniform object storage handle, cheap to clone.
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn ObjectStore>,
    backend: Backend,
    local_root: Option<PathBuf>,
    uri: String,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("uri", &self.uri).finish()
    }
}

impl Storage {
    /// Open storage for a URI. Plain paths and `file://` URIs use the local
    /// filesystem (created if missing), `memory://` an in-process store,
    /// `s3://` an S3-compatible backend configured from the environment and
    /// `http(s)://` a read-only HTTP backend.
    pub fn open(uri: &str) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix("memory://") {
            let storage = Storage::memory();
            if rest.is_empty() {
                return Ok(storage);
            }
            return Ok(storage.child(rest));
        }
        if uri.starts_with("s3://") {
            let store = AmazonS3Builder::from_env().with_url(uri).build()?;
            return Ok(Storage {
                store: Arc::new(store),
                backend: Backend::S3,
                local_root: None,
                uri: uri.to_string(),
            });
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let store = HttpBuilder::new().with_url(uri).build()?;
            return Ok(Storage {
                store: Arc::new(store),
                backend: Backend::Http,
                local_root: None,
                uri: uri.to_string(),
            });
        }
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let root = PathBuf::from(path);
        std::fs::create_dir_all(&root)?;
        let store = LocalFileSystem::new_with_prefix(&root)?;
        Ok(Storage {
            store: Arc::new(store),
            backend: Backend::Local,
            local_root: Some(root),
            uri: uri.to_string(),
        })
    }

    /// An in-process store, mainly for tests.
    pub fn memory() -> Self {
        Storage {
            store: Arc::new(InMemory::new()),
            backend: Backend::Memory,
            local_root: None,
            uri: "memory://".to_string(),
        }
    }

    /// A storage handle scoped to a sub-prefix, sharing the same backend.
    pub fn child(&self, prefix: &str) -> Storage {
        let store = PrefixStore::new(Arc::clone(&self.store), Path::from(prefix));
        Storage {
            store: Arc::new(store),
            backend: self.backend,
            local_root: self.local_root.as_ref().map(|root| root.join(prefix)),
            uri: join_uri(&self.uri, prefix),
        }
    }

    /// The URI this storage was opened with.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The full URI of a key within this storage.
    pub fn to_uri(&self, key: &str) -> String {
        join_uri(&self.uri, key)
    }

    /// True when backed by the local filesystem.
    pub fn is_local(&self) -> bool {
        self.backend == Backend::Local
    }

    /// Check whether a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// The size of an object in bytes.
    pub async fn size(&self, key: &str) -> Result<u64> {
        let meta = self.store.head(&Path::from(key)).await?;
        Ok(meta.size as u64)
    }

    /// Fetch an object. Fails with [LakeError::NotFound] when missing.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let path = Path::from(key);
        self.retrying(|| async {
            let result = self.store.get(&path).await?;
            result.bytes().await
        })
        .await
    }

    /// Write an object, replacing any previous value.
    pub async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = Path::from(key);
        self.retrying(|| async {
            self.store
                .put(&path, PutPayload::from(data.clone()))
                .await
                .map(|_| ())
        })
        .await
    }

    /// Write an object only if the key does not exist yet. Fails with
    /// [LakeError::Conflict] when it does.
    pub async fn put_new(&self, key: &str, data: Bytes) -> Result<()> {
        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        self.store
            .put_opts(&Path::from(key), PutPayload::from(data), options)
            .await?;
        Ok(())
    }

    /// Atomically publish `data` at `key` by writing a temporary object and
    /// renaming it, failing with [LakeError::Conflict] if `key` appeared
    /// concurrently.
    pub async fn put_if_absent(&self, key: &str, temp_key: &str, data: Bytes) -> Result<()> {
        let temp = Path::from(temp_key);
        let target = Path::from(key);
        self.store.put(&temp, PutPayload::from(data)).await?;
        let outcome = self.store.copy_if_not_exists(&temp, &target).await;
        self.store.delete(&temp).await.ok();
        outcome.map_err(LakeError::from)
    }

    /// Stream an object's bytes.
    pub async fn stream(&self, key: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let result = self.store.get(&Path::from(key)).await?;
        Ok(result.into_stream().map_err(LakeError::from).boxed())
    }

    /// Delete an object. Deleting a missing key is a no-op.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&Path::from(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Copy an object within this storage.
    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.store
            .copy(&Path::from(from), &Path::from(to))
            .await?;
        Ok(())
    }

    /// List keys under a prefix, optionally filtered by include and exclude
    /// globs. Finite and lazily paged by the backend.
    pub async fn iterate_keys(
        &self,
        prefix: Option<&str>,
        include_glob: Option<&str>,
        exclude_glob: Option<&str>,
    ) -> Result<Vec<String>> {
        let include = compile_glob(include_glob)?;
        let exclude = compile_glob(exclude_glob)?;
        let path = prefix.map(Path::from);
        let mut keys: Vec<String> = self
            .store
            .list(path.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.retain(|key| {
            include.as_ref().map(|p| p.matches(key)).unwrap_or(true)
                && !exclude.as_ref().map(|p| p.matches(key)).unwrap_or(false)
        });
        keys.sort();
        Ok(keys)
    }

    /// List the immediate child prefixes of a prefix (directory listing).
    pub async fn list_prefixes(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let path = prefix.map(Path::from);
        let listing = self.store.list_with_delimiter(path.as_ref()).await?;
        let mut prefixes: Vec<String> = listing
            .common_prefixes
            .into_iter()
            .map(|p| p.to_string())
            .collect();
        prefixes.sort();
        Ok(prefixes)
    }

    /// A local path for the object: direct on the local filesystem,
    /// otherwise a temporary download that is removed when the returned
    /// guard is dropped.
    pub async fn local_path(&self, key: &str) -> Result<LocalPath> {
        if let Some(root) = &self.local_root {
            let path = root.join(key);
            if !path.exists() {
                return Err(LakeError::NotFound(key.to_string()));
            }
            return Ok(LocalPath { path, _temp: None });
        }
        let data = self.get(key).await?;
        let dir = tempfile::tempdir()?;
        let name = key.rsplit('/').next().unwrap_or("blob");
        let path = dir.path().join(name);
        std::fs::write(&path, &data)?;
        Ok(LocalPath {
            path,
            _temp: Some(dir),
        })
    }

    /// The SHA-1 checksum of an object, where locally cheap. Returns `None`
    /// on remote backends.
    pub async fn checksum(&self, key: &str) -> Result<Option<String>> {
        match self.backend {
            Backend::Local | Backend::Memory => {
                let data = self.get(key).await?;
                Ok(Some(sha1_digest(&data)))
            }
            _ => Ok(None),
        }
    }

    async fn retrying<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = object_store::Result<T>>,
    {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt < RETRY_ATTEMPTS => {
                    debug!(attempt, error = %err, "retrying object store call");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// A scoped local path handle, releasing any temporary download on drop.
pub struct LocalPath {
    path: PathBuf,
    _temp: Option<tempfile::TempDir>,
}

impl LocalPath {
    /// The local filesystem path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn is_transient(err: &object_store::Error) -> bool {
    matches!(
        err,
        object_store::Error::Generic { .. } | object_store::Error::JoinError { .. }
    )
}

fn compile_glob(pattern: Option<&str>) -> Result<Option<Pattern>> {
    match pattern {
        Some(pattern) => Pattern::new(pattern)
            .map(Some)
            .map_err(|e| LakeError::BadInput(format!("invalid glob `{pattern}`: {e}"))),
        None => Ok(None),
    }
}

fn join_uri(base: &str, child: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), child.trim_matches('/'))
}
