/*!
The transaction log of the statement table: one JSON entry per committed
version under `entities/statements/_delta_log/`, carrying add/remove file
actions. Commits are serialised through an atomic object-store rename of
the next entry; the loser of a race observes [LakeError::Conflict] and
does not retry here.

Readers replay the log into a [Snapshot] of active files; a reader either
sees version `v` or version `v+1` in its entirety.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conventions::path;
use crate::error::{LakeError, Result};
use crate::storage::object::Storage;

/// What kind of commit produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOperation {
    /// New data files were added.
    Write,
    /// Small files were compacted; no data change.
    Optimize,
}

/// One parquet data file tracked by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Dataset-relative object path.
    pub path: String,
    /// Bucket partition value.
    pub bucket: String,
    /// Origin partition value.
    pub origin: String,
    /// Row count.
    pub rows: u64,
    /// File size in bytes.
    pub size: u64,
}

/// An add or remove action within a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// The file becomes part of the table.
    AddFile(FileEntry),
    /// The file leaves the table (still present until vacuumed).
    RemoveFile(FileEntry),
}

/// One committed version of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Version number, starting at 0.
    pub version: i64,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// Commit kind.
    pub operation: LogOperation,
    /// File actions of this commit.
    pub actions: Vec<Action>,
}

/// The set of active files at a version.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// The version this snapshot was replayed to, `None` for an empty
    /// table.
    pub version: Option<i64>,
    /// Active data files, in commit order.
    pub files: Vec<FileEntry>,
}

/// Log reader/writer bound to a dataset's storage.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    storage: Storage,
}

impl TransactionLog {
    /// Open the log on a dataset's storage.
    pub fn new(storage: Storage) -> Self {
        TransactionLog { storage }
    }

    /// The most recent committed version, `None` when the table is empty.
    pub async fn version(&self) -> Result<Option<i64>> {
        Ok(self.versions().await?.into_iter().max())
    }

    /// All committed versions, ascending.
    pub async fn versions(&self) -> Result<Vec<i64>> {
        let prefix = format!("{}/{}", path::STATEMENTS, path::DELTA_LOG);
        let keys = self.storage.iterate_keys(Some(&prefix), None, None).await?;
        let mut versions: Vec<i64> = keys
            .iter()
            .filter_map(|key| parse_entry_version(key))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Read one log entry.
    pub async fn read(&self, version: i64) -> Result<LogEntry> {
        let data = self.storage.get(&path::delta_log_entry(version)).await?;
        let entry: LogEntry = serde_json::from_slice(&data)
            .map_err(|e| LakeError::Corruption(format!("log entry {version}: {e}")))?;
        if entry.version != version {
            return Err(LakeError::Corruption(format!(
                "log entry {version} claims version {}",
                entry.version
            )));
        }
        Ok(entry)
    }

    /// Read the inclusive range of log entries between two versions.
    pub async fn entries(&self, from: i64, to: i64) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for version in self.versions().await? {
            if version >= from && version <= to {
                entries.push(self.read(version).await?);
            }
        }
        Ok(entries)
    }

    /// Commit the next version. The entry's version must be exactly one
    /// past the current head; a concurrent committer to the same version
    /// loses with [LakeError::Conflict].
    pub async fn commit(&self, entry: &LogEntry) -> Result<()> {
        let data = serde_json::to_vec(entry)?;
        let target = path::delta_log_entry(entry.version);
        let temp = format!(
            "{}/{}/_tmp-{}.json",
            path::STATEMENTS,
            path::DELTA_LOG,
            Uuid::new_v4()
        );
        self.storage
            .put_if_absent(&target, &temp, bytes::Bytes::from(data))
            .await
    }

    /// Replay the log into the set of active files, up to and including
    /// `at` (or the head when `None`).
    pub async fn snapshot(&self, at: Option<i64>) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();
        for version in self.versions().await? {
            if let Some(limit) = at {
                if version > limit {
                    break;
                }
            }
            let entry = self.read(version).await?;
            for action in entry.actions {
                match action {
                    Action::AddFile(file) => snapshot.files.push(file),
                    Action::RemoveFile(file) => {
                        snapshot.files.retain(|active| active.path != file.path)
                    }
                }
            }
            snapshot.version = Some(version);
        }
        Ok(snapshot)
    }
}

fn parse_entry_version(key: &str) -> Option<i64> {
    let name = key.rsplit('/').next()?;
    let digits = name.strip_suffix(".json")?;
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_entry(name: &str) -> FileEntry {
        FileEntry {
            path: format!("entities/statements/bucket=thing/origin=default/{name}"),
            bucket: "thing".to_string(),
            origin: "default".to_string(),
            rows: 1,
            size: 100,
        }
    }

    fn entry(version: i64, operation: LogOperation, actions: Vec<Action>) -> LogEntry {
        LogEntry {
            version,
            timestamp: Utc::now(),
            operation,
            actions,
        }
    }

    fn log() -> TransactionLog {
        TransactionLog::new(Storage::memory())
    }

    #[tokio::test]
    async fn test_empty_log() {
        let log = log();
        assert_eq!(log.version().await.unwrap(), None);
        let snapshot = log.snapshot(None).await.unwrap();
        assert!(snapshot.version.is_none());
        assert!(snapshot.files.is_empty());
    }

    #[tokio::test]
    async fn test_commit_and_replay() {
        let log = log();
        log.commit(&entry(
            0,
            LogOperation::Write,
            vec![Action::AddFile(file_entry("a.parquet"))],
        ))
        .await
        .unwrap();
        log.commit(&entry(
            1,
            LogOperation::Write,
            vec![Action::AddFile(file_entry("b.parquet"))],
        ))
        .await
        .unwrap();

        assert_eq!(log.version().await.unwrap(), Some(1));
        let snapshot = log.snapshot(None).await.unwrap();
        assert_eq!(snapshot.version, Some(1));
        assert_eq!(snapshot.files.len(), 2);

        // pinned snapshot
        let snapshot = log.snapshot(Some(0)).await.unwrap();
        assert_eq!(snapshot.files.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commit_loses() {
        let log = log();
        let first = entry(0, LogOperation::Write, vec![]);
        log.commit(&first).await.unwrap();
        let err = log.commit(&first).await.unwrap_err();
        assert!(matches!(err, LakeError::Conflict(_)));
        // the temp object does not linger
        let keys = log
            .storage
            .iterate_keys(Some("entities/statements/_delta_log"), None, None)
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn test_compaction_swaps_files() {
        let log = log();
        log.commit(&entry(
            0,
            LogOperation::Write,
            vec![
                Action::AddFile(file_entry("a.parquet")),
                Action::AddFile(file_entry("b.parquet")),
            ],
        ))
        .await
        .unwrap();
        log.commit(&entry(
            1,
            LogOperation::Optimize,
            vec![
                Action::RemoveFile(file_entry("a.parquet")),
                Action::RemoveFile(file_entry("b.parquet")),
                Action::AddFile(file_entry("c.parquet")),
            ],
        ))
        .await
        .unwrap();
        let snapshot = log.snapshot(None).await.unwrap();
        assert_eq!(snapshot.files.len(), 1);
        assert!(snapshot.files[0].path.ends_with("c.parquet"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_detected() {
        let log = log();
        log.storage
            .put(
                &path::delta_log_entry(0),
                bytes::Bytes::from_static(b"not json"),
            )
            .await
            .unwrap();
        let err = log.read(0).await.unwrap_err();
        assert!(matches!(err, LakeError::Corruption(_)));
    }

    #[test]
    fn test_parse_entry_version() {
        assert_eq!(
            parse_entry_version("entities/statements/_delta_log/00000000000000000003.json"),
            Some(3)
        );
        assert_eq!(
            parse_entry_version("entities/statements/_delta_log/_tmp-abc.json"),
            None
        );
        assert_eq!(parse_entry_version("whatever.txt"), None);
    }
}
