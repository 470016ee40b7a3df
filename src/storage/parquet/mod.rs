/*!
The partitioned columnar statement store: parquet data files laid out as

```text
entities/statements/bucket=<b>/origin=<o>/part-<uuid>.parquet
entities/statements/_delta_log/<version>.json
```

with a [transaction log](log) providing versioning, snapshot reads, change
data capture and compaction. Writes never mutate an existing parquet file
in place; compaction replaces small files by writing new ones and
recording the swap as a single commit.
*/

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use chrono::Utc;
use itertools::Itertools;
use lazy_static::lazy_static;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::info;
use uuid::Uuid;

use crate::conventions::path;
use crate::error::{LakeError, Result};
use crate::model::statement::{Statement, CSV_COLUMNS};
use crate::model::stats::{DatasetStats, StatsReducer};
use crate::storage::object::Storage;
use crate::util;

pub mod cdc;
pub mod log;
pub mod scan;
pub mod writer;

pub use cdc::{Change, ChangeType};
pub use log::{Action, FileEntry, LogEntry, LogOperation, Snapshot, TransactionLog};
pub use scan::Query;
pub use writer::TableWriter;

lazy_static! {
    /// Arrow schema of a statement data file.
    pub static ref STATEMENT_SCHEMA: SchemaRef = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("entity_id", DataType::Utf8, false),
        Field::new("canonical_id", DataType::Utf8, false),
        Field::new("schema", DataType::Utf8, false),
        Field::new("prop", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("dataset", DataType::Utf8, false),
        Field::new("lang", DataType::Utf8, true),
        Field::new("origin", DataType::Utf8, false),
        Field::new("external", DataType::Boolean, false),
        Field::new("first_seen", DataType::Utf8, false),
        Field::new("last_seen", DataType::Utf8, false),
    ]));
}

/// Options for [StatementTable::optimize].
#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    /// Also delete the objects of files removed from the log.
    pub vacuum: bool,
    /// Hours of removed-file history to retain when vacuuming.
    pub keep_hours: i64,
    /// Restrict compaction to one bucket partition.
    pub bucket: Option<String>,
    /// Restrict compaction to one origin partition.
    pub origin: Option<String>,
}

/// Outcome of a compaction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Partitions that were compacted.
    pub compacted_partitions: u64,
    /// Data files replaced.
    pub files_removed: u64,
    /// Data files written.
    pub files_written: u64,
    /// Backing objects deleted by vacuum.
    pub objects_deleted: u64,
}

/// The partitioned, versioned statement table of one dataset.
#[derive(Debug, Clone)]
pub struct StatementTable {
    storage: Storage,
    dataset: String,
    log: TransactionLog,
}

impl StatementTable {
    /// Open the table on a dataset's storage.
    pub fn new(storage: Storage, dataset: &str) -> Self {
        let log = TransactionLog::new(storage.clone());
        StatementTable {
            storage,
            dataset: dataset.to_string(),
            log,
        }
    }

    /// The dataset this table belongs to.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// The transaction log.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The most recent committed version, `None` when empty.
    pub async fn version(&self) -> Result<Option<i64>> {
        self.log.version().await
    }

    /// A buffering writer; each [TableWriter::flush] produces one commit.
    pub fn writer(&self, origin: Option<&str>) -> TableWriter {
        TableWriter::new(self.clone(), origin)
    }

    /// Read one data file back into statements.
    pub(crate) async fn read_file(&self, entry: &FileEntry) -> Result<Vec<Statement>> {
        let data = self.storage.get(&entry.path).await?;
        decode_statements(data)
    }

    /// Stream all statements ordered on `(canonical_id, prop, value,
    /// origin)` and de-duplicated on id into one CSV object. Byte-stable
    /// for a fixed statement set.
    pub async fn export_csv(&self, out_key: &str) -> Result<u64> {
        let statements = self.query_statements(&Query::new()).await?;
        let mut rows: Vec<&Statement> = statements.iter().collect();
        rows.sort_by(|a, b| {
            (&a.canonical_id, &a.prop, &a.value, &a.origin, &a.id)
                .cmp(&(&b.canonical_id, &b.prop, &b.value, &b.origin, &b.id))
        });

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(CSV_COLUMNS)
            .map_err(LakeError::from)?;
        for stmt in &rows {
            writer.write_record(&stmt.to_csv_record())?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| LakeError::Serde(e.to_string()))?;
        self.storage.put(out_key, Bytes::from(data)).await?;
        info!(
            dataset = %self.dataset,
            count = rows.len(),
            key = out_key,
            "exported statements csv"
        );
        Ok(rows.len() as u64)
    }

    /// Compute dataset statistics from a full statement scan.
    pub async fn stats(&self) -> Result<DatasetStats> {
        let mut reducer = StatsReducer::new();
        for stmt in self.query_statements(&Query::new()).await? {
            reducer.add(&stmt);
        }
        Ok(reducer.finish())
    }

    /// Compact small files into one file per partition. With
    /// `opts.vacuum`, also delete the backing objects of files removed
    /// from the log longer than `opts.keep_hours` ago.
    pub async fn optimize(&self, opts: &OptimizeOptions) -> Result<OptimizeReport> {
        let mut report = OptimizeReport::default();
        let snapshot = self.log.snapshot(None).await?;
        let mut actions: Vec<Action> = Vec::new();

        let groups = snapshot
            .files
            .iter()
            .filter(|file| {
                opts.bucket.as_deref().map(|b| file.bucket == b).unwrap_or(true)
                    && opts.origin.as_deref().map(|o| file.origin == o).unwrap_or(true)
            })
            .into_group_map_by(|file| (file.bucket.clone(), file.origin.clone()));

        for ((bucket, origin), files) in groups.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            if files.len() < 2 {
                continue;
            }
            let mut statements = Vec::new();
            for file in &files {
                statements.extend(self.read_file(file).await?);
            }
            let statements = scan::dedupe_statements(statements);
            let entry = write_partition_file(&self.storage, &bucket, &origin, &statements).await?;
            report.compacted_partitions += 1;
            report.files_removed += files.len() as u64;
            report.files_written += 1;
            for file in files {
                actions.push(Action::RemoveFile(file.clone()));
            }
            actions.push(Action::AddFile(entry));
        }

        if !actions.is_empty() {
            let version = snapshot.version.map(|v| v + 1).unwrap_or(0);
            self.log
                .commit(&LogEntry {
                    version,
                    timestamp: Utc::now(),
                    operation: LogOperation::Optimize,
                    actions,
                })
                .await?;
            info!(
                dataset = %self.dataset,
                partitions = report.compacted_partitions,
                "compacted statement store"
            );
        }

        if opts.vacuum {
            report.objects_deleted = self.vacuum(opts.keep_hours).await?;
        }
        Ok(report)
    }

    /// Delete objects of removed files whose removing commit is older than
    /// `keep_hours`.
    async fn vacuum(&self, keep_hours: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours);
        let head = match self.log.version().await? {
            Some(version) => version,
            None => return Ok(0),
        };
        let active: std::collections::HashSet<String> = self
            .log
            .snapshot(None)
            .await?
            .files
            .into_iter()
            .map(|file| file.path)
            .collect();
        let mut deleted = 0;
        for entry in self.log.entries(0, head).await? {
            if entry.timestamp > cutoff {
                continue;
            }
            for action in entry.actions {
                if let Action::RemoveFile(file) = action {
                    if !active.contains(&file.path) && self.storage.exists(&file.path).await? {
                        self.storage.delete(&file.path).await?;
                        deleted += 1;
                    }
                }
            }
        }
        Ok(deleted)
    }

    /// Irreversibly delete all parquet files and the transaction log.
    pub async fn destroy(&self) -> Result<()> {
        let keys = self
            .storage
            .iterate_keys(Some(path::STATEMENTS), None, None)
            .await?;
        for key in keys {
            self.storage.delete(&key).await?;
        }
        info!(dataset = %self.dataset, "destroyed statement store");
        Ok(())
    }
}

/// Write one partition's statements as a new parquet data file and return
/// its log entry. No log commit happens here.
pub(crate) async fn write_partition_file(
    storage: &Storage,
    bucket: &str,
    origin: &str,
    statements: &[Statement],
) -> Result<FileEntry> {
    let data = encode_statements(statements)?;
    let size = data.len() as u64;
    let key = format!(
        "{}/part-{}.parquet",
        path::statement_partition(bucket, origin),
        Uuid::new_v4()
    );
    storage.put(&key, Bytes::from(data)).await?;
    Ok(FileEntry {
        path: key,
        bucket: bucket.to_string(),
        origin: origin.to_string(),
        rows: statements.len() as u64,
        size,
    })
}

/// Encode statements into parquet bytes.
pub(crate) fn encode_statements(statements: &[Statement]) -> Result<Vec<u8>> {
    let batch = statements_to_batch(statements)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, STATEMENT_SCHEMA.clone(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(buffer)
}

/// Decode parquet bytes back into statements.
pub(crate) fn decode_statements(data: Bytes) -> Result<Vec<Statement>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)?.build()?;
    let mut statements = Vec::new();
    for batch in reader {
        let batch = batch?;
        statements.extend(batch_to_statements(&batch)?);
    }
    Ok(statements)
}

fn statements_to_batch(statements: &[Statement]) -> Result<RecordBatch> {
    fn strings<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
        Arc::new(StringArray::from_iter_values(values)) as ArrayRef
    }
    let columns: Vec<ArrayRef> = vec![
        strings(statements.iter().map(|s| s.id.as_str())),
        strings(statements.iter().map(|s| s.entity_id.as_str())),
        strings(statements.iter().map(|s| s.canonical_id.as_str())),
        strings(statements.iter().map(|s| s.schema.as_str())),
        strings(statements.iter().map(|s| s.prop.as_str())),
        strings(statements.iter().map(|s| s.value.as_str())),
        strings(statements.iter().map(|s| s.dataset.as_str())),
        Arc::new(
            statements
                .iter()
                .map(|s| s.lang.as_deref())
                .collect::<StringArray>(),
        ) as ArrayRef,
        strings(statements.iter().map(|s| s.origin.as_str())),
        Arc::new(BooleanArray::from(
            statements.iter().map(|s| s.external).collect::<Vec<bool>>(),
        )) as ArrayRef,
        Arc::new(StringArray::from_iter_values(
            statements.iter().map(|s| util::format_stmt_ts(&s.first_seen)),
        )) as ArrayRef,
        Arc::new(StringArray::from_iter_values(
            statements.iter().map(|s| util::format_stmt_ts(&s.last_seen)),
        )) as ArrayRef,
    ];
    Ok(RecordBatch::try_new(STATEMENT_SCHEMA.clone(), columns)?)
}

fn batch_to_statements(batch: &RecordBatch) -> Result<Vec<Statement>> {
    fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
        batch
            .column_by_name(name)
            .and_then(|array| array.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| LakeError::Corruption(format!("missing statement column `{name}`")))
    }
    let id = column(batch, "id")?;
    let entity_id = column(batch, "entity_id")?;
    let canonical_id = column(batch, "canonical_id")?;
    let schema = column(batch, "schema")?;
    let prop = column(batch, "prop")?;
    let value = column(batch, "value")?;
    let dataset = column(batch, "dataset")?;
    let lang = column(batch, "lang")?;
    let origin = column(batch, "origin")?;
    let external = batch
        .column_by_name("external")
        .and_then(|array| array.as_any().downcast_ref::<BooleanArray>())
        .ok_or_else(|| LakeError::Corruption("missing statement column `external`".to_string()))?;
    let first_seen = column(batch, "first_seen")?;
    let last_seen = column(batch, "last_seen")?;

    let mut statements = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        statements.push(Statement {
            id: id.value(row).to_string(),
            entity_id: entity_id.value(row).to_string(),
            canonical_id: canonical_id.value(row).to_string(),
            schema: schema.value(row).to_string(),
            prop: prop.value(row).to_string(),
            value: value.value(row).to_string(),
            dataset: dataset.value(row).to_string(),
            lang: if lang.is_null(row) {
                None
            } else {
                Some(lang.value(row).to_string())
            },
            origin: origin.value(row).to_string(),
            external: external.value(row),
            first_seen: util::parse_stmt_ts(first_seen.value(row))?,
            last_seen: util::parse_stmt_ts(last_seen.value(row))?,
        });
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(entity_id: &str, prop: &str, value: &str) -> Statement {
        Statement::new(entity_id, "Person", prop, value, "test", "import", None, false)
    }

    #[test]
    fn test_parquet_codec_round_trip() {
        let statements = vec![
            statement("jane", "name", "Jane Doe"),
            Statement::new(
                "jane", "Person", "name", "Джейн", "test", "import", Some("ru"), true,
            ),
        ];
        let data = encode_statements(&statements).unwrap();
        let decoded = decode_statements(Bytes::from(data)).unwrap();
        assert_eq!(decoded, statements);
    }

    #[test]
    fn test_empty_batch() {
        let data = encode_statements(&[]).unwrap();
        let decoded = decode_statements(Bytes::from(data)).unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn test_write_partition_file() {
        let storage = Storage::memory();
        let statements = vec![statement("jane", "name", "Jane Doe")];
        let entry = write_partition_file(&storage, "thing", "import", &statements)
            .await
            .unwrap();
        assert!(entry
            .path
            .starts_with("entities/statements/bucket=thing/origin=import/part-"));
        assert_eq!(entry.rows, 1);
        assert!(storage.exists(&entry.path).await.unwrap());
    }

    #[tokio::test]
    async fn test_export_csv_deterministic() {
        let storage = Storage::memory();
        let table = StatementTable::new(storage.clone(), "test");
        let mut writer = table.writer(Some("import"));
        writer.add_statement(statement("b", "name", "Bob")).unwrap();
        writer.add_statement(statement("a", "name", "Alice")).unwrap();
        writer.flush().await.unwrap();

        table.export_csv("exports/statements.csv").await.unwrap();
        let first = storage.get("exports/statements.csv").await.unwrap();
        table.export_csv("exports/statements.csv").await.unwrap();
        let second = storage.get("exports/statements.csv").await.unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first.to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,entity_id,canonical_id,schema,prop,value,dataset,lang,origin,external,first_seen,last_seen"
        );
        // ordered by canonical_id
        let body: Vec<&str> = lines.collect();
        assert!(body[0].contains("Alice"));
        assert!(body[1].contains("Bob"));
    }

    #[tokio::test]
    async fn test_optimize_compacts_and_vacuums() {
        let storage = Storage::memory();
        let table = StatementTable::new(storage.clone(), "test");
        for name in ["Alice", "Bob", "Carol"] {
            let mut writer = table.writer(Some("import"));
            writer
                .add_statement(statement(&name.to_lowercase(), "name", name))
                .unwrap();
            writer.flush().await.unwrap();
        }
        assert_eq!(table.version().await.unwrap(), Some(2));
        let before = table.log().snapshot(None).await.unwrap();
        assert_eq!(before.files.len(), 3);

        let report = table
            .optimize(&OptimizeOptions {
                vacuum: true,
                keep_hours: 0,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(report.compacted_partitions, 1);
        assert_eq!(report.files_removed, 3);
        assert_eq!(report.objects_deleted, 3);

        let after = table.log().snapshot(None).await.unwrap();
        assert_eq!(after.files.len(), 1);
        assert_eq!(after.version, Some(3));
        // all statements survive compaction
        let statements = table.query_statements(&Query::new()).await.unwrap();
        assert_eq!(statements.len(), 3);
        // removed objects are gone
        for file in before.files {
            assert!(!storage.exists(&file.path).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_destroy() {
        let storage = Storage::memory();
        let table = StatementTable::new(storage.clone(), "test");
        let mut writer = table.writer(None);
        writer.add_statement(statement("jane", "name", "Jane")).unwrap();
        writer.flush().await.unwrap();
        table.destroy().await.unwrap();
        assert_eq!(table.version().await.unwrap(), None);
        assert!(storage
            .iterate_keys(Some(path::STATEMENTS), None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let table = StatementTable::new(Storage::memory(), "test");
        let mut writer = table.writer(Some("import"));
        writer.add_statement(statement("jane", "name", "Jane")).unwrap();
        writer
            .add_statement(Statement::new(
                "jane", "Person", "id", "jane", "test", "import", None, false,
            ))
            .unwrap();
        writer.flush().await.unwrap();
        let stats = table.stats().await.unwrap();
        assert_eq!(stats.entity_count, 1);
        assert_eq!(stats.statement_count, 2);
        assert_eq!(stats.schemata.get("Person"), Some(&1));
    }
}
