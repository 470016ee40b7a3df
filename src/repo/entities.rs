/*!
The entity repository: journal and statement table composed into one
write path. Writers push into the journal through a bulk scope; a flush
drains the journal in `(bucket, origin, canonical_id, id)` order into the
table, keeping a single open parquet writer per partition run; queries
read the table.
*/

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conventions::{path, tag};
use crate::error::{LakeError, Result};
use crate::model::entity::Entity;
use crate::model::statement::Statement;
use crate::model::stats::DatasetStats;
use crate::storage::journal::{JournalStore, JournalWriter};
use crate::storage::lock::DatasetLock;
use crate::storage::object::Storage;
use crate::storage::parquet::{Query, StatementTable};
use crate::storage::tags::TagStore;

/// Entity and statement operations for one dataset.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    dataset: String,
    storage: Storage,
    tags: TagStore,
    journal: JournalStore,
    statements: StatementTable,
}

impl EntityRepository {
    /// Open the repository on a dataset's storage and journal.
    pub fn new(
        dataset: &str,
        storage: Storage,
        tags: TagStore,
        journal: JournalStore,
    ) -> Self {
        let statements = StatementTable::new(storage.clone(), dataset);
        EntityRepository {
            dataset: dataset.to_string(),
            storage,
            tags,
            journal,
            statements,
        }
    }

    /// The dataset name.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// The underlying statement table.
    pub fn statements(&self) -> &StatementTable {
        &self.statements
    }

    /// The underlying journal.
    pub fn journal(&self) -> &JournalStore {
        &self.journal
    }

    /// A bulk writer scope for the given origin. Close it to commit the
    /// batch and stamp `journal/last_updated`; dropping it without closing
    /// rolls the batch back.
    pub fn bulk(&self, origin: Option<&str>) -> BulkWriter {
        BulkWriter {
            writer: self.journal.writer(origin),
            tags: self.tags.clone(),
            dataset: self.dataset.clone(),
        }
    }

    /// Add a single entity to the journal.
    pub async fn add(&self, entity: &Entity, origin: Option<&str>) -> Result<()> {
        let mut bulk = self.bulk(origin);
        bulk.add_entity(entity)?;
        bulk.close().await?;
        Ok(())
    }

    /// Add many entities to the journal in one batch.
    pub async fn add_many<'a, I>(&self, entities: I, origin: Option<&str>) -> Result<u64>
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let mut bulk = self.bulk(origin);
        for entity in entities {
            bulk.add_entity(entity)?;
        }
        bulk.close().await
    }

    /// Flush buffered statements from the journal into the statement
    /// table. See [EntityRepository::flush_with].
    pub async fn flush(&self) -> Result<u64> {
        self.flush_with(&CancellationToken::new()).await
    }

    /// Flush under the dataset lock, observing a cancellation signal at
    /// row boundaries. Statements stream ordered by `(bucket, origin,
    /// canonical_id, id)`; the parquet writer is flushed whenever the
    /// partition changes. Stamps `journal/flushed` (entry time) and
    /// `statements/last_updated`; returns the number of statements moved.
    pub async fn flush_with(&self, cancel: &CancellationToken) -> Result<u64> {
        if self.journal.count()? == 0 {
            debug!(dataset = %self.dataset, "journal is empty, nothing to flush");
            // seed the tags on the very first run
            if !self.tags.exists(tag::JOURNAL_FLUSHED).await? {
                self.tags.set(tag::JOURNAL_FLUSHED, None).await?;
            }
            if !self.tags.exists(tag::STATEMENTS_UPDATED).await? {
                self.tags.set(tag::STATEMENTS_UPDATED, None).await?;
            }
            return Ok(0);
        }

        let lock = DatasetLock::acquire(&self.storage, "flush").await?;
        let outcome = self.flush_locked(cancel).await;
        let released = lock.release().await;
        let count = outcome?;
        released?;
        Ok(count)
    }

    async fn flush_locked(&self, cancel: &CancellationToken) -> Result<u64> {
        let touch = self.tags.touch(tag::JOURNAL_FLUSHED);
        let mut drain = self.journal.drain()?;
        let mut writer: Option<crate::storage::parquet::TableWriter> = None;
        let mut current: Option<(String, String)> = None;
        let mut count: u64 = 0;

        while let Some(row) = drain.next_row()? {
            if cancel.is_cancelled() {
                // the open parquet batch is dropped; rows stay journaled
                return Err(LakeError::Cancelled);
            }
            let partition = (row.bucket.clone(), row.origin.clone());
            if current.as_ref() != Some(&partition) {
                if let Some(mut open) = writer.take() {
                    open.flush().await?;
                }
                writer = Some(self.statements.writer(Some(&row.origin)));
                current = Some(partition);
            }
            let statement = row.statement()?;
            if let Some(open) = writer.as_mut() {
                open.add_statement(statement)?;
            }
            count += 1;
        }
        if let Some(mut open) = writer.take() {
            open.flush().await?;
        }

        drain.commit()?;
        touch.commit(&self.tags).await?;
        self.tags.set(tag::STATEMENTS_UPDATED, None).await?;
        info!(dataset = %self.dataset, count, "flushed journal into statement store");
        Ok(count)
    }

    /// Query entities, optionally flushing the journal first so pending
    /// writes become visible.
    pub async fn query(&self, query: &Query, flush_first: bool) -> Result<Vec<Entity>> {
        if flush_first {
            self.flush().await?;
        }
        self.statements.query(query).await
    }

    /// Get a single entity by id, or `None`.
    pub async fn get(&self, entity_id: &str, origin: Option<&str>) -> Result<Option<Entity>> {
        self.flush().await?;
        self.statements.get_entity(entity_id, origin).await
    }

    /// Stream entities from the exported `entities.ftm.json` file (not
    /// from the statement table).
    pub async fn stream(&self) -> Result<Vec<Entity>> {
        let data = self.storage.get(path::ENTITIES_JSON).await?;
        let text = String::from_utf8_lossy(&data);
        let mut entities = Vec::new();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            entities.push(Entity::from_json_line(line)?);
        }
        Ok(entities)
    }

    /// Export all entities as minified NDJSON to `entities.ftm.json`.
    /// Returns the number of entities written.
    pub async fn export_json(&self) -> Result<u64> {
        let entities = self.statements.query(&Query::new()).await?;
        let mut out = Vec::new();
        for entity in &entities {
            out.extend_from_slice(entity.to_json_line()?.as_bytes());
            out.push(b'\n');
        }
        self.storage.put(path::ENTITIES_JSON, Bytes::from(out)).await?;
        info!(
            dataset = %self.dataset,
            count = entities.len(),
            "exported entities"
        );
        Ok(entities.len() as u64)
    }

    /// Compute dataset statistics from the statement table.
    pub async fn make_statistics(&self) -> Result<DatasetStats> {
        self.statements.stats().await
    }
}

#[async_trait::async_trait]
impl crate::repo::diff::DiffTarget for EntityRepository {
    fn diff_base(&self) -> &'static str {
        path::DIFFS_ENTITIES
    }

    /// Every statement change touches its entity.
    fn filter_changes(
        &self,
        changes: &[crate::storage::parquet::Change],
    ) -> std::collections::BTreeSet<String> {
        changes
            .iter()
            .map(|change| change.statement.canonical_id.clone())
            .collect()
    }

    async fn write_initial_diff(
        &self,
        version: i64,
        ts: &chrono::DateTime<chrono::Utc>,
    ) -> Result<String> {
        if !self.storage.exists(path::ENTITIES_JSON).await? {
            debug!("exporting entities.ftm.json first to seed the initial diff");
            self.export_json().await?;
        }
        let mut out = Vec::new();
        for entity in self.stream().await? {
            write_envelope(&mut out, &entity)?;
        }
        let key = path::entities_diff(version, ts);
        self.storage.put(&key, Bytes::from(out)).await?;
        Ok(key)
    }

    async fn write_diff(
        &self,
        entity_ids: &std::collections::BTreeSet<String>,
        version: i64,
        ts: &chrono::DateTime<chrono::Utc>,
    ) -> Result<String> {
        let query = Query::new().with_entity_ids(entity_ids.iter().cloned());
        let mut out = Vec::new();
        for entity in self.statements.query(&query).await? {
            write_envelope(&mut out, &entity)?;
        }
        let key = path::entities_diff(version, ts);
        self.storage.put(&key, Bytes::from(out)).await?;
        Ok(key)
    }
}

fn write_envelope(out: &mut Vec<u8>, entity: &Entity) -> Result<()> {
    let envelope = crate::repo::diff::DiffEnvelope {
        op: crate::repo::diff::DiffOp::Add,
        entity: serde_json::to_value(entity)?,
    };
    out.extend_from_slice(serde_json::to_string(&envelope)?.as_bytes());
    out.push(b'\n');
    Ok(())
}

/// A bulk journal writer bound to its repository's tags. All exit paths
/// release the underlying batch: [BulkWriter::close] commits it, dropping
/// rolls it back.
pub struct BulkWriter {
    writer: JournalWriter,
    tags: TagStore,
    dataset: String,
}

impl BulkWriter {
    /// Enqueue one statement.
    pub fn add_statement(&mut self, statement: Statement) -> Result<()> {
        self.writer.add_statement(statement)
    }

    /// Enqueue an entity expanded into its statements.
    pub fn add_entity(&mut self, entity: &Entity) -> Result<()> {
        let dataset = self.dataset.clone();
        self.writer.add_entity(entity, &dataset)
    }

    /// Commit any pending batch without closing the scope.
    pub fn flush(&mut self) -> Result<u64> {
        self.writer.flush()
    }

    /// Discard the pending batch.
    pub fn rollback(&mut self) {
        self.writer.rollback()
    }

    /// Commit the batch, stamp `journal/last_updated` and finalise.
    pub async fn close(self) -> Result<u64> {
        let count = self.writer.close()?;
        self.tags.set(tag::JOURNAL_UPDATED, None).await?;
        Ok(count)
    }
}
