/*!
The buffering table writer. Statements accumulate in memory, grouped into
their `(bucket, origin)` partitions on flush; each flush writes one or
more new parquet files and appends exactly one commit to the transaction
log. Either the whole flush commits or nothing does: on a failed commit
the already written files are deleted again.
*/

use chrono::Utc;
use itertools::Itertools;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::entity::Entity;
use crate::model::statement::Statement;
use crate::storage::parquet::log::{Action, LogEntry, LogOperation};
use crate::storage::parquet::{write_partition_file, StatementTable};

/// A buffering writer for the statement table.
pub struct TableWriter {
    table: StatementTable,
    origin: String,
    buffer: Vec<Statement>,
}

impl TableWriter {
    pub(crate) fn new(table: StatementTable, origin: Option<&str>) -> Self {
        TableWriter {
            table,
            origin: origin
                .unwrap_or(crate::conventions::tag::DEFAULT_ORIGIN)
                .to_string(),
            buffer: Vec::new(),
        }
    }

    /// Number of buffered statements.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer one statement. A statement without an origin adopts the
    /// writer's origin.
    pub fn add_statement(&mut self, mut statement: Statement) -> Result<()> {
        if statement.origin.is_empty() {
            statement.origin = self.origin.clone();
            statement.id = statement.expected_id();
        }
        self.buffer.push(statement);
        Ok(())
    }

    /// Buffer an entity expanded into its statements under the writer's
    /// origin.
    pub fn add_entity(&mut self, entity: &Entity, dataset: &str) -> Result<()> {
        for statement in entity.to_statements(dataset, &self.origin) {
            self.add_statement(statement)?;
        }
        Ok(())
    }

    /// Drop the in-memory buffer without writing anything.
    pub fn rollback(&mut self) {
        self.buffer.clear();
    }

    /// Write the buffered statements as new parquet files (one per
    /// partition) and commit them as the next table version. Returns the
    /// number of statements written; an empty buffer commits nothing.
    pub async fn flush(&mut self) -> Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let statements = super::scan::dedupe_statements(std::mem::take(&mut self.buffer));
        let count = statements.len() as u64;

        let groups = statements
            .into_iter()
            .into_group_map_by(|stmt| (stmt.bucket().as_str().to_string(), stmt.origin.clone()));

        let version = self.table.version().await?.map(|v| v + 1).unwrap_or(0);
        let mut actions = Vec::new();
        let mut written = Vec::new();
        for ((bucket, origin), mut group) in groups.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            group.sort_by(|a, b| (&a.canonical_id, &a.id).cmp(&(&b.canonical_id, &b.id)));
            let entry =
                write_partition_file(self.table.storage(), &bucket, &origin, &group).await?;
            debug!(
                bucket = %bucket,
                origin = %origin,
                rows = entry.rows,
                "wrote statement partition file"
            );
            written.push(entry.path.clone());
            actions.push(Action::AddFile(entry));
        }

        let commit = self
            .table
            .log()
            .commit(&LogEntry {
                version,
                timestamp: Utc::now(),
                operation: LogOperation::Write,
                actions,
            })
            .await;
        if let Err(err) = commit {
            // losing the commit race must not leave orphan files behind
            for path in written {
                self.table.storage().delete(&path).await.ok();
            }
            return Err(err);
        }
        info!(
            dataset = %self.table.dataset(),
            version,
            count,
            "committed statement table version"
        );
        Ok(count)
    }
}
