/*!
The write-ahead journal: a durable sqlite-backed buffer for incoming
statements.

Writers enqueue batches; a periodic flush drains all buffered rows ordered
by `(bucket, origin, canonical_id, id)` into the parquet statement table.
Rows are removed only after the consumer drained the sequence without
error. Duplicate statement ids upsert: the newest body replaces the old
one.
*/

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{LakeError, Result};
use crate::model::entity::Entity;
use crate::model::statement::Statement;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS statements (
    id TEXT PRIMARY KEY,
    bucket TEXT NOT NULL,
    origin TEXT NOT NULL,
    canonical_id TEXT NOT NULL,
    data BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_statements_order
    ON statements (bucket, origin, canonical_id);
";

/// Rows fetched per page while draining.
const DRAIN_PAGE: usize = 4096;

/// One buffered journal row.
#[derive(Debug, Clone)]
pub struct JournalRow {
    /// Statement id.
    pub id: String,
    /// Partition key 1.
    pub bucket: String,
    /// Partition key 2.
    pub origin: String,
    /// Sort key.
    pub canonical_id: String,
    /// Packed statement body.
    pub data: Vec<u8>,
}

impl JournalRow {
    /// Unpack the statement body.
    pub fn statement(&self) -> Result<Statement> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// Durable statement buffer for one dataset.
#[derive(Clone)]
pub struct JournalStore {
    conn: Arc<Mutex<Connection>>,
    dataset: String,
    uri: String,
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("dataset", &self.dataset)
            .field("uri", &self.uri)
            .finish()
    }
}

impl JournalStore {
    /// Open (and initialise) the journal at the given URI. Supported forms
    /// are `sqlite:///<path>`, a bare path, and `sqlite:///:memory:`.
    pub fn open(uri: &str, dataset: &str) -> Result<Self> {
        let target = uri.strip_prefix("sqlite:///").unwrap_or(uri);
        let conn = if target.contains(":memory:") {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = std::path::Path::new(target).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(target)?
        };
        conn.execute_batch(SCHEMA)?;
        Ok(JournalStore {
            conn: Arc::new(Mutex::new(conn)),
            dataset: dataset.to_string(),
            uri: uri.to_string(),
        })
    }

    /// The journal URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// A batching writer for the given origin. The batch becomes durable on
    /// [JournalWriter::flush] or [JournalWriter::close]; dropping the
    /// writer without closing discards any unflushed rows.
    pub fn writer(&self, origin: Option<&str>) -> JournalWriter {
        JournalWriter {
            store: self.clone(),
            origin: origin
                .unwrap_or(crate::conventions::tag::DEFAULT_ORIGIN)
                .to_string(),
            buffer: Vec::new(),
            written: 0,
            closed: false,
        }
    }

    /// Number of buffered rows.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT count(*) FROM statements", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove all buffered rows, returning how many were removed.
    pub fn clear(&self) -> Result<u64> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM statements", [])?;
        Ok(removed as u64)
    }

    /// Start draining the journal in `(bucket, origin, canonical_id, id)`
    /// order. The drain observes a snapshot: rows written after the drain
    /// started are fully deferred to the next flush. Call
    /// [JournalDrain::commit] once every row was consumed successfully;
    /// dropping the drain without committing leaves all rows in place.
    pub fn drain(&self) -> Result<JournalDrain> {
        let watermark: i64 = {
            let conn = self.lock();
            conn.query_row(
                "SELECT coalesce(max(rowid), 0) FROM statements",
                [],
                |row| row.get(0),
            )?
        };
        Ok(JournalDrain {
            store: self.clone(),
            watermark,
            last: None,
            page: std::collections::VecDeque::new(),
            exhausted: watermark == 0,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // a poisoned lock means a writer panicked mid-batch; the sqlite
        // state itself is still consistent
        self.conn.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn insert_batch(&self, rows: &[(Statement, Vec<u8>)]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO statements (id, bucket, origin, canonical_id, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (statement, data) in rows {
                stmt.execute(params![
                    statement.id,
                    statement.bucket().as_str(),
                    statement.origin,
                    statement.canonical_id,
                    data,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }
}

/// A batching journal writer. Statements accumulate in memory and are
/// committed as one transaction per [JournalWriter::flush].
pub struct JournalWriter {
    store: JournalStore,
    origin: String,
    buffer: Vec<(Statement, Vec<u8>)>,
    written: u64,
    closed: bool,
}

impl JournalWriter {
    /// Enqueue a single statement. A statement without an origin adopts the
    /// writer's origin (which re-derives the id).
    pub fn add_statement(&mut self, mut statement: Statement) -> Result<()> {
        if statement.origin.is_empty() {
            statement.origin = self.origin.clone();
            statement.id = statement.expected_id();
        }
        if statement.id != statement.expected_id() {
            return Err(LakeError::BadInput(format!(
                "statement id `{}` does not match its content",
                statement.id
            )));
        }
        let data = serde_json::to_vec(&statement)?;
        self.buffer.push((statement, data));
        Ok(())
    }

    /// Expand an entity into its statements and enqueue them under the
    /// writer's origin.
    pub fn add_entity(&mut self, entity: &Entity, dataset: &str) -> Result<()> {
        for statement in entity.to_statements(dataset, &self.origin) {
            self.add_statement(statement)?;
        }
        Ok(())
    }

    /// Commit the pending batch. May be called repeatedly.
    pub fn flush(&mut self) -> Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let count = self.store.insert_batch(&self.buffer)? as u64;
        self.buffer.clear();
        self.written += count;
        debug!(count, origin = %self.origin, "journal batch committed");
        Ok(count)
    }

    /// Discard the pending batch.
    pub fn rollback(&mut self) {
        self.buffer.clear();
    }

    /// Commit any pending batch and finalise the writer, returning the
    /// total number of rows written.
    pub fn close(mut self) -> Result<u64> {
        self.flush()?;
        self.closed = true;
        Ok(self.written)
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        if !self.closed && !self.buffer.is_empty() {
            debug!(
                discarded = self.buffer.len(),
                "journal writer dropped without close, rolling back"
            );
            self.buffer.clear();
        }
    }
}

/// A lazy, ordered drain over a journal snapshot.
pub struct JournalDrain {
    store: JournalStore,
    watermark: i64,
    last: Option<(String, String, String, String)>,
    page: std::collections::VecDeque<JournalRow>,
    exhausted: bool,
}

impl JournalDrain {
    /// Fetch the next row, paging from sqlite as needed.
    pub fn next_row(&mut self) -> Result<Option<JournalRow>> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        Ok(self.page.pop_front())
    }

    /// Delete all rows of the drained snapshot. Rows written after the
    /// drain started survive.
    pub fn commit(self) -> Result<u64> {
        let conn = self.store.lock();
        let removed = conn.execute(
            "DELETE FROM statements WHERE rowid <= ?1",
            params![self.watermark],
        )?;
        Ok(removed as u64)
    }

    fn fetch_page(&mut self) -> Result<()> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, bucket, origin, canonical_id, data FROM statements
             WHERE rowid <= ?1
               AND (?2 IS NULL OR (bucket, origin, canonical_id, id) > (?2, ?3, ?4, ?5))
             ORDER BY bucket, origin, canonical_id, id
             LIMIT ?6",
        )?;
        let (bucket, origin, canonical_id, id) = match &self.last {
            Some((b, o, c, i)) => (
                Some(b.clone()),
                Some(o.clone()),
                Some(c.clone()),
                Some(i.clone()),
            ),
            None => (None, None, None, None),
        };
        let rows = stmt.query_map(
            params![self.watermark, bucket, origin, canonical_id, id, DRAIN_PAGE as i64],
            |row| {
                Ok(JournalRow {
                    id: row.get(0)?,
                    bucket: row.get(1)?,
                    origin: row.get(2)?,
                    canonical_id: row.get(3)?,
                    data: row.get(4)?,
                })
            },
        )?;
        for row in rows {
            self.page.push_back(row?);
        }
        match self.page.back() {
            Some(row) => {
                self.last = Some((
                    row.bucket.clone(),
                    row.origin.clone(),
                    row.canonical_id.clone(),
                    row.id.clone(),
                ));
            }
            None => self.exhausted = true,
        }
        if self.page.len() < DRAIN_PAGE {
            self.exhausted = true;
        }
        Ok(())
    }
}
