/*!
Well-known tag keys. Tags mark when something last happened; operations
compare their target tag against dependency tags to decide whether work can
be skipped.
*/

/// The statement store was updated (journal flushed into parquet).
pub const STATEMENTS_UPDATED: &str = "statements/last_updated";

/// The journal received new statements.
pub const JOURNAL_UPDATED: &str = "journal/last_updated";

/// The journal was last flushed into the statement store.
pub const JOURNAL_FLUSHED: &str = "journal/flushed";

/// The statement store was compacted.
pub const STORE_OPTIMIZED: &str = "statements/store_optimized";

/// The archive last received a file.
pub const ARCHIVE_UPDATED: &str = "archive/last_updated";

/// Crawl operation last run.
pub const OP_CRAWL: &str = "operations/crawl/last_run";

/// Recreate operation last run.
pub const OP_RECREATE: &str = "operations/recreate/last_run";

/// Download-archive operation last run.
pub const OP_DOWNLOAD_ARCHIVE: &str = "operations/download_archive/last_run";

/// Origin used for statements created from crawled files.
pub const CRAWL_ORIGIN: &str = "crawl";

/// Default statement origin.
pub const DEFAULT_ORIGIN: &str = "default";

/// Tag key for a mapping execution.
pub fn mapping_processed(content_hash: &str) -> String {
    format!("mappings/{content_hash}/last_processed")
}

/// Tag key for a mapping configuration update.
pub fn mapping_config(content_hash: &str) -> String {
    format!("mappings/{content_hash}/mapping.yml")
}

/// Origin for statements produced by a mapping execution.
pub fn mapping_origin(content_hash: &str) -> String {
    format!("mapping:{content_hash}")
}

/// Tag key holding the diff export state for a diff base path.
pub fn diff_state(base: &str) -> String {
    format!("{base}-current")
}
