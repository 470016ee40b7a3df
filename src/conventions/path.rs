/*!
Path conventions for a lakehouse dataset.

All paths are dataset-relative:

```text
<dataset root>/
    index.json                          # generated dataset index
    config.yml                          # user editable configuration
    .LOCK                               # dataset-wide advisory lock
    versions/YYYY/MM/<TS>/<name>        # versioned snapshots
    tags/<tenant>/<key>                 # freshness timestamps
    archive/ab/cd/ef/<checksum>/        # content-addressed file storage
        blob                            # file bytes (stored once)
        <file_id>.json                  # metadata (one per source path)
        <origin>.txt                    # extracted text (one per engine)
    mappings/<content_hash>/mapping.yml
    entities/statements/bucket=<b>/origin=<o>/part-<uuid>.parquet
    entities/statements/_delta_log/<version>.json
    entities.ftm.json                   # aggregated entities export
    exports/
        statements.csv
        statistics.json
        documents.csv
        graph.cypher
    diffs/
        entities.ftm.json/v<n>_<TS>.delta.json
        exports/documents.csv/v<n>_<TS>.diff.csv
    jobs/runs/<job_type>/<run_id>.json
```
*/

use chrono::{DateTime, Utc};

use crate::util::format_ts;

/// Default tenant for tags.
pub const TENANT: &str = "lakehouse";

/// Generated dataset index file name.
pub const INDEX: &str = "index.json";

/// User editable configuration file name.
pub const CONFIG: &str = "config.yml";

/// Dataset-wide advisory lock key.
pub const LOCK: &str = ".LOCK";

/// Base path for versioned snapshots.
pub const VERSIONS: &str = "versions";

/// Base path for tags.
pub const TAGS: &str = "tags";

/// Base path for the content-addressed archive.
pub const ARCHIVE: &str = "archive";

/// Blob file name within a checksum directory.
pub const ARCHIVE_BLOB: &str = "blob";

/// Base path for mapping configurations.
pub const MAPPINGS: &str = "mappings";

/// Mapping configuration file name.
pub const MAPPING: &str = "mapping.yml";

/// Base path for entities data.
pub const ENTITIES: &str = "entities";

/// Aggregated entities export file.
pub const ENTITIES_JSON: &str = "entities.ftm.json";

/// Base path for the partitioned statement table.
pub const STATEMENTS: &str = "entities/statements";

/// Transaction log directory within the statement table.
pub const DELTA_LOG: &str = "_delta_log";

/// Base path for exports.
pub const EXPORTS: &str = "exports";

/// Sorted statements CSV export.
pub const EXPORTS_STATEMENTS: &str = "exports/statements.csv";

/// Computed statistics export.
pub const EXPORTS_STATISTICS: &str = "exports/statistics.json";

/// Document metadata CSV export.
pub const EXPORTS_DOCUMENTS: &str = "exports/documents.csv";

/// Optional property-graph export.
pub const EXPORTS_CYPHER: &str = "exports/graph.cypher";

/// Base path for diff exports.
pub const DIFFS: &str = "diffs";

/// Base path for entities diffs.
pub const DIFFS_ENTITIES: &str = "diffs/entities.ftm.json";

/// Base path for documents diffs.
pub const DIFFS_DOCUMENTS: &str = "diffs/exports/documents.csv";

/// Base path for job run records.
pub const JOB_RUNS: &str = "jobs/runs";

/// Versioned snapshot path for a file: `versions/YYYY/MM/<TS>/<name>`.
pub fn version(name: &str, ts: &DateTime<Utc>) -> String {
    let stamp = format_ts(ts);
    format!("{VERSIONS}/{}/{}/{stamp}/{name}", &stamp[..4], &stamp[4..6])
}

/// Tag storage path: `tags/<tenant>/<key>`.
pub fn tag(key: &str, tenant: Option<&str>) -> String {
    format!("{TAGS}/{}/{key}", tenant.unwrap_or(TENANT))
}

/// Archive directory for a checksum:
/// `archive/5a/6a/cf/5a6acf229ba576d9a40b09292595658bbb74ef56`.
pub fn archive_prefix(checksum_key: &str) -> String {
    format!("{ARCHIVE}/{checksum_key}")
}

/// Blob path for a checksum.
pub fn archive_blob(checksum_key: &str) -> String {
    format!("{ARCHIVE}/{checksum_key}/{ARCHIVE_BLOB}")
}

/// Metadata path for a specific file instance. Multiple files with the same
/// checksum but different source paths each get their own metadata file,
/// keyed by the file id.
pub fn archive_meta(checksum_key: &str, file_id: &str) -> String {
    format!("{ARCHIVE}/{checksum_key}/{file_id}.json")
}

/// Extracted text path for a checksum, keyed by extraction origin.
pub fn archive_txt(checksum_key: &str, origin: &str) -> String {
    format!("{ARCHIVE}/{checksum_key}/{origin}.txt")
}

/// Mapping configuration path for an archived CSV file.
pub fn mapping(content_hash: &str) -> String {
    format!("{MAPPINGS}/{content_hash}/{MAPPING}")
}

/// Partition directory for a statement file.
pub fn statement_partition(bucket: &str, origin: &str) -> String {
    format!("{STATEMENTS}/bucket={bucket}/origin={origin}")
}

/// Transaction log entry path for a version.
pub fn delta_log_entry(version: i64) -> String {
    format!("{STATEMENTS}/{DELTA_LOG}/{version:020}.json")
}

/// Diff name composed of table version and timestamp: `v3_<TS>`.
pub fn diff_name(version: i64, ts: &DateTime<Utc>) -> String {
    format!("v{version}_{}", format_ts(ts))
}

/// Entities diff file path:
/// `diffs/entities.ftm.json/v3_<TS>.delta.json`.
pub fn entities_diff(version: i64, ts: &DateTime<Utc>) -> String {
    format!("{DIFFS_ENTITIES}/{}.delta.json", diff_name(version, ts))
}

/// Documents diff file path:
/// `diffs/exports/documents.csv/v3_<TS>.diff.csv`.
pub fn documents_diff(version: i64, ts: &DateTime<Utc>) -> String {
    format!("{DIFFS_DOCUMENTS}/{}.diff.csv", diff_name(version, ts))
}

/// Job run record path: `jobs/runs/<job_type>/<run_id>.json`.
pub fn job_run(job_type: &str, run_id: &str) -> String {
    format!("{JOB_RUNS}/{job_type}/{run_id}.json")
}
