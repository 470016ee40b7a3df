/*!
Job records: one per operation execution, persisted under
`jobs/runs/<job_type>/<run_id>.json`. A job carries a common header
(counters, timing, error) plus operation-specific parameters as a sum
type.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::format_ts;

/// How the crawl operation treats already archived files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExistingMode {
    /// Re-archive: the blob write still short-circuits on an existing
    /// checksum, only metadata is refreshed.
    #[default]
    Overwrite,
    /// Skip when the same source path with the same checksum was archived.
    SkipPath,
    /// Skip whenever the blob exists.
    SkipChecksum,
}

/// Source selection for the recreate operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecreateSource {
    /// Choose the most recently exported file by tag timestamps.
    #[default]
    Auto,
    /// Re-import from `entities.ftm.json`.
    Entities,
    /// Re-import from `exports/statements.csv`.
    Statements,
}

/// Operation-specific job parameters and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobParams {
    /// Crawl a source location into the archive.
    Crawl {
        /// Source location URI.
        uri: String,
        /// Include only keys with this prefix.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        /// Include only keys matching this glob.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        glob: Option<String>,
        /// Exclude keys matching this glob.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude_glob: Option<String>,
        /// Enqueue file and folder entities into the journal.
        #[serde(default)]
        make_entities: bool,
        /// Skip mode for already archived files.
        #[serde(default)]
        existing: ExistingMode,
    },
    /// Export the statement store to `exports/statements.csv`.
    ExportStatements {},
    /// Export aggregated entities to `entities.ftm.json`.
    ExportEntities {
        /// Also produce an incremental diff.
        #[serde(default)]
        diff: bool,
    },
    /// Export document metadata to `exports/documents.csv`.
    ExportDocuments {
        /// Also produce an incremental diff.
        #[serde(default)]
        diff: bool,
    },
    /// Export computed statistics to `exports/statistics.json`.
    ExportStatistics {},
    /// Compose the dataset `index.json`.
    ExportIndex {},
    /// Compact the statement store.
    Optimize {
        /// Also expire removed files and delete their objects.
        #[serde(default)]
        vacuum: bool,
        /// Hours of removed-file history to retain when vacuuming.
        #[serde(default)]
        keep_hours: i64,
        /// Restrict to a bucket partition.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket: Option<String>,
        /// Restrict to an origin partition.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    /// Process an archived CSV through its mapping.
    Mapping {
        /// Checksum of the archived CSV file.
        content_hash: String,
    },
    /// Rebuild the statement store from exports.
    Recreate {
        /// Which export to re-import from.
        #[serde(default)]
        source: RecreateSource,
        /// Statements re-imported from CSV.
        #[serde(default)]
        statements_imported: u64,
        /// Entities re-imported from NDJSON.
        #[serde(default)]
        entities_imported: u64,
        /// File entities re-ingested from the archive.
        #[serde(default)]
        files_imported: u64,
    },
    /// Download archived documents to a target store.
    DownloadArchive {
        /// Target store URI.
        target: String,
        /// Documents skipped because they already existed.
        #[serde(default)]
        skipped: u64,
    },
}

impl JobParams {
    /// The job type name, used as the run-record directory.
    pub fn job_type(&self) -> &'static str {
        match self {
            JobParams::Crawl { .. } => "crawl",
            JobParams::ExportStatements {} => "export_statements",
            JobParams::ExportEntities { .. } => "export_entities",
            JobParams::ExportDocuments { .. } => "export_documents",
            JobParams::ExportStatistics {} => "export_statistics",
            JobParams::ExportIndex {} => "export_index",
            JobParams::Optimize { .. } => "optimize",
            JobParams::Mapping { .. } => "mapping",
            JobParams::Recreate { .. } => "recreate",
            JobParams::DownloadArchive { .. } => "download_archive",
        }
    }
}

/// Status record for a (probably long running) operation execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Time-sortable run identifier.
    pub run_id: String,
    /// Dataset the job ran for.
    pub dataset: String,
    /// Operation parameters and counters.
    #[serde(flatten)]
    pub params: JobParams,
    /// Start timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// Stop timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<DateTime<Utc>>,
    /// Last progress update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Items discovered but not yet handled.
    #[serde(default)]
    pub pending: u64,
    /// Items handled.
    #[serde(default)]
    pub done: u64,
    /// Items failed.
    #[serde(default)]
    pub errors: u64,
    /// Whether the job is currently running.
    #[serde(default)]
    pub running: bool,
    /// Error message of a failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exc: Option<String>,
    /// Wall-clock duration in seconds.
    #[serde(default)]
    pub took_secs: f64,
}

impl Job {
    /// Create a fresh job record with a time-sortable run id.
    pub fn make(dataset: &str, params: JobParams) -> Self {
        Job {
            run_id: make_run_id(),
            dataset: dataset.to_string(),
            params,
            started: None,
            stopped: None,
            last_updated: None,
            pending: 0,
            done: 0,
            errors: 0,
            running: false,
            exc: None,
            took_secs: 0.0,
        }
    }

    /// The job type name.
    pub fn job_type(&self) -> &'static str {
        self.params.job_type()
    }

    /// Mark the job as started.
    pub fn start(&mut self) {
        self.started = Some(Utc::now());
        self.running = true;
        self.touch();
    }

    /// Update the progress timestamp.
    pub fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }

    /// Mark the job as stopped, recording an optional error.
    pub fn stop(&mut self, exc: Option<String>) {
        self.running = false;
        self.stopped = Some(Utc::now());
        self.exc = exc;
        if let (Some(started), Some(stopped)) = (self.started, self.stopped) {
            self.took_secs = (stopped - started).num_milliseconds() as f64 / 1000.0;
        }
    }
}

/// Create a time-sortable run id: `<compact-ts>-<uuid fragment>`.
pub fn make_run_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", format_ts(&Utc::now()), &uuid[..8])
}
