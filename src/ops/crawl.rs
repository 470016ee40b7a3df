/*!
The crawl operation: iterate a source location, archive each file and
optionally enqueue document and folder entities into the journal. This
only adds or replaces documents, no content processing happens here.
*/

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conventions::tag;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::model::job::{ExistingMode, Job, JobParams};
use crate::ops::{check_cancelled, execute, Operation};
use crate::repo::archive::StoreOptions;
use crate::repo::jobs::JobRun;
use crate::storage::object::Storage;

/// How often a long crawl persists its progress.
const SAVE_EVERY: u64 = 1000;

/// Parameters of a crawl run.
#[derive(Debug, Clone)]
pub struct CrawlParams {
    /// Source location URI (local path, `s3://`, `http(s)://`, …).
    pub uri: String,
    /// Include only keys with this prefix.
    pub prefix: Option<String>,
    /// Include only keys matching this glob.
    pub glob: Option<String>,
    /// Exclude keys matching this glob.
    pub exclude_glob: Option<String>,
    /// Enqueue file and folder entities into the journal.
    pub make_entities: bool,
    /// Skip handling for already archived files.
    pub existing: ExistingMode,
}

impl CrawlParams {
    /// Crawl everything under a source URI with default options.
    pub fn new(uri: &str) -> Self {
        CrawlParams {
            uri: uri.to_string(),
            prefix: None,
            glob: None,
            exclude_glob: None,
            make_entities: false,
            existing: ExistingMode::default(),
        }
    }
}

struct CrawlOperation {
    params: CrawlParams,
    source: Storage,
}

#[async_trait]
impl Operation for CrawlOperation {
    fn params(&self) -> JobParams {
        JobParams::Crawl {
            uri: self.params.uri.clone(),
            prefix: self.params.prefix.clone(),
            glob: self.params.glob.clone(),
            exclude_glob: self.params.exclude_glob.clone(),
            make_entities: self.params.make_entities,
            existing: self.params.existing,
        }
    }

    fn target(&self) -> Option<String> {
        Some(tag::OP_CRAWL.to_string())
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(source = %self.source.uri(), "crawling");
        let keys = self
            .source
            .iterate_keys(
                self.params.prefix.as_deref(),
                self.params.glob.as_deref(),
                self.params.exclude_glob.as_deref(),
            )
            .await?;
        run.job.pending = keys.len() as u64;
        run.save().await?;

        for (index, key) in keys.iter().enumerate() {
            check_cancelled(cancel)?;
            if index as u64 % SAVE_EVERY == 0 && index > 0 {
                run.save().await?;
            }
            let checksum = self.source.checksum(key).await?;
            if self.should_skip(dataset, key, checksum.as_deref()).await? {
                debug!(key = %key, "skipping already archived file");
                run.job.pending -= 1;
                continue;
            }
            let file = dataset
                .archive()
                .store(
                    &self.source,
                    key,
                    StoreOptions {
                        checksum,
                        origin: Some(tag::CRAWL_ORIGIN.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            if self.params.make_entities {
                let entities = file.make_entities();
                dataset
                    .entities()
                    .add_many(entities.iter(), Some(tag::CRAWL_ORIGIN))
                    .await?;
            }
            run.job.done += 1;
            run.job.pending -= 1;
            run.job.touch();
        }

        if self.params.make_entities {
            dataset.entities().flush_with(cancel).await?;
        }
        Ok(())
    }
}

impl CrawlOperation {
    async fn should_skip(
        &self,
        dataset: &Dataset,
        key: &str,
        checksum: Option<&str>,
    ) -> Result<bool> {
        let checksum = match (self.params.existing, checksum) {
            (ExistingMode::Overwrite, _) | (_, None) => return Ok(false),
            (_, Some(checksum)) => checksum,
        };
        if !dataset.archive().exists(checksum).await? {
            return Ok(false);
        }
        match self.params.existing {
            ExistingMode::SkipChecksum => Ok(true),
            ExistingMode::SkipPath => {
                for file in dataset.archive().get_all_files(checksum).await? {
                    if file.key == key {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ExistingMode::Overwrite => Ok(false),
        }
    }
}

/// Crawl a source location into the dataset's archive.
pub async fn crawl(
    dataset: &Dataset,
    params: CrawlParams,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    let source = Storage::open(&params.uri)?;
    crawl_from(dataset, source, params, force, cancel).await
}

/// Crawl from an already opened source store (used by tests and embedding
/// applications that hold their own store handles).
pub async fn crawl_from(
    dataset: &Dataset,
    source: Storage,
    params: CrawlParams,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    let op = CrawlOperation { params, source };
    execute(dataset, op, force, cancel).await
}
