/*!
The download-archive operation: stream every document listed in
`exports/documents.csv` from the archive into a target store, placed at
its resolved folder path. Already present targets are skipped.
*/

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conventions::{path, tag};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::model::job::{Job, JobParams};
use crate::ops::{check_cancelled, execute, Operation};
use crate::repo::jobs::JobRun;
use crate::storage::object::Storage;

struct DownloadArchiveOperation {
    target_uri: String,
    target: Storage,
}

#[async_trait]
impl Operation for DownloadArchiveOperation {
    fn params(&self) -> JobParams {
        JobParams::DownloadArchive {
            target: self.target_uri.clone(),
            skipped: 0,
        }
    }

    fn target(&self) -> Option<String> {
        Some(tag::OP_DOWNLOAD_ARCHIVE.to_string())
    }

    fn dependencies(&self) -> Vec<String> {
        vec![path::EXPORTS_DOCUMENTS.to_string()]
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(target = %self.target.uri(), "downloading archive");
        let mut skipped: u64 = 0;
        for document in dataset.documents().stream().await? {
            check_cancelled(cancel)?;
            let target_key = document.relative_path();
            if self.target.exists(&target_key).await? {
                debug!(key = %target_key, "target exists, skipping");
                skipped += 1;
                continue;
            }
            let data = dataset.archive().open(&document.checksum).await?;
            self.target.put(&target_key, data).await?;
            run.job.done += 1;
        }
        if let JobParams::DownloadArchive { skipped: count, .. } = &mut run.job.params {
            *count = skipped;
        }
        Ok(())
    }
}

/// Download all documents of a dataset to a target store, using their
/// resolved paths.
pub async fn download_archive(
    dataset: &Dataset,
    target_uri: &str,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    let op = DownloadArchiveOperation {
        target_uri: target_uri.to_string(),
        target: Storage::open(target_uri)?,
    };
    execute(dataset, op, force, cancel).await
}

/// Like [download_archive], with an already opened target store.
pub async fn download_archive_to(
    dataset: &Dataset,
    target: Storage,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    let op = DownloadArchiveOperation {
        target_uri: target.uri().to_string(),
        target,
    };
    execute(dataset, op, force, cancel).await
}
