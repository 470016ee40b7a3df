/*!
The optimize operation: compact small statement files behind the dataset
lock, optionally vacuuming expired file versions.
*/

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::conventions::tag;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::model::job::{Job, JobParams};
use crate::ops::{execute, Operation};
use crate::repo::jobs::JobRun;
use crate::storage::lock::DatasetLock;
use crate::storage::parquet::OptimizeOptions;

struct OptimizeOperation {
    opts: OptimizeOptions,
}

#[async_trait]
impl Operation for OptimizeOperation {
    fn params(&self) -> JobParams {
        JobParams::Optimize {
            vacuum: self.opts.vacuum,
            keep_hours: self.opts.keep_hours,
            bucket: self.opts.bucket.clone(),
            origin: self.opts.origin.clone(),
        }
    }

    fn target(&self) -> Option<String> {
        Some(tag::STORE_OPTIMIZED.to_string())
    }

    fn dependencies(&self) -> Vec<String> {
        vec![tag::STATEMENTS_UPDATED.to_string()]
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let lock = DatasetLock::acquire(dataset.storage(), "optimize").await?;
        let outcome = dataset
            .entities()
            .statements()
            .optimize(&self.opts)
            .await;
        let released = lock.release().await;
        let report = outcome?;
        released?;
        run.job.done = report.compacted_partitions + report.objects_deleted;
        Ok(())
    }
}

/// Compact the dataset's statement store.
pub async fn optimize(
    dataset: &Dataset,
    opts: OptimizeOptions,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    execute(dataset, OptimizeOperation { opts }, force, cancel).await
}
