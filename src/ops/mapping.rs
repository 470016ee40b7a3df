/*!
The mapping operation: read an archived CSV by its checksum, run the
configured mapping over it and stream the produced entities into the
journal under the `mapping:<hash>` origin. Gated on the mapping
configuration tag, so an unchanged mapping is not reprocessed.
*/

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conventions::tag;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::model::job::{Job, JobParams};
use crate::ops::{check_cancelled, execute, Operation};
use crate::repo::jobs::JobRun;

struct MappingOperation {
    content_hash: String,
}

#[async_trait]
impl Operation for MappingOperation {
    fn params(&self) -> JobParams {
        JobParams::Mapping {
            content_hash: self.content_hash.clone(),
        }
    }

    fn target(&self) -> Option<String> {
        Some(tag::mapping_processed(&self.content_hash))
    }

    fn dependencies(&self) -> Vec<String> {
        vec![tag::mapping_config(&self.content_hash)]
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let spec = dataset.mappings().get(&self.content_hash).await?;
        let data = dataset.archive().open(&self.content_hash).await?;
        let entities = spec.entities(&data)?;
        info!(
            content_hash = %self.content_hash,
            entities = entities.len(),
            "mapped archived csv"
        );

        let origin = tag::mapping_origin(&self.content_hash);
        let mut bulk = dataset.entities().bulk(Some(&origin));
        for entity in &entities {
            check_cancelled(cancel)?;
            bulk.add_entity(entity)?;
            run.job.done += 1;
        }
        bulk.close().await?;
        Ok(())
    }
}

/// Process an archived CSV file through its configured mapping.
pub async fn process_mapping(
    dataset: &Dataset,
    content_hash: &str,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    let op = MappingOperation {
        content_hash: content_hash.to_string(),
    };
    execute(dataset, op, force, cancel).await
}
