/*!
The recreate operation: repair a corrupted dataset by destroying the
statement store and rebuilding it from the most recent export, then
re-ingesting file entities from the archive. Destructive; it always runs
when called.
*/

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conventions::{path, tag};
use crate::dataset::Dataset;
use crate::error::{LakeError, Result};
use crate::model::job::{Job, JobParams, RecreateSource};
use crate::model::statement::Statement;
use crate::ops::{check_cancelled, execute, Operation};
use crate::repo::jobs::JobRun;
use crate::storage::lock::DatasetLock;

/// How often a long import persists its progress.
const SAVE_EVERY: u64 = 10_000;

struct RecreateOperation {
    source: RecreateSource,
}

#[async_trait]
impl Operation for RecreateOperation {
    fn params(&self) -> JobParams {
        JobParams::Recreate {
            source: self.source,
            statements_imported: 0,
            entities_imported: 0,
            files_imported: 0,
        }
    }

    fn target(&self) -> Option<String> {
        Some(tag::OP_RECREATE.to_string())
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source = self.resolve_source(dataset).await?;
        info!(dataset = %dataset.name(), source = ?source, "recreating dataset");

        let lock = DatasetLock::acquire(dataset.storage(), "recreate").await?;
        let destroyed = dataset.entities().statements().destroy().await;
        let released = lock.release().await;
        destroyed?;
        released?;

        match source {
            RecreateSource::Statements => self.import_statements(dataset, run, cancel).await?,
            _ => self.import_entities(dataset, run, cancel).await?,
        }
        self.import_archive(dataset, run, cancel).await?;

        let flushed = dataset.entities().flush_with(cancel).await?;
        info!(
            dataset = %dataset.name(),
            statements_flushed = flushed,
            "recreate complete"
        );
        run.job.done = 1;
        Ok(())
    }
}

impl RecreateOperation {
    /// Pick the freshest export by its tag timestamps; missing files and
    /// missing tags fall back sensibly.
    async fn resolve_source(&self, dataset: &Dataset) -> Result<RecreateSource> {
        if self.source != RecreateSource::Auto {
            return Ok(self.source);
        }
        let entities_exists = dataset.storage().exists(path::ENTITIES_JSON).await?;
        let statements_exists = dataset.storage().exists(path::EXPORTS_STATEMENTS).await?;
        match (entities_exists, statements_exists) {
            (false, false) => Err(LakeError::BadInput(format!(
                "cannot recreate without `{}` or `{}`",
                path::ENTITIES_JSON,
                path::EXPORTS_STATEMENTS
            ))),
            (true, false) => Ok(RecreateSource::Entities),
            (false, true) => Ok(RecreateSource::Statements),
            (true, true) => {
                let entities_ts = dataset.tags().get(path::ENTITIES_JSON).await?;
                let statements_ts = dataset.tags().get(path::EXPORTS_STATEMENTS).await?;
                Ok(match (entities_ts, statements_ts) {
                    (Some(e), Some(s)) if e >= s => RecreateSource::Entities,
                    (Some(_), None) => RecreateSource::Entities,
                    // statements.csv is the cheaper import path
                    _ => RecreateSource::Statements,
                })
            }
        }
    }

    async fn import_entities(
        &self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let entities = dataset.entities().stream().await?;
        let mut bulk = dataset.entities().bulk(None);
        let mut imported: u64 = 0;
        for entity in &entities {
            check_cancelled(cancel)?;
            bulk.add_entity(entity)?;
            imported += 1;
            if imported % SAVE_EVERY == 0 {
                run.save().await?;
            }
        }
        bulk.close().await?;
        if let JobParams::Recreate {
            entities_imported, ..
        } = &mut run.job.params
        {
            *entities_imported = imported;
        }
        run.save().await?;
        Ok(())
    }

    async fn import_statements(
        &self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let data = dataset.storage().get(path::EXPORTS_STATEMENTS).await?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(data.as_ref());
        let mut bulk = dataset.entities().bulk(None);
        let mut imported: u64 = 0;
        for record in reader.records() {
            check_cancelled(cancel)?;
            let record = record?;
            bulk.add_statement(Statement::from_csv_record(&record)?)?;
            imported += 1;
            if imported % SAVE_EVERY == 0 {
                run.save().await?;
            }
        }
        bulk.close().await?;
        if let JobParams::Recreate {
            statements_imported,
            ..
        } = &mut run.job.params
        {
            *statements_imported = imported;
        }
        run.save().await?;
        Ok(())
    }

    /// Re-ingest document and folder entities for files that were
    /// originally crawled.
    async fn import_archive(
        &self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let files = dataset.archive().iterate_files().await?;
        let mut bulk = dataset.entities().bulk(Some(tag::CRAWL_ORIGIN));
        let mut imported: u64 = 0;
        for file in &files {
            check_cancelled(cancel)?;
            if file.origin == tag::CRAWL_ORIGIN {
                for entity in file.make_entities() {
                    bulk.add_entity(&entity)?;
                }
            }
            imported += 1;
        }
        bulk.close().await?;
        if let JobParams::Recreate { files_imported, .. } = &mut run.job.params {
            *files_imported = imported;
        }
        run.save().await?;
        Ok(())
    }
}

/// Rebuild the statement store from the most recent export.
pub async fn recreate(
    dataset: &Dataset,
    source: RecreateSource,
    cancel: &CancellationToken,
) -> Result<Job> {
    // destructive, so the freshness gate never applies
    execute(dataset, RecreateOperation { source }, true, cancel).await
}
