/*!
Export operations: statement table → `statements.csv`,
`entities.ftm.json`, `documents.csv`, `statistics.json`, and the composed
dataset `index.json`. Each export first makes sure the journal is
flushed, and each is gated on `statements/last_updated` and
`journal/last_updated` so an up-to-date export is skipped.
*/

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::conventions::{path, tag};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::model::dataset::{DataResource, DatasetIndex};
use crate::model::job::{Job, JobParams};
use crate::model::stats::DatasetStats;
use crate::ops::{ensure_flush, execute, Operation};
use crate::repo::diff;
use crate::repo::jobs::JobRun;

fn export_dependencies() -> Vec<String> {
    vec![
        tag::STATEMENTS_UPDATED.to_string(),
        tag::JOURNAL_UPDATED.to_string(),
    ]
}

struct ExportStatementsOperation;

#[async_trait]
impl Operation for ExportStatementsOperation {
    fn params(&self) -> JobParams {
        JobParams::ExportStatements {}
    }

    fn target(&self) -> Option<String> {
        Some(path::EXPORTS_STATEMENTS.to_string())
    }

    fn dependencies(&self) -> Vec<String> {
        export_dependencies()
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_flush(dataset, cancel).await?;
        dataset
            .entities()
            .statements()
            .export_csv(path::EXPORTS_STATEMENTS)
            .await?;
        run.job.done = 1;
        Ok(())
    }
}

struct ExportEntitiesOperation {
    diff: bool,
}

#[async_trait]
impl Operation for ExportEntitiesOperation {
    fn params(&self) -> JobParams {
        JobParams::ExportEntities { diff: self.diff }
    }

    fn target(&self) -> Option<String> {
        Some(path::ENTITIES_JSON.to_string())
    }

    fn dependencies(&self) -> Vec<String> {
        export_dependencies()
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_flush(dataset, cancel).await?;
        run.job.done = dataset.entities().export_json().await?;
        if self.diff {
            diff::export_diff(
                dataset.entities(),
                dataset.entities().statements(),
                dataset.tags(),
            )
            .await?;
        }
        Ok(())
    }
}

struct ExportDocumentsOperation {
    diff: bool,
}

#[async_trait]
impl Operation for ExportDocumentsOperation {
    fn params(&self) -> JobParams {
        JobParams::ExportDocuments { diff: self.diff }
    }

    fn target(&self) -> Option<String> {
        Some(path::EXPORTS_DOCUMENTS.to_string())
    }

    fn dependencies(&self) -> Vec<String> {
        export_dependencies()
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_flush(dataset, cancel).await?;
        let prefix = dataset.public_url_prefix().await?;
        run.job.done = dataset
            .documents()
            .export_csv(prefix.as_deref())
            .await?;
        if self.diff {
            diff::export_diff(
                dataset.documents(),
                dataset.documents().statements(),
                dataset.tags(),
            )
            .await?;
        }
        Ok(())
    }
}

struct ExportStatisticsOperation;

#[async_trait]
impl Operation for ExportStatisticsOperation {
    fn params(&self) -> JobParams {
        JobParams::ExportStatistics {}
    }

    fn target(&self) -> Option<String> {
        Some(path::EXPORTS_STATISTICS.to_string())
    }

    fn dependencies(&self) -> Vec<String> {
        export_dependencies()
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_flush(dataset, cancel).await?;
        let stats = dataset.entities().make_statistics().await?;
        dataset
            .versions()
            .make(path::EXPORTS_STATISTICS, &stats)
            .await?;
        run.job.done = 1;
        Ok(())
    }
}

struct ExportIndexOperation;

#[async_trait]
impl Operation for ExportIndexOperation {
    fn params(&self) -> JobParams {
        JobParams::ExportIndex {}
    }

    fn target(&self) -> Option<String> {
        Some(path::INDEX.to_string())
    }

    fn dependencies(&self) -> Vec<String> {
        vec![
            path::CONFIG.to_string(),
            path::EXPORTS_STATISTICS.to_string(),
            path::ENTITIES_JSON.to_string(),
            path::EXPORTS_DOCUMENTS.to_string(),
        ]
    }

    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_flush(dataset, cancel).await?;
        let config = dataset.config().await?;
        let prefix = dataset.public_url_prefix().await?;
        let mut index = DatasetIndex::from_config(&config);

        // regenerate stale resources, each under its own tag scope
        for resource in [
            path::EXPORTS_STATEMENTS,
            path::ENTITIES_JSON,
            path::EXPORTS_DOCUMENTS,
            path::EXPORTS_STATISTICS,
        ] {
            let fresh = dataset
                .tags()
                .is_latest(resource, [tag::STATEMENTS_UPDATED])
                .await?;
            if !fresh {
                match resource {
                    path::EXPORTS_STATEMENTS => export_statements(dataset, true, cancel).await?,
                    path::ENTITIES_JSON => export_entities(dataset, false, true, cancel).await?,
                    path::EXPORTS_DOCUMENTS => {
                        export_documents(dataset, false, true, cancel).await?
                    }
                    _ => export_statistics(dataset, true, cancel).await?,
                };
            }
            if let Some(entry) = make_resource(dataset, resource, prefix.as_deref()).await? {
                index.resources.push(entry);
            }
        }

        let stats: Option<DatasetStats> = dataset
            .versions()
            .get_optional(path::EXPORTS_STATISTICS)
            .await?;
        index.statistics = stats;
        dataset.versions().make(path::INDEX, &index).await?;
        run.job.done = 1;
        Ok(())
    }
}

async fn make_resource(
    dataset: &Dataset,
    key: &'static str,
    public_prefix: Option<&str>,
) -> Result<Option<DataResource>> {
    if !dataset.storage().exists(key).await? {
        return Ok(None);
    }
    let size = dataset.storage().size(key).await?;
    let name = key.rsplit('/').next().unwrap_or(key).to_string();
    Ok(Some(DataResource {
        name,
        url: dataset.storage().to_uri(key),
        public_url: public_prefix.map(|prefix| format!("{}/{key}", prefix.trim_end_matches('/'))),
        mime_type: match key.rsplit('.').next() {
            Some("csv") => "text/csv",
            Some("json") => "application/json",
            _ => "application/octet-stream",
        }
        .to_string(),
        size: Some(size),
    }))
}

/// Export the statement table to `exports/statements.csv`.
pub async fn export_statements(
    dataset: &Dataset,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    execute(dataset, ExportStatementsOperation, force, cancel).await
}

/// Export aggregated entities to `entities.ftm.json`, optionally with an
/// incremental diff.
pub async fn export_entities(
    dataset: &Dataset,
    diff: bool,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    execute(dataset, ExportEntitiesOperation { diff }, force, cancel).await
}

/// Export document metadata to `exports/documents.csv`, optionally with
/// an incremental diff.
pub async fn export_documents(
    dataset: &Dataset,
    diff: bool,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    execute(dataset, ExportDocumentsOperation { diff }, force, cancel).await
}

/// Export computed statistics to `exports/statistics.json` (versioned).
pub async fn export_statistics(
    dataset: &Dataset,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    execute(dataset, ExportStatisticsOperation, force, cancel).await
}

/// Compose and export the dataset `index.json` (versioned), regenerating
/// stale resources first.
pub async fn export_index(
    dataset: &Dataset,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    execute(dataset, ExportIndexOperation, force, cancel).await
}
