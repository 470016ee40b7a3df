/*!
Layer 4: idempotent, dependency-gated operations. An operation binds a
[Job](crate::model::job::Job) to a target tag and a set of dependency
tags; unless forced, it only runs when the target is stale:

```text
if not force and target and deps:
    if tags.is_latest(target, deps):
        stop and return the job as-is
with jobs.run(job), tags.touch(target):
    handle(...)
return the latest job record
```

The target tag is committed with its scope-entry timestamp only after the
handler succeeded; a failed or cancelled run leaves it unchanged.
*/

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conventions::tag;
use crate::dataset::Dataset;
use crate::error::{LakeError, Result};
use crate::model::job::{Job, JobParams};
use crate::repo::jobs::JobRun;

pub mod crawl;
pub mod download;
pub mod export;
pub mod mapping;
pub mod optimize;
pub mod recreate;

pub use crawl::{crawl, crawl_from, CrawlParams};
pub use download::{download_archive, download_archive_to};
pub use export::{
    export_documents, export_entities, export_index, export_statements, export_statistics,
};
pub use mapping::process_mapping;
pub use optimize::optimize;
pub use recreate::recreate;

/// A dependency-gated job with a `handle` routine.
#[async_trait]
pub trait Operation: Send {
    /// Initial job parameters for the run record.
    fn params(&self) -> JobParams;

    /// Tag committed after a successful run.
    fn target(&self) -> Option<String>;

    /// Tags the target must be fresher than to skip the run.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Perform the operation.
    async fn handle(
        &mut self,
        dataset: &Dataset,
        run: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Execute an operation against a dataset, honoring the freshness gate
/// unless `force` is set. Returns the final job record.
pub async fn execute<O: Operation>(
    dataset: &Dataset,
    mut op: O,
    force: bool,
    cancel: &CancellationToken,
) -> Result<Job> {
    let target = op.target();
    let dependencies = op.dependencies();

    if !force {
        if let Some(target) = &target {
            if !dependencies.is_empty()
                && dataset.tags().is_latest(target, &dependencies).await?
            {
                info!(
                    dataset = %dataset.name(),
                    target = %target,
                    "already up-to-date, skipping"
                );
                let mut job = Job::make(dataset.name(), op.params());
                job.stop(None);
                return Ok(job);
            }
        }
    }

    let job = Job::make(dataset.name(), op.params());
    info!(
        dataset = %dataset.name(),
        run_id = %job.run_id,
        job_type = job.job_type(),
        "starting operation"
    );
    let mut run = dataset.jobs().start(job).await?;
    let touch = target.as_ref().map(|target| dataset.tags().touch(target));

    match op.handle(dataset, &mut run, cancel).await {
        Ok(()) => {
            run.finish(None).await?;
            if let Some(touch) = touch {
                touch.commit(dataset.tags()).await?;
            }
            info!(
                dataset = %dataset.name(),
                run_id = %run.job.run_id,
                done = run.job.done,
                errors = run.job.errors,
                took_secs = run.job.took_secs,
                "operation finished"
            );
            Ok(run.job)
        }
        Err(err) => {
            run.finish(Some(err.to_string())).await?;
            Err(err)
        }
    }
}

/// Flush the journal when it holds statements newer than the last flush.
pub(crate) async fn ensure_flush(dataset: &Dataset, cancel: &CancellationToken) -> Result<()> {
    let flushed = dataset
        .tags()
        .is_latest(tag::JOURNAL_FLUSHED, [tag::JOURNAL_UPDATED])
        .await?;
    if !flushed {
        dataset.entities().flush_with(cancel).await?;
    }
    Ok(())
}

/// Observe a cancellation signal, failing with [LakeError::Cancelled].
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(LakeError::Cancelled);
    }
    Ok(())
}

/// Run the full make workflow: flush the journal, then produce every
/// export and the dataset index, each honoring its freshness gate.
pub async fn make(dataset: &Dataset, force: bool, cancel: &CancellationToken) -> Result<()> {
    dataset.entities().flush_with(cancel).await?;
    export_statements(dataset, force, cancel).await?;
    export_entities(dataset, false, force, cancel).await?;
    export_documents(dataset, false, force, cancel).await?;
    export_statistics(dataset, force, cancel).await?;
    export_index(dataset, force, cancel).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use crate::conventions::path;
    use crate::model::entity::Entity;
    use crate::model::job::RecreateSource;
    use crate::model::mapping::MappingSpec;
    use crate::model::stats::DatasetStats;
    use crate::settings::Settings;
    use crate::storage::object::Storage;
    use crate::storage::parquet::{OptimizeOptions, Query};

    fn dataset() -> Dataset {
        let lake = Storage::memory();
        let settings = Settings {
            journal_uri: "sqlite:///:memory:".to_string(),
            ..Settings::default()
        };
        Dataset::open(&lake, "test", &settings).unwrap()
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    fn person(id: &str, name: &str) -> Entity {
        let mut entity = Entity::new(id, "Person");
        entity.add("name", name);
        entity
    }

    async fn seed_source(keys: &[(&str, &[u8])]) -> Storage {
        let source = Storage::memory();
        for (key, content) in keys {
            source.put(key, Bytes::from(content.to_vec())).await.unwrap();
        }
        source
    }

    async fn export_snapshot(dataset: &Dataset) -> Vec<(String, Bytes)> {
        let mut snapshot = Vec::new();
        for key in [
            path::EXPORTS_STATEMENTS,
            path::ENTITIES_JSON,
            path::EXPORTS_DOCUMENTS,
            path::EXPORTS_STATISTICS,
            path::INDEX,
        ] {
            if dataset.storage().exists(key).await.unwrap() {
                snapshot.push((key.to_string(), dataset.storage().get(key).await.unwrap()));
            }
        }
        snapshot
    }

    #[tokio::test]
    async fn test_crawl_and_make_full_workflow() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        let source = seed_source(&[
            ("docs/a.pdf", b"pdf content a".as_slice()),
            ("docs/b.pdf", b"pdf content b".as_slice()),
            ("notes.txt", b"some notes".as_slice()),
        ])
        .await;

        let mut params = CrawlParams::new("memory://");
        params.make_entities = true;
        let job = crawl_from(&dataset, source, params, false, &cancel())
            .await
            .unwrap();
        assert_eq!(job.done, 3);
        assert_eq!(job.errors, 0);

        dataset.make(false).await.unwrap();
        for key in [
            path::INDEX,
            path::EXPORTS_STATEMENTS,
            path::ENTITIES_JSON,
            path::EXPORTS_DOCUMENTS,
            path::EXPORTS_STATISTICS,
        ] {
            assert!(
                dataset.storage().exists(key).await.unwrap(),
                "missing export `{key}`"
            );
        }

        // 3 files + 1 folder
        let stats: DatasetStats = dataset
            .versions()
            .get_optional(path::EXPORTS_STATISTICS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.entity_count, 4);

        let documents = dataset.documents().stream().await.unwrap();
        assert_eq!(documents.len(), 3);
        assert!(documents
            .iter()
            .any(|d| d.name == "a.pdf" && d.path == "docs"));
    }

    #[tokio::test]
    async fn test_crawl_tag_progression() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        assert!(dataset
            .tags()
            .get(tag::ARCHIVE_UPDATED)
            .await
            .unwrap()
            .is_none());

        let source = seed_source(&[
            ("a.txt", b"content a".as_slice()),
            ("b.txt", b"content b".as_slice()),
        ])
        .await;
        crawl_from(
            &dataset,
            source.clone(),
            CrawlParams::new("memory://"),
            false,
            &cancel(),
        )
        .await
        .unwrap();
        let first = dataset
            .tags()
            .get(tag::ARCHIVE_UPDATED)
            .await
            .unwrap()
            .unwrap();
        let files = dataset.archive().iterate_files().await.unwrap();
        assert_eq!(files.len(), 2);
        let blobs: Vec<Bytes> = {
            let mut blobs = Vec::new();
            for file in &files {
                blobs.push(dataset.archive().open(&file.checksum).await.unwrap());
            }
            blobs
        };

        // re-crawling the same source rewrites no blob content but still
        // advances the archive tag
        crawl_from(
            &dataset,
            source,
            CrawlParams::new("memory://"),
            false,
            &cancel(),
        )
        .await
        .unwrap();
        let second = dataset
            .tags()
            .get(tag::ARCHIVE_UPDATED)
            .await
            .unwrap()
            .unwrap();
        assert!(second > first);
        assert_eq!(dataset.archive().iterate_files().await.unwrap().len(), 2);
        for (file, before) in files.iter().zip(blobs) {
            assert_eq!(
                dataset.archive().open(&file.checksum).await.unwrap(),
                before
            );
        }
    }

    #[tokio::test]
    async fn test_make_skips_when_up_to_date() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        crate::io::write_entities(
            &dataset,
            [person("jane", "Jane Doe"), person("john", "John Smith")].iter(),
            "import",
            false,
        )
        .await
        .unwrap();

        dataset.make(false).await.unwrap();
        let before = export_snapshot(&dataset).await;
        let versions_before = dataset
            .versions()
            .list_versions(path::INDEX)
            .await
            .unwrap()
            .len();

        // nothing changed: a second make rewrites no export and versions
        // nothing new
        dataset.make(false).await.unwrap();
        let after = export_snapshot(&dataset).await;
        assert_eq!(before, after);
        assert_eq!(
            dataset
                .versions()
                .list_versions(path::INDEX)
                .await
                .unwrap()
                .len(),
            versions_before
        );

        // new data makes the next run produce exports again
        crate::io::write_entities(&dataset, [person("bob", "Bob Roe")].iter(), "import", false)
            .await
            .unwrap();
        dataset.make(false).await.unwrap();
        assert!(
            dataset
                .versions()
                .list_versions(path::INDEX)
                .await
                .unwrap()
                .len()
                > versions_before
        );
        let entities = dataset.entities().stream().await.unwrap();
        assert_eq!(entities.len(), 3);
    }

    #[tokio::test]
    async fn test_export_statements_round_trip_via_recreate() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        crate::io::write_entities(
            &dataset,
            [person("jane", "Jane Doe"), person("john", "John Smith")].iter(),
            "import",
            false,
        )
        .await
        .unwrap();
        dataset.make(false).await.unwrap();
        let csv_before = dataset
            .storage()
            .get(path::EXPORTS_STATEMENTS)
            .await
            .unwrap();

        // wipe and rebuild from statements.csv
        recreate(&dataset, RecreateSource::Statements, &cancel())
            .await
            .unwrap();
        let entities = dataset
            .entities()
            .query(&Query::new(), false)
            .await
            .unwrap();
        assert_eq!(entities.len(), 2);

        // the re-exported csv is byte-identical
        dataset
            .entities()
            .statements()
            .export_csv(path::EXPORTS_STATEMENTS)
            .await
            .unwrap();
        let csv_after = dataset
            .storage()
            .get(path::EXPORTS_STATEMENTS)
            .await
            .unwrap();
        assert_eq!(csv_before, csv_after);
    }

    #[tokio::test]
    async fn test_recreate_reingests_crawled_files() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        let source = seed_source(&[("docs/a.pdf", b"pdf content".as_slice())]).await;
        let mut params = CrawlParams::new("memory://");
        params.make_entities = true;
        crawl_from(&dataset, source, params, false, &cancel())
            .await
            .unwrap();
        dataset.make(false).await.unwrap();

        recreate(&dataset, RecreateSource::Auto, &cancel())
            .await
            .unwrap();
        let entities = dataset
            .entities()
            .query(&Query::new(), false)
            .await
            .unwrap();
        // the document and its folder are back
        assert!(entities.iter().any(|e| e.schema == "Folder"));
        assert!(entities.iter().any(|e| e.first("contentHash").is_some()));
    }

    #[tokio::test]
    async fn test_mapping_operation() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        let source = seed_source(&[(
            "people.csv",
            b"person_id,full_name\n1,Jane Doe\n2,John Smith\n".as_slice(),
        )])
        .await;
        let file = crate::io::archive_file(&dataset, &source, "people.csv")
            .await
            .unwrap();

        let spec = MappingSpec::from_yaml(
            b"queries:\n  - schema: Person\n    keys: [person_id]\n    properties:\n      name:\n        column: full_name\n",
        )
        .unwrap();
        dataset.mappings().put(&file.checksum, &spec).await.unwrap();

        let job = process_mapping(&dataset, &file.checksum, false, &cancel())
            .await
            .unwrap();
        assert_eq!(job.done, 2);

        dataset.entities().flush().await.unwrap();
        let origin = tag::mapping_origin(&file.checksum);
        let entities = dataset
            .entities()
            .query(&Query::new().with_origin(&origin), false)
            .await
            .unwrap();
        assert_eq!(entities.len(), 2);

        // unchanged mapping: the second run skips
        let job = process_mapping(&dataset, &file.checksum, false, &cancel())
            .await
            .unwrap();
        assert_eq!(job.done, 0);
        assert!(job.started.is_none());
    }

    #[tokio::test]
    async fn test_download_archive() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        let source = seed_source(&[("docs/a.pdf", b"pdf content".as_slice())]).await;
        let mut params = CrawlParams::new("memory://");
        params.make_entities = true;
        crawl_from(&dataset, source, params, false, &cancel())
            .await
            .unwrap();
        dataset.make(false).await.unwrap();

        let target = Storage::memory();
        let job = download_archive_to(&dataset, target.clone(), false, &cancel())
            .await
            .unwrap();
        assert_eq!(job.done, 1);
        assert_eq!(
            target.get("docs/a.pdf").await.unwrap().as_ref(),
            b"pdf content"
        );

        // second run skips everything
        let job = download_archive_to(&dataset, target, true, &cancel())
            .await
            .unwrap();
        assert_eq!(job.done, 0);
    }

    #[tokio::test]
    async fn test_optimize_operation_gated() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        for name in ["Jane", "John"] {
            crate::io::write_entities(
                &dataset,
                [person(&name.to_lowercase(), name)].iter(),
                "import",
                false,
            )
            .await
            .unwrap();
            dataset.entities().flush().await.unwrap();
        }
        let job = optimize(&dataset, OptimizeOptions::default(), false, &cancel())
            .await
            .unwrap();
        assert!(job.started.is_some());

        // now optimized and gated against re-running
        let job = optimize(&dataset, OptimizeOptions::default(), false, &cancel())
            .await
            .unwrap();
        assert!(job.started.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_operation_records_nothing() {
        let dataset = dataset();
        dataset.ensure().await.unwrap();
        crate::io::write_entities(&dataset, [person("jane", "Jane Doe")].iter(), "import", false)
            .await
            .unwrap();
        let token = cancel();
        token.cancel();
        let err = export_statements(&dataset, true, &token).await;
        // cancellation propagates from the flush inside
        assert!(matches!(err, Err(LakeError::Cancelled)));
        // the target tag was not committed
        assert!(dataset
            .tags()
            .get(path::EXPORTS_STATEMENTS)
            .await
            .unwrap()
            .is_none());
    }
}
