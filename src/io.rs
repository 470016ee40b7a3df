/*!
High-level input/output shorthand functions for embedding applications:
write and stream entities, look one up, archive a file. Each function
takes a [Dataset] handle and ensures it exists before touching it.
*/

use crate::dataset::Dataset;
use crate::error::Result;
use crate::model::entity::Entity;
use crate::model::file::File;
use crate::repo::archive::StoreOptions;
use crate::repo::entities::BulkWriter;
use crate::storage::object::Storage;

/// A bulk entity writer scope for the given origin. Close the writer to
/// commit.
pub async fn entity_writer(dataset: &Dataset, origin: &str) -> Result<BulkWriter> {
    dataset.ensure().await?;
    Ok(dataset.entities().bulk(Some(origin)))
}

/// Write entities into the dataset's journal, returning how many were
/// written. With `update`, the full make workflow runs afterwards.
pub async fn write_entities<'a, I>(
    dataset: &Dataset,
    entities: I,
    origin: &str,
    update: bool,
) -> Result<u64>
where
    I: IntoIterator<Item = &'a Entity>,
{
    dataset.ensure().await?;
    let mut count = 0;
    let mut bulk = dataset.entities().bulk(Some(origin));
    for entity in entities {
        bulk.add_entity(entity)?;
        count += 1;
    }
    bulk.close().await?;
    if update {
        dataset.make(false).await?;
    }
    Ok(count)
}

/// Stream entities from the dataset's aggregated export.
pub async fn stream_entities(dataset: &Dataset) -> Result<Vec<Entity>> {
    dataset.entities().stream().await
}

/// Look up one entity by id, flushing pending journal writes first.
pub async fn get_entity(dataset: &Dataset, entity_id: &str) -> Result<Option<Entity>> {
    dataset.entities().get(entity_id, None).await
}

/// Archive a single file from a source store.
pub async fn archive_file(dataset: &Dataset, source: &Storage, key: &str) -> Result<File> {
    dataset.ensure().await?;
    dataset
        .archive()
        .store(source, key, StoreOptions::default())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn dataset() -> Dataset {
        let lake = Storage::memory();
        let settings = Settings {
            journal_uri: "sqlite:///:memory:".to_string(),
            ..Settings::default()
        };
        Dataset::open(&lake, "test", &settings).unwrap()
    }

    fn person(id: &str, name: &str) -> Entity {
        let mut entity = Entity::new(id, "Person");
        entity.add("name", name);
        entity
    }

    #[tokio::test]
    async fn test_write_flush_stream_round_trip() {
        let dataset = dataset();
        let people = [person("jane", "Jane Doe"), person("john", "John Smith")];
        let written = write_entities(&dataset, people.iter(), "import", true)
            .await
            .unwrap();
        assert_eq!(written, 2);

        let streamed = stream_entities(&dataset).await.unwrap();
        assert_eq!(streamed.len(), 2);
        let jane = get_entity(&dataset, "jane").await.unwrap().unwrap();
        assert_eq!(jane.first("name"), Some("Jane Doe"));
        assert!(jane.context.origin.contains("import"));
    }

    #[tokio::test]
    async fn test_archive_file() {
        let dataset = dataset();
        let source = Storage::memory();
        source
            .put("report.pdf", bytes::Bytes::from_static(b"content"))
            .await
            .unwrap();
        let file = archive_file(&dataset, &source, "report.pdf").await.unwrap();
        assert!(dataset.archive().exists(&file.checksum).await.unwrap());
    }
}
