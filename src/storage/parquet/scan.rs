/*!
Columnar scans over the statement table with predicate push-down: bucket
and origin filters prune whole partitions before any file is fetched,
statement filters apply per batch, and entity assembly regroups the
surviving statements per canonical id.
*/

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::model::entity::Entity;
use crate::model::ontology::Bucket;
use crate::model::statement::Statement;
use crate::storage::parquet::log::FileEntry;
use crate::storage::parquet::StatementTable;

/// Statement and entity filters for a table scan.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Restrict to these entity ids.
    pub entity_ids: Option<BTreeSet<String>>,
    /// Restrict to one origin partition.
    pub origin: Option<String>,
    /// Restrict to one bucket partition.
    pub bucket: Option<Bucket>,
    /// Restrict assembled entities to one schema.
    pub schema: Option<String>,
    /// Restrict assembled entities to a set of schemata.
    pub schemata: Option<BTreeSet<String>>,
}

impl Query {
    /// An unrestricted query.
    pub fn new() -> Self {
        Query::default()
    }

    /// Restrict to the given entity ids.
    pub fn with_entity_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to one origin.
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = Some(origin.to_string());
        self
    }

    /// Restrict to one bucket.
    pub fn with_bucket(mut self, bucket: Bucket) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Restrict to one schema.
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// Restrict to a set of schemata.
    pub fn with_schemata<I, S>(mut self, schemata: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemata = Some(schemata.into_iter().map(Into::into).collect());
        self
    }

    fn prunes_file(&self, file: &FileEntry) -> bool {
        if let Some(bucket) = self.bucket {
            if file.bucket != bucket.as_str() {
                return true;
            }
        }
        if let Some(origin) = &self.origin {
            if &file.origin != origin {
                return true;
            }
        }
        false
    }

    fn matches_statement(&self, stmt: &Statement) -> bool {
        if let Some(ids) = &self.entity_ids {
            if !ids.contains(&stmt.canonical_id) && !ids.contains(&stmt.entity_id) {
                return false;
            }
        }
        if let Some(origin) = &self.origin {
            if &stmt.origin != origin {
                return false;
            }
        }
        if let Some(bucket) = self.bucket {
            if stmt.bucket() != bucket {
                return false;
            }
        }
        true
    }

    fn matches_entity(&self, entity: &Entity) -> bool {
        if let Some(schema) = &self.schema {
            if &entity.schema != schema {
                return false;
            }
        }
        if let Some(schemata) = &self.schemata {
            if !schemata.contains(&entity.schema) {
                return false;
            }
        }
        true
    }
}

/// De-duplicate statements on id. Duplicate ids carry identical content by
/// construction; only the seen-range widens.
pub(crate) fn dedupe_statements(statements: Vec<Statement>) -> Vec<Statement> {
    let mut seen: BTreeMap<String, Statement> = BTreeMap::new();
    for stmt in statements {
        match seen.get_mut(&stmt.id) {
            Some(existing) => {
                existing.first_seen = existing.first_seen.min(stmt.first_seen);
                existing.last_seen = existing.last_seen.max(stmt.last_seen);
            }
            None => {
                seen.insert(stmt.id.clone(), stmt);
            }
        }
    }
    seen.into_values().collect()
}

impl StatementTable {
    /// Scan matching statements, de-duplicated on id and ordered on
    /// `(canonical_id, prop, value, origin)`.
    pub async fn query_statements(&self, query: &Query) -> Result<Vec<Statement>> {
        let snapshot = self.log().snapshot(None).await?;
        let mut matched = Vec::new();
        for file in &snapshot.files {
            if query.prunes_file(file) {
                continue;
            }
            for stmt in self.read_file(file).await? {
                if query.matches_statement(&stmt) {
                    matched.push(stmt);
                }
            }
        }
        let mut statements = dedupe_statements(matched);
        statements.sort_by(|a, b| {
            (&a.canonical_id, &a.prop, &a.value, &a.origin)
                .cmp(&(&b.canonical_id, &b.prop, &b.value, &b.origin))
        });
        Ok(statements)
    }

    /// Scan matching statements and reassemble them into entities per
    /// canonical id, ordered by entity id.
    pub async fn query(&self, query: &Query) -> Result<Vec<Entity>> {
        let statements = self.query_statements(query).await?;
        let mut grouped: BTreeMap<&str, Vec<&Statement>> = BTreeMap::new();
        for stmt in &statements {
            grouped.entry(&stmt.canonical_id).or_default().push(stmt);
        }
        let mut entities = Vec::new();
        for (_, group) in grouped {
            let entity = Entity::from_statements(group.into_iter())?;
            if query.matches_entity(&entity) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// The single entity for an id, or `None`.
    pub async fn get_entity(&self, entity_id: &str, origin: Option<&str>) -> Result<Option<Entity>> {
        let mut query = Query::new().with_entity_ids([entity_id]);
        if let Some(origin) = origin {
            query = query.with_origin(origin);
        }
        Ok(self.query(&query).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object::Storage;

    async fn seeded_table() -> StatementTable {
        let table = StatementTable::new(Storage::memory(), "test");
        let mut writer = table.writer(Some("a"));
        let mut jane = Entity::new("jane", "Person");
        jane.add("name", "Jane Doe");
        writer.add_entity(&jane, "test").unwrap();
        writer.flush().await.unwrap();

        let mut writer = table.writer(Some("b"));
        let mut fragment = Entity::new("jane", "Person");
        fragment.add("firstName", "Jane");
        writer.add_entity(&fragment, "test").unwrap();
        let mut acme = Entity::new("acme", "Company");
        acme.add("name", "ACME Inc");
        writer.add_entity(&acme, "test").unwrap();
        writer.flush().await.unwrap();
        table
    }

    #[tokio::test]
    async fn test_query_assembles_entities() {
        let table = seeded_table().await;
        let entities = table.query(&Query::new()).await.unwrap();
        assert_eq!(entities.len(), 2);
        // ordered by id
        assert_eq!(entities[0].id, "acme");
        assert_eq!(entities[1].id, "jane");

        let jane = &entities[1];
        assert_eq!(jane.first("name"), Some("Jane Doe"));
        assert_eq!(jane.first("firstName"), Some("Jane"));
        assert!(jane.context.origin.contains("a"));
        assert!(jane.context.origin.contains("b"));
    }

    #[tokio::test]
    async fn test_origin_filter() {
        let table = seeded_table().await;
        let entity = table.get_entity("jane", Some("a")).await.unwrap().unwrap();
        assert_eq!(entity.first("name"), Some("Jane Doe"));
        assert!(entity.first("firstName").is_none());
        assert_eq!(
            entity.context.origin.iter().collect::<Vec<_>>(),
            vec!["a"]
        );
    }

    #[tokio::test]
    async fn test_entity_id_filter() {
        let table = seeded_table().await;
        let entities = table
            .query(&Query::new().with_entity_ids(["acme"]))
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "acme");
    }

    #[tokio::test]
    async fn test_schema_filter() {
        let table = seeded_table().await;
        let entities = table
            .query(&Query::new().with_schema("Company"))
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "acme");
    }

    #[tokio::test]
    async fn test_missing_entity_is_none() {
        let table = seeded_table().await;
        assert!(table.get_entity("nobody", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reinsert_does_not_grow_store() {
        let table = seeded_table().await;
        let before = table.query_statements(&Query::new()).await.unwrap().len();
        let mut writer = table.writer(Some("a"));
        let mut jane = Entity::new("jane", "Person");
        jane.add("name", "Jane Doe");
        writer.add_entity(&jane, "test").unwrap();
        writer.flush().await.unwrap();
        let after = table.query_statements(&Query::new()).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[test]
    fn test_dedupe_widens_seen_range() {
        let mut a = Statement::new("jane", "Person", "name", "Jane", "test", "x", None, false);
        let mut b = a.clone();
        a.first_seen = a.first_seen - chrono::Duration::hours(1);
        b.last_seen = b.last_seen + chrono::Duration::hours(1);
        let deduped = dedupe_statements(vec![a.clone(), b.clone()]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].first_seen, a.first_seen);
        assert_eq!(deduped[0].last_seen, b.last_seen);
    }
}
