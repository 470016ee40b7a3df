/*!
An [Entity] is a derived view over all statements sharing a canonical id.
Entities are never stored; they are materialised on read and serialised to
NDJSON for the aggregated export.

Properties have set semantics: multi-valued, insertion order irrelevant.
The origin of an entity is the set of origins of its constituent
statements.
*/

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};
use crate::model::statement::{Statement, ID_PROP};

/// Provenance context carried by a serialised entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityContext {
    /// Origins of the constituent statements.
    #[serde(default)]
    pub origin: BTreeSet<String>,
}

/// A view over the set of statements sharing a canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical entity id.
    pub id: String,
    /// Ontology schema name.
    pub schema: String,
    /// Multi-valued properties with set semantics.
    #[serde(default)]
    pub properties: BTreeMap<String, BTreeSet<String>>,
    /// Datasets contributing statements to this entity.
    #[serde(default)]
    pub datasets: BTreeSet<String>,
    /// Provenance context.
    #[serde(default)]
    pub context: EntityContext,
    /// Earliest first-seen of any constituent statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    /// Latest last-seen of any constituent statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Entity {
    /// Create an empty entity of the given schema.
    pub fn new(id: &str, schema: &str) -> Self {
        Entity {
            id: id.to_string(),
            schema: schema.to_string(),
            properties: BTreeMap::new(),
            datasets: BTreeSet::new(),
            context: EntityContext::default(),
            first_seen: None,
            last_seen: None,
        }
    }

    /// Add a property value. Empty values are dropped.
    pub fn add(&mut self, prop: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if !value.is_empty() {
            self.properties.entry(prop.to_string()).or_default().insert(value);
        }
        self
    }

    /// All values of a property.
    pub fn get(&self, prop: &str) -> impl Iterator<Item = &str> {
        self.properties
            .get(prop)
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    /// The first value of a property, if any.
    pub fn first(&self, prop: &str) -> Option<&str> {
        self.get(prop).next()
    }

    /// A human-readable caption: the first `name`, `fileName` or `title`
    /// value, falling back to the id.
    pub fn caption(&self) -> &str {
        for prop in ["name", "fileName", "title"] {
            if let Some(value) = self.first(prop) {
                return value;
            }
        }
        &self.id
    }

    /// Expand this entity into its statements for the given dataset and
    /// origin: one entity-existence statement plus one statement per
    /// property value.
    pub fn to_statements(&self, dataset: &str, origin: &str) -> Vec<Statement> {
        let mut statements = vec![Statement::new(
            &self.id,
            &self.schema,
            ID_PROP,
            &self.id,
            dataset,
            origin,
            None,
            false,
        )];
        for (prop, values) in &self.properties {
            for value in values {
                statements.push(Statement::new(
                    &self.id,
                    &self.schema,
                    prop,
                    value,
                    dataset,
                    origin,
                    None,
                    false,
                ));
            }
        }
        statements
    }

    /// Assemble an entity from statements sharing a canonical id. The
    /// statements may span origins and datasets; the seen-range is the
    /// union. Fails with [LakeError::BadInput] on an empty input.
    pub fn from_statements<'a, I>(statements: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Statement>,
    {
        let mut entity: Option<Entity> = None;
        for stmt in statements {
            let e = entity.get_or_insert_with(|| Entity::new(&stmt.canonical_id, &stmt.schema));
            if !stmt.is_id_statement() {
                e.add(&stmt.prop, stmt.value.clone());
            } else {
                // the existence statement carries the authoritative schema
                e.schema = stmt.schema.clone();
            }
            e.datasets.insert(stmt.dataset.clone());
            e.context.origin.insert(stmt.origin.clone());
            e.first_seen = Some(match e.first_seen {
                Some(seen) => seen.min(stmt.first_seen),
                None => stmt.first_seen,
            });
            e.last_seen = Some(match e.last_seen {
                Some(seen) => seen.max(stmt.last_seen),
                None => stmt.last_seen,
            });
        }
        entity.ok_or_else(|| LakeError::BadInput("no statements to assemble".to_string()))
    }

    /// Serialise to a single minified NDJSON line (without the trailing
    /// newline).
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a single NDJSON line.
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jane() -> Entity {
        let mut entity = Entity::new("jane", "Person");
        entity.add("name", "Jane Doe");
        entity
    }

    #[test]
    fn test_statement_expansion() {
        let statements = jane().to_statements("test", "import");
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().any(|s| s.prop == ID_PROP && s.value == "jane"));
        assert!(statements.iter().any(|s| s.prop == "name" && s.value == "Jane Doe"));
    }

    #[test]
    fn test_round_trip_through_statements() {
        let statements = jane().to_statements("test", "import");
        let entity = Entity::from_statements(statements.iter()).unwrap();
        assert_eq!(entity.id, "jane");
        assert_eq!(entity.schema, "Person");
        assert_eq!(entity.first("name"), Some("Jane Doe"));
        assert!(entity.context.origin.contains("import"));
        assert!(entity.datasets.contains("test"));
    }

    #[test]
    fn test_fragment_merge_across_origins() {
        let mut statements = jane().to_statements("test", "a");
        let mut fragment = Entity::new("jane", "Person");
        fragment.add("firstName", "Jane");
        statements.extend(fragment.to_statements("test", "b"));

        let entity = Entity::from_statements(statements.iter()).unwrap();
        assert_eq!(entity.first("name"), Some("Jane Doe"));
        assert_eq!(entity.first("firstName"), Some("Jane"));
        assert!(entity.context.origin.contains("a"));
        assert!(entity.context.origin.contains("b"));
    }

    #[test]
    fn test_set_semantics() {
        let mut entity = jane();
        entity.add("name", "Jane Doe");
        entity.add("name", "Jane Doe");
        assert_eq!(entity.get("name").count(), 1);
        entity.add("name", "");
        assert_eq!(entity.get("name").count(), 1);
    }

    #[test]
    fn test_json_line_round_trip() {
        let entity = jane();
        let line = entity.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(Entity::from_json_line(&line).unwrap(), entity);
    }

    #[test]
    fn test_empty_assembly_is_bad_input() {
        assert!(Entity::from_statements(std::iter::empty()).is_err());
    }
}
