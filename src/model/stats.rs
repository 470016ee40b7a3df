/*!
The `statistics.json` model: entity counts, per-schema and per-country
facets, the seen-date range and the origin breakdown, reduced from a
statement scan.
*/

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::statement::{Statement, ID_PROP};

/// Properties counted into the per-country facet.
const COUNTRY_PROPS: [&str; 4] = ["country", "nationality", "jurisdiction", "mainCountry"];

/// Aggregate statistics over a dataset's statements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Number of distinct entities.
    pub entity_count: u64,
    /// Number of distinct statements.
    pub statement_count: u64,
    /// Entity count per schema.
    #[serde(default)]
    pub schemata: BTreeMap<String, u64>,
    /// Entity count per country value.
    #[serde(default)]
    pub countries: BTreeMap<String, u64>,
    /// Statement count per origin.
    #[serde(default)]
    pub origins: BTreeMap<String, u64>,
    /// Earliest first-seen over all statements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest: Option<DateTime<Utc>>,
    /// Latest last-seen over all statements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<DateTime<Utc>>,
}

/// Incremental reducer building [DatasetStats] from a statement scan.
#[derive(Debug, Default)]
pub struct StatsReducer {
    entities: BTreeSet<String>,
    schemata: BTreeMap<String, BTreeSet<String>>,
    countries: BTreeMap<String, BTreeSet<String>>,
    origins: BTreeMap<String, u64>,
    statement_count: u64,
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
}

impl StatsReducer {
    /// Start an empty reduction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one statement.
    pub fn add(&mut self, stmt: &Statement) {
        self.statement_count += 1;
        self.entities.insert(stmt.canonical_id.clone());
        if stmt.prop == ID_PROP {
            self.schemata
                .entry(stmt.schema.clone())
                .or_default()
                .insert(stmt.canonical_id.clone());
        }
        if COUNTRY_PROPS.contains(&stmt.prop.as_str()) {
            self.countries
                .entry(stmt.value.clone())
                .or_default()
                .insert(stmt.canonical_id.clone());
        }
        *self.origins.entry(stmt.origin.clone()).or_default() += 1;
        self.earliest = Some(match self.earliest {
            Some(seen) => seen.min(stmt.first_seen),
            None => stmt.first_seen,
        });
        self.latest = Some(match self.latest {
            Some(seen) => seen.max(stmt.last_seen),
            None => stmt.last_seen,
        });
    }

    /// Finish the reduction.
    pub fn finish(self) -> DatasetStats {
        DatasetStats {
            entity_count: self.entities.len() as u64,
            statement_count: self.statement_count,
            schemata: self
                .schemata
                .into_iter()
                .map(|(schema, ids)| (schema, ids.len() as u64))
                .collect(),
            countries: self
                .countries
                .into_iter()
                .map(|(country, ids)| (country, ids.len() as u64))
                .collect(),
            origins: self.origins,
            earliest: self.earliest,
            latest: self.latest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::Entity;

    #[test]
    fn test_reduce() {
        let mut jane = Entity::new("jane", "Person");
        jane.add("name", "Jane Doe");
        jane.add("nationality", "us");
        let mut acme = Entity::new("acme", "Company");
        acme.add("name", "ACME Inc");

        let mut reducer = StatsReducer::new();
        for stmt in jane.to_statements("test", "import") {
            reducer.add(&stmt);
        }
        for stmt in acme.to_statements("test", "crawl") {
            reducer.add(&stmt);
        }
        let stats = reducer.finish();

        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.statement_count, 5);
        assert_eq!(stats.schemata.get("Person"), Some(&1));
        assert_eq!(stats.schemata.get("Company"), Some(&1));
        assert_eq!(stats.countries.get("us"), Some(&1));
        assert_eq!(stats.origins.get("import"), Some(&3));
        assert_eq!(stats.origins.get("crawl"), Some(&2));
        assert!(stats.earliest.is_some());
    }
}
