/*!
A minimal mapping model for turning archived CSV files into entities.

A `mapping.yml` declares one or more queries; each query produces one
entity per CSV row, with an id derived from the key columns and properties
taken from columns or literals. Full ontology mapping template languages
are external to this crate; this model covers the subset the mapping
operation executes directly.
*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};
use crate::model::entity::Entity;
use crate::util::data_checksum;

/// Where a mapped property value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertySource {
    /// Take the value from a CSV column.
    Column {
        /// Column name.
        column: String,
    },
    /// Use a fixed value for every row.
    Literal {
        /// The literal value.
        literal: String,
    },
}

/// One query of a mapping: a schema, key columns and property sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingQuery {
    /// Ontology schema of the produced entities.
    pub schema: String,
    /// Columns whose values compose the entity id.
    pub keys: Vec<String>,
    /// Property name to value source.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySource>,
}

/// A parsed `mapping.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSpec {
    /// The queries to run per CSV row.
    pub queries: Vec<MappingQuery>,
}

impl MappingSpec {
    /// Parse a `mapping.yml` document.
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let spec: MappingSpec = serde_yaml::from_slice(data)?;
        if spec.queries.is_empty() {
            return Err(LakeError::BadInput("mapping has no queries".to_string()));
        }
        for query in &spec.queries {
            if query.keys.is_empty() {
                return Err(LakeError::BadInput(format!(
                    "mapping query for `{}` has no key columns",
                    query.schema
                )));
            }
        }
        Ok(spec)
    }

    /// Serialise back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Run the mapping over CSV data, producing entities row by row. Rows
    /// with empty key values are skipped.
    pub fn entities(&self, csv_data: &[u8]) -> Result<Vec<Entity>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(csv_data);
        let headers = reader.headers()?.clone();
        let index: BTreeMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();

        for query in &self.queries {
            for column in query.columns() {
                if !index.contains_key(column.as_str()) {
                    return Err(LakeError::BadInput(format!(
                        "mapping column `{column}` missing from CSV header"
                    )));
                }
            }
        }

        let mut entities = Vec::new();
        for record in reader.records() {
            let record = record?;
            for query in &self.queries {
                if let Some(entity) = query.map_record(&record, &index) {
                    entities.push(entity);
                }
            }
        }
        Ok(entities)
    }
}

impl MappingQuery {
    fn columns(&self) -> Vec<String> {
        let mut columns = self.keys.clone();
        for source in self.properties.values() {
            if let PropertySource::Column { column } = source {
                columns.push(column.clone());
            }
        }
        columns
    }

    fn map_record(
        &self,
        record: &csv::StringRecord,
        index: &BTreeMap<&str, usize>,
    ) -> Option<Entity> {
        let cell = |column: &str| {
            index
                .get(column)
                .and_then(|i| record.get(*i))
                .unwrap_or_default()
                .trim()
        };
        let key_values: Vec<&str> = self.keys.iter().map(|column| cell(column)).collect();
        if key_values.iter().any(|value| value.is_empty()) {
            return None;
        }
        let id = format!(
            "{}-{}",
            self.schema.to_ascii_lowercase(),
            data_checksum(&key_values)
        );
        let mut entity = Entity::new(&id, &self.schema);
        for (prop, source) in &self.properties {
            match source {
                PropertySource::Column { column } => {
                    entity.add(prop, cell(column).to_string());
                }
                PropertySource::Literal { literal } => {
                    entity.add(prop, literal.clone());
                }
            }
        }
        Some(entity)
    }
}
