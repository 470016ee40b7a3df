/*!
The [Statement] is the atomic unit of persistence: one
subject-property-value assertion about an entity, carrying its dataset,
provenance and seen-range.

The statement id is a pure function of `(canonical_id, prop, value,
dataset, lang, origin, external)`; re-inserting a statement with identical
fields is a no-op everywhere in the engine.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ontology::{self, Bucket};
use crate::util::{self, data_checksum};

/// Sentinel property marking entity existence.
pub const ID_PROP: &str = "id";

/// A single subject-property-value assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Deterministic hash of the content fields, see [make_statement_id].
    pub id: String,
    /// Logical entity identifier as asserted by the writer.
    pub entity_id: String,
    /// Canonical entity identifier after id resolution. Equals `entity_id`
    /// unless a merge occurred.
    pub canonical_id: String,
    /// Type name in the ontology, e.g. `Person`, `Company`, `Document`.
    pub schema: String,
    /// Property name on that schema, or the sentinel [ID_PROP].
    pub prop: String,
    /// Textual value. All values are strings at rest.
    pub value: String,
    /// Owning dataset name.
    pub dataset: String,
    /// Optional BCP-47 language tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Free-form provenance tag, e.g. `import`, `crawl`, `mapping:<hash>`.
    pub origin: String,
    /// Statements from external references.
    #[serde(default)]
    pub external: bool,
    /// First time this assertion was seen.
    #[serde(with = "util::stmt_ts")]
    pub first_seen: DateTime<Utc>,
    /// Most recent time this assertion was seen.
    #[serde(with = "util::stmt_ts")]
    pub last_seen: DateTime<Utc>,
}

/// Compute the deterministic statement id.
pub fn make_statement_id(
    canonical_id: &str,
    prop: &str,
    value: &str,
    dataset: &str,
    lang: Option<&str>,
    origin: &str,
    external: bool,
) -> String {
    data_checksum([
        canonical_id,
        prop,
        value,
        dataset,
        lang.unwrap_or(""),
        origin,
        if external { "true" } else { "false" },
    ])
}

impl Statement {
    /// Create a statement, deriving its id and stamping the seen-range with
    /// the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_id: &str,
        schema: &str,
        prop: &str,
        value: &str,
        dataset: &str,
        origin: &str,
        lang: Option<&str>,
        external: bool,
    ) -> Self {
        let now = Utc::now();
        Statement {
            id: make_statement_id(entity_id, prop, value, dataset, lang, origin, external),
            entity_id: entity_id.to_string(),
            canonical_id: entity_id.to_string(),
            schema: schema.to_string(),
            prop: prop.to_string(),
            value: value.to_string(),
            dataset: dataset.to_string(),
            lang: lang.map(str::to_string),
            origin: origin.to_string(),
            external,
            first_seen: now,
            last_seen: now,
        }
    }

    /// The partition bucket, derived from the schema.
    pub fn bucket(&self) -> Bucket {
        ontology::bucket(&self.schema)
    }

    /// True for the entity-existence statement.
    pub fn is_id_statement(&self) -> bool {
        self.prop == ID_PROP
    }

    /// Recompute the id from the current content fields. Used to validate
    /// rows on ingest.
    pub fn expected_id(&self) -> String {
        make_statement_id(
            &self.canonical_id,
            &self.prop,
            &self.value,
            &self.dataset,
            self.lang.as_deref(),
            &self.origin,
            self.external,
        )
    }
}

/// The columns of the statements CSV export, in order.
pub const CSV_COLUMNS: [&str; 12] = [
    "id",
    "entity_id",
    "canonical_id",
    "schema",
    "prop",
    "value",
    "dataset",
    "lang",
    "origin",
    "external",
    "first_seen",
    "last_seen",
];

impl Statement {
    /// The CSV record for this statement, matching [CSV_COLUMNS].
    pub fn to_csv_record(&self) -> [String; 12] {
        [
            self.id.clone(),
            self.entity_id.clone(),
            self.canonical_id.clone(),
            self.schema.clone(),
            self.prop.clone(),
            self.value.clone(),
            self.dataset.clone(),
            self.lang.clone().unwrap_or_default(),
            self.origin.clone(),
            if self.external { "true" } else { "false" }.to_string(),
            util::format_stmt_ts(&self.first_seen),
            util::format_stmt_ts(&self.last_seen),
        ]
    }

    /// Parse a statement from a CSV record, as written by
    /// [Statement::to_csv_record].
    pub fn from_csv_record(record: &csv::StringRecord) -> crate::Result<Self> {
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        let lang = field(7);
        Ok(Statement {
            id: field(0),
            entity_id: field(1),
            canonical_id: field(2),
            schema: field(3),
            prop: field(4),
            value: field(5),
            dataset: field(6),
            lang: if lang.is_empty() { None } else { Some(lang) },
            origin: field(8),
            external: field(9) == "true",
            first_seen: util::parse_stmt_ts(&field(10))?,
            last_seen: util::parse_stmt_ts(&field(11))?,
        })
    }
}
