/*!
A small, static view of the entity ontology: which schemata describe
relationships (and land in the `intervals` bucket), which belong to the
document family, and how MIME types map to document schemata.
*/

use std::collections::HashSet;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Coarse partition for statements, derived from the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Concrete entities: people, companies, documents, …
    Thing,
    /// Relationships between entities, usually bounded in time.
    Intervals,
}

impl Bucket {
    /// The partition directory value for this bucket.
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Thing => "thing",
            Bucket::Intervals => "intervals",
        }
    }

    /// Parse a partition directory value.
    pub fn parse(value: &str) -> Option<Bucket> {
        match value {
            "thing" => Some(Bucket::Thing),
            "intervals" => Some(Bucket::Intervals),
            _ => None,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

lazy_static! {
    static ref INTERVAL_SCHEMATA: HashSet<&'static str> = HashSet::from([
        "Ownership",
        "Directorship",
        "Membership",
        "Employment",
        "Representation",
        "Family",
        "Associate",
        "Succession",
        "UnknownLink",
        "Payment",
        "Debt",
        "Sanction",
        "Occupancy",
    ]);
    static ref DOCUMENT_SCHEMATA: HashSet<&'static str> = HashSet::from([
        "Document",
        "Pages",
        "HyperText",
        "Table",
        "Workbook",
        "Image",
        "Video",
        "Audio",
        "Email",
        "PlainText",
        "Package",
        "Folder",
    ]);
    static ref MIME_SCHEMATA: Vec<(&'static [&'static str], &'static str)> = vec![
        (
            &[
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            ][..],
            "Pages",
        ),
        (&["text/html", "text/xml", "application/xml"][..], "HyperText"),
        (
            &[
                "text/csv",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ][..],
            "Table",
        ),
        (
            &["image/png", "image/gif", "image/jpeg", "image/tiff"][..],
            "Image",
        ),
        (
            &["application/vnd.ms-outlook", "message/rfc822"][..],
            "Email",
        ),
        (&["text/plain", "application/rtf"][..], "PlainText"),
    ];
}

/// Derive the partition bucket for a schema.
pub fn bucket(schema: &str) -> Bucket {
    if INTERVAL_SCHEMATA.contains(schema) {
        Bucket::Intervals
    } else {
        Bucket::Thing
    }
}

/// True if the schema belongs to the document family (including `Folder`).
pub fn is_document(schema: &str) -> bool {
    DOCUMENT_SCHEMATA.contains(schema)
}

/// True for the `Folder` schema.
pub fn is_folder(schema: &str) -> bool {
    schema == "Folder"
}

/// Map a MIME type to its document schema, defaulting to `Document`.
pub fn mime_to_schema(mimetype: &str) -> &'static str {
    for (mimes, schema) in MIME_SCHEMATA.iter() {
        if mimes.iter().any(|mime| *mime == mimetype) {
            return schema;
        }
    }
    "Document"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_derivation() {
        assert_eq!(bucket("Person"), Bucket::Thing);
        assert_eq!(bucket("Company"), Bucket::Thing);
        assert_eq!(bucket("Ownership"), Bucket::Intervals);
        assert_eq!(bucket("Family"), Bucket::Intervals);
    }

    #[test]
    fn test_document_family() {
        assert!(is_document("Document"));
        assert!(is_document("Pages"));
        assert!(is_document("Folder"));
        assert!(!is_document("Person"));
        assert!(is_folder("Folder"));
        assert!(!is_folder("Pages"));
    }

    #[test]
    fn test_mime_to_schema() {
        assert_eq!(mime_to_schema("application/pdf"), "Pages");
        assert_eq!(mime_to_schema("text/csv"), "Table");
        assert_eq!(mime_to_schema("application/octet-stream"), "Document");
    }

    #[test]
    fn test_bucket_round_trip() {
        assert_eq!(Bucket::parse("thing"), Some(Bucket::Thing));
        assert_eq!(Bucket::parse("intervals"), Some(Bucket::Intervals));
        assert_eq!(Bucket::parse("bogus"), None);
    }
}
