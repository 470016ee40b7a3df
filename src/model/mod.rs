/*!
The lakehouse data model: statements and the entities assembled from them,
archive file metadata, job records, dataset configuration and statistics.
*/

pub mod dataset;
pub mod document;
pub mod entity;
pub mod file;
pub mod job;
pub mod mapping;
pub mod ontology;
pub mod statement;
pub mod stats;
