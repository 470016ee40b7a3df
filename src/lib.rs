#![warn(missing_docs)]
/*!
# lakehouse-rs

A dataset lakehouse engine for entity-graph data: immutable statements
(subject-property-value assertions about entities) are buffered in a durable
[journal](storage::journal), materialised into a partitioned, versioned
parquet [statement table](storage::parquet) and exported as reproducible,
freshness-gated artifacts. Source files live in a content-addressed
[archive](repo::archive) next to the statements derived from them.

The crate is organised in four layers, each depending only on the one below:

* [`storage::object`]: a uniform object-store interface (local filesystem,
  in-memory, S3, HTTP).
* [`storage`]: journal, parquet statement table, tags, versions, lock.
* [`repo`]: one repository per domain (entities, archive, documents,
  mappings, jobs), composing the stores.
* [`ops`]: idempotent, dependency-gated operations (crawl, export,
  optimize, mapping, recreate, download).

Entry points are [`catalog::Lakehouse`] for multi-dataset catalogs,
[`dataset::Dataset`] for a single dataset, and the [`io`] shorthand
functions for embedding applications.
*/

pub mod auth;
pub mod catalog;
pub mod conventions;
pub mod dataset;
pub mod error;
pub mod io;
pub mod model;
pub mod ops;
pub mod repo;
pub mod settings;
pub mod storage;
pub mod util;

pub use object_store;

pub use crate::catalog::Lakehouse;
pub use crate::dataset::Dataset;
pub use crate::error::{LakeError, Result};
pub use crate::model::entity::Entity;
pub use crate::model::statement::Statement;
