/*!
Incremental diff exports driven by change data capture.

A diff target (entities or documents) keeps its last exported state
(`v<version>_<ts>`) in a tag. The first export is self-contained: the
latest full export is copied into the diff file. Every later export is
strictly incremental: the CDC stream between the last exported version
and the current head is filtered to the target's relevant entity ids and
only those are written. A failed export leaves the state tag unchanged,
so the next run retries cleanly.
*/

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conventions::{path, tag};
use crate::error::{LakeError, Result};
use crate::storage::parquet::{Change, StatementTable};
use crate::storage::tags::TagStore;
use crate::util;

/// Operation kind of a diff envelope line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiffOp {
    /// The entity is new.
    Add,
    /// The entity changed.
    Mod,
    /// The entity was removed; the payload carries only its id.
    Del,
}

/// One NDJSON line of an entities delta file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEnvelope {
    /// Operation kind.
    pub op: DiffOp,
    /// Entity payload (`{"id": …}` only for [DiffOp::Del]).
    pub entity: serde_json::Value,
}

/// A repository that can export CDC-based diffs.
#[async_trait]
pub trait DiffTarget {
    /// The diff base path, e.g. `diffs/entities.ftm.json`.
    fn diff_base(&self) -> &'static str;

    /// Reduce effective CDC changes to the set of affected entity ids.
    fn filter_changes(&self, changes: &[Change]) -> BTreeSet<String>;

    /// Write the self-contained initial diff (a copy of the latest full
    /// export) and return the written key.
    async fn write_initial_diff(&self, version: i64, ts: &DateTime<Utc>) -> Result<String>;

    /// Write an incremental diff for the given entity ids and return the
    /// written key.
    async fn write_diff(
        &self,
        entity_ids: &BTreeSet<String>,
        version: i64,
        ts: &DateTime<Utc>,
    ) -> Result<String>;
}

/// Parse a diff name `v<version>_<TS>` back into its parts.
pub fn unpack_diff_name(name: &str) -> Result<(i64, DateTime<Utc>)> {
    let trimmed = name.split('.').next().unwrap_or(name);
    let (version, ts) = trimmed
        .split_once('_')
        .ok_or_else(|| LakeError::BadInput(format!("invalid diff name `{name}`")))?;
    let version = version
        .strip_prefix('v')
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| LakeError::BadInput(format!("invalid diff name `{name}`")))?;
    Ok((version, util::parse_ts(ts)?))
}

/// Run one diff export for a target. Returns the new diff name, or `None`
/// when there was nothing to export.
pub async fn export_diff<T>(
    target: &T,
    table: &StatementTable,
    tags: &TagStore,
) -> Result<Option<String>>
where
    T: DiffTarget + Sync,
{
    let version = match table.version().await? {
        Some(version) => version,
        // no table yet, nothing to diff
        None => return Ok(None),
    };
    let now = Utc::now();
    let diff_name = path::diff_name(version, &now);
    let state_key = tag::diff_state(target.diff_base());

    let last_version = match tags.get_value(&state_key).await? {
        Some(state) => Some(unpack_diff_name(&state)?.0),
        None => None,
    };

    // no state yet: the table may already be many versions in, so the
    // first diff is a full copy of the current export
    let Some(last_version) = last_version else {
        let key = target.write_initial_diff(version, &now).await?;
        tags.set_value(&state_key, &diff_name).await?;
        info!(base = target.diff_base(), diff = %diff_name, key = %key, "exported initial diff");
        return Ok(Some(diff_name));
    };

    if last_version >= version {
        return Ok(None);
    }

    let changes: Vec<Change> = table
        .get_changes(last_version + 1, version)
        .await?
        .into_iter()
        .filter(|change| change.change_type.is_effective())
        .collect();
    let entity_ids = target.filter_changes(&changes);
    if entity_ids.is_empty() {
        return Ok(None);
    }

    let key = target.write_diff(&entity_ids, version, &now).await?;
    tags.set_value(&state_key, &diff_name).await?;
    info!(
        base = target.diff_base(),
        diff = %diff_name,
        key = %key,
        entities = entity_ids.len(),
        "exported incremental diff"
    );
    Ok(Some(diff_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_diff_name() {
        let (version, ts) = unpack_diff_name("v3_20240116T103000000000Z").unwrap();
        assert_eq!(version, 3);
        assert_eq!(util::format_ts(&ts), "20240116T103000000000Z");
        // file names with suffixes unpack too
        let (version, _) = unpack_diff_name("v12_20240116T103000000000Z.delta.json").unwrap();
        assert_eq!(version, 12);
        assert!(unpack_diff_name("bogus").is_err());
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = DiffEnvelope {
            op: DiffOp::Add,
            entity: serde_json::json!({"id": "jane"}),
        };
        let line = serde_json::to_string(&envelope).unwrap();
        assert_eq!(line, r#"{"op":"ADD","entity":{"id":"jane"}}"#);
        let del = DiffEnvelope {
            op: DiffOp::Del,
            entity: serde_json::json!({"id": "jane"}),
        };
        assert!(serde_json::to_string(&del).unwrap().contains("\"DEL\""));
    }
}
