/*!
The tag store: `(key → timestamp)` markers under `tags/<tenant>/`, used for
freshness tracking. Every mutation updates a tag; every export checks
whether its target tag is fresher than all of its dependency tags and
skips otherwise.

Timestamps are stored with nanosecond precision, so wall-clock ties
effectively never occur; comparisons are strict.
*/

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::conventions::path;
use crate::error::{LakeError, Result};
use crate::storage::object::Storage;

/// Timestamp tags scoped to a tenant within one dataset's storage.
#[derive(Debug, Clone)]
pub struct TagStore {
    storage: Storage,
    tenant: Option<String>,
}

impl TagStore {
    /// Open the tag store on a dataset's storage with the default tenant.
    pub fn new(storage: Storage) -> Self {
        TagStore {
            storage,
            tenant: None,
        }
    }

    /// Open the tag store for a specific tenant.
    pub fn with_tenant(storage: Storage, tenant: &str) -> Self {
        TagStore {
            storage,
            tenant: Some(tenant.to_string()),
        }
    }

    fn key_path(&self, key: &str) -> String {
        path::tag(key, self.tenant.as_deref())
    }

    /// Whether a tag exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.storage.exists(&self.key_path(key)).await
    }

    /// The timestamp of a tag, or `None` when unset.
    pub async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get_value(key).await? {
            Some(value) => {
                let ts = DateTime::parse_from_rfc3339(value.trim())
                    .map_err(|e| LakeError::Corruption(format!("invalid tag `{key}`: {e}")))?;
                Ok(Some(ts.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    /// The raw string value of a tag, or `None` when unset. Some tags (the
    /// diff export state) store names rather than timestamps.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        match self.storage.get(&self.key_path(key)).await {
            Ok(data) => Ok(Some(String::from_utf8_lossy(&data).to_string())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Set a tag to the given timestamp, defaulting to the current UTC
    /// time. Returns the stored timestamp.
    pub async fn set(&self, key: &str, ts: Option<DateTime<Utc>>) -> Result<DateTime<Utc>> {
        let ts = ts.unwrap_or_else(Utc::now);
        let value = ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.storage
            .put(&self.key_path(key), Bytes::from(value.into_bytes()))
            .await?;
        Ok(ts)
    }

    /// Store a raw string value for a tag.
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.storage
            .put(&self.key_path(key), Bytes::from(value.to_string().into_bytes()))
            .await
    }

    /// Remove a tag.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.storage.delete(&self.key_path(key)).await
    }

    /// Begin a touch scope: the current time is captured now and committed
    /// to the tag by [TagTouch::commit]. Dropping the touch without
    /// committing leaves the tag unchanged.
    pub fn touch(&self, key: &str) -> TagTouch {
        TagTouch {
            key: key.to_string(),
            ts: Utc::now(),
        }
    }

    /// True iff the tag at `key` is set and strictly newer than every set
    /// dependency tag. When no dependency is set at all, the result is
    /// `false`: absence of evidence is treated as stale.
    pub async fn is_latest<I, S>(&self, key: &str, dependencies: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let last_updated = match self.get(key).await? {
            Some(ts) => ts,
            None => return Ok(false),
        };
        let mut seen_any = false;
        for dependency in dependencies {
            if let Some(ts) = self.get(dependency.as_ref()).await? {
                seen_any = true;
                if last_updated <= ts {
                    return Ok(false);
                }
            }
        }
        Ok(seen_any)
    }
}

/// A pending tag update: entry time captured at creation, committed on
/// normal exit paths only.
#[must_use = "a touch updates its tag only when committed"]
pub struct TagTouch {
    key: String,
    ts: DateTime<Utc>,
}

impl TagTouch {
    /// The captured entry timestamp.
    pub fn ts(&self) -> DateTime<Utc> {
        self.ts
    }

    /// Commit the captured timestamp to the tag.
    pub async fn commit(self, tags: &TagStore) -> Result<DateTime<Utc>> {
        tags.set(&self.key, Some(self.ts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tags() -> TagStore {
        TagStore::new(Storage::memory())
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let tags = tags();
        assert!(tags.get("statements/last_updated").await.unwrap().is_none());
        let ts = tags.set("statements/last_updated", None).await.unwrap();
        let stored = tags.get("statements/last_updated").await.unwrap().unwrap();
        assert_eq!(stored, ts);
        assert!(tags.exists("statements/last_updated").await.unwrap());
    }

    #[tokio::test]
    async fn test_nanosecond_precision_survives() {
        let tags = tags();
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        tags.set("k", Some(ts)).await.unwrap();
        assert_eq!(tags.get("k").await.unwrap().unwrap(), ts);
    }

    #[tokio::test]
    async fn test_is_latest() {
        let tags = tags();
        let t1 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t2 = Utc.timestamp_opt(1_700_000_001, 0).unwrap();

        // unset key is never latest
        assert!(!tags.is_latest("target", ["dep"]).await.unwrap());

        // no dependency set at all: conservative false
        tags.set("target", Some(t2)).await.unwrap();
        assert!(!tags.is_latest("target", ["dep"]).await.unwrap());

        tags.set("dep", Some(t1)).await.unwrap();
        assert!(tags.is_latest("target", ["dep"]).await.unwrap());

        // strictly greater: equal is stale
        tags.set("dep", Some(t2)).await.unwrap();
        assert!(!tags.is_latest("target", ["dep"]).await.unwrap());

        // one newer dependency spoils it
        tags.set("dep", Some(t1)).await.unwrap();
        tags.set("dep2", Some(Utc.timestamp_opt(1_700_000_002, 0).unwrap()))
            .await
            .unwrap();
        assert!(!tags.is_latest("target", ["dep", "dep2"]).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_commits_entry_time() {
        let tags = tags();
        let touch = tags.touch("k");
        let entry = touch.ts();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let stored = touch.commit(&tags).await.unwrap();
        assert_eq!(stored, entry);
        assert_eq!(tags.get("k").await.unwrap().unwrap(), entry);
    }

    #[tokio::test]
    async fn test_uncommitted_touch_leaves_tag() {
        let tags = tags();
        {
            let _touch = tags.touch("k");
            // dropped without commit
        }
        assert!(tags.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_value_tags() {
        let tags = tags();
        tags.set_value("diffs/entities.ftm.json-current", "v3_x")
            .await
            .unwrap();
        assert_eq!(
            tags.get_value("diffs/entities.ftm.json-current")
                .await
                .unwrap()
                .as_deref(),
            Some("v3_x")
        );
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let storage = Storage::memory();
        let a = TagStore::new(storage.clone());
        let b = TagStore::with_tenant(storage, "other");
        a.set("k", None).await.unwrap();
        assert!(b.get("k").await.unwrap().is_none());
    }
}
