/*!
Hashing and timestamp helpers shared across the crate.

All derived identifiers (statement ids, file ids, folder ids) are
lowercase-hex SHA-1 digests over their input fields joined with an ASCII
record separator, so they are stable across runs and platforms.
*/

use chrono::{DateTime, NaiveDateTime, Utc};
use sha1::{Digest, Sha1};

use crate::error::{LakeError, Result};

/// Field separator for composite hash inputs.
const SEP: u8 = 0x1e;

/// Compact timestamp format used in file names: `20240116T103000123456Z`.
pub const TS_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

/// Timestamp format used for statement columns in parquet and CSV exports.
pub const STMT_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Compute the lowercase-hex SHA-1 digest of the given parts, joined with a
/// record separator.
pub fn data_checksum<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha1::new();
    let mut first = true;
    for part in parts {
        if !first {
            hasher.update([SEP]);
        }
        hasher.update(part.as_ref());
        first = false;
    }
    hex::encode(hasher.finalize())
}

/// Compute the lowercase-hex SHA-1 of a byte slice.
pub fn sha1_digest(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Incremental SHA-1 over streamed chunks.
#[derive(Default)]
pub struct ChecksumWriter {
    hasher: Sha1,
    size: u64,
}

impl ChecksumWriter {
    /// Start a new digest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Finish, returning `(checksum, total_size)`.
    pub fn finish(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.size)
    }
}

/// Split a SHA-1 checksum into the archive fan-out key:
/// `5a6acf22…` becomes `5a/6a/cf/5a6acf22…`.
///
/// Fails with [LakeError::BadInput] unless the checksum is 40 lowercase hex
/// characters.
pub fn checksum_key(checksum: &str) -> Result<String> {
    if checksum.len() != 40 || !checksum.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(LakeError::BadInput(format!(
            "invalid checksum: `{checksum}`"
        )));
    }
    let checksum = checksum.to_ascii_lowercase();
    Ok(format!(
        "{}/{}/{}/{}",
        &checksum[..2],
        &checksum[2..4],
        &checksum[4..6],
        checksum
    ))
}

/// Format a timestamp in the compact file-name format.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a compact file-name timestamp.
pub fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, TS_FORMAT)
        .map_err(|e| LakeError::BadInput(format!("invalid timestamp `{value}`: {e}")))?;
    Ok(naive.and_utc())
}

/// Format a statement timestamp column.
pub fn format_stmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format(STMT_TS_FORMAT).to_string()
}

/// Parse a statement timestamp column.
pub fn parse_stmt_ts(value: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, STMT_TS_FORMAT)
        .map_err(|e| LakeError::BadInput(format!("invalid timestamp `{value}`: {e}")))?;
    Ok(naive.and_utc())
}

/// Serde adapter for statement timestamps, keeping the JSON representation
/// identical to the parquet and CSV columns.
pub mod stmt_ts {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    use super::STMT_TS_FORMAT;

    /// Serialize as `%Y-%m-%dT%H:%M:%S%.6f`.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(STMT_TS_FORMAT).to_string())
    }

    /// Deserialize from `%Y-%m-%dT%H:%M:%S%.6f`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&value, STMT_TS_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_data_checksum_stable() {
        let a = data_checksum(["jane", "name", "Jane Doe"]);
        let b = data_checksum(["jane", "name", "Jane Doe"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        // separator prevents ambiguous concatenation
        assert_ne!(
            data_checksum(["ab", "c"]),
            data_checksum(["a", "bc"])
        );
    }

    #[test]
    fn test_checksum_key() {
        let key = checksum_key("5a6acf229ba576d9a40b09292595658bbb74ef56").unwrap();
        assert_eq!(key, "5a/6a/cf/5a6acf229ba576d9a40b09292595658bbb74ef56");
        assert!(checksum_key("abc").is_err());
        assert!(checksum_key("zz6acf229ba576d9a40b09292595658bbb74ef56").is_err());
    }

    #[test]
    fn test_ts_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 16, 10, 30, 0).unwrap();
        let compact = format_ts(&ts);
        assert_eq!(compact, "20240116T103000000000Z");
        assert_eq!(parse_ts(&compact).unwrap(), ts);

        let col = format_stmt_ts(&ts);
        assert_eq!(col, "2024-01-16T10:30:00.000000");
        assert_eq!(parse_stmt_ts(&col).unwrap(), ts);
    }
}
