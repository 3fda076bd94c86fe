use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::{
    constant::{PREFIX_PART_REGEX, SNAPSHOT_NAME_REGEX, TIMESTAMP_FORMAT},
    error::BackupError,
    store::BlobInfo,
};

const MAX_SEQUENCE: u16 = 9999;

/// The ordered part of a snapshot key: a UTC timestamp with microsecond
/// precision followed by a four digit sequence number.
///
/// Both parts are fixed width, so comparing two names lexically gives the
/// same answer as comparing them by creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName {
    pub timestamp: DateTime<Utc>,
    pub sequence: u16,
}

impl SnapshotName {
    pub fn new(timestamp: DateTime<Utc>, sequence: u16) -> Self {
        let timestamp =
            DateTime::from_timestamp_micros(timestamp.timestamp_micros()).unwrap_or(timestamp);

        SnapshotName {
            timestamp,
            sequence: sequence.min(MAX_SEQUENCE),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let captures = SNAPSHOT_NAME_REGEX.captures(name)?;

        let timestamp = NaiveDateTime::parse_from_str(&captures[1], TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();
        let sequence = captures[2].parse().ok()?;

        Some(SnapshotName { timestamp, sequence })
    }

    /// The smallest name that sorts after this one.
    pub fn successor(&self) -> Self {
        match self.sequence {
            MAX_SEQUENCE => {
                SnapshotName::new(self.timestamp + chrono::Duration::microseconds(1), 0)
            }
            sequence => SnapshotName::new(self.timestamp, sequence + 1),
        }
    }

    pub fn to_key(&self, prefix: &str) -> String {
        join_key(prefix, &self.to_string())
    }

    pub fn from_key(key: &str, prefix: &str) -> Option<Self> {
        let name = match normalize_prefix(prefix) {
            "" => key,
            prefix => key.strip_prefix(prefix)?.strip_prefix('/')?,
        };

        SnapshotName::parse(name)
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.sequence
        )
    }
}

/// A snapshot that currently exists in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub key: String,
    #[serde(skip)]
    pub name: SnapshotName,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl Snapshot {
    /// Returns `None` for blobs under the prefix that are not snapshots.
    pub fn from_blob(blob: BlobInfo, prefix: &str) -> Option<Self> {
        let name = SnapshotName::from_key(&blob.key, prefix)?;

        Some(Snapshot {
            key: blob.key,
            name,
            created_at: name.timestamp,
            size_bytes: blob.size,
        })
    }

    /// Creation order, oldest first. Equal creation times fall back to the key.
    pub fn creation_order(&self, other: &Self) -> std::cmp::Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.key.cmp(&other.key))
    }
}

pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_matches('/')
}

/// Normalizes `prefix` and rejects it unless every `/`-separated part is made
/// of ASCII letters, digits, `.`, `_` and `-` and does not start with a dot.
/// Stores such as S3 escape other characters in the keys they list, which
/// would hide existing snapshots from the agent.
pub fn validate_prefix(prefix: &str) -> Result<&str, BackupError> {
    let normalized = normalize_prefix(prefix);

    if normalized.is_empty()
        || normalized
            .split('/')
            .all(|part| PREFIX_PART_REGEX.is_match(part))
    {
        return Ok(normalized);
    }

    Err(BackupError::InvalidArgument(format!(
        "prefix {prefix:?} may only contain ASCII letters, digits, '.', '_', '-' and '/' separators"
    )))
}

pub fn join_key(prefix: &str, name: &str) -> String {
    match normalize_prefix(prefix) {
        "" => name.to_string(),
        prefix => format!("{}/{}", prefix, name),
    }
}
