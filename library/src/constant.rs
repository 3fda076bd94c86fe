use std::sync::LazyLock;

use regex::Regex;

pub const DEFAULT_PREFIX: &str = "snapshots";

pub const DEFAULT_PRUNE_CONCURRENCY: usize = 4;

/// How many sequence numbers are tried for one timestamp before giving up.
pub const MAX_KEY_ATTEMPTS: u32 = 8;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

pub static SNAPSHOT_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8}T\d{6}\.\d{6}Z)-(\d{4})$").expect("Failed to compile snapshot name regex")
});

/// Appended to a snapshot key while its data is still being written.
pub const STAGING_SUFFIX: &str = ".partial";

/// Prefix parts are restricted to characters every backend stores verbatim,
/// so listed keys can be compared with the prefix as given.
pub static PREFIX_PART_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").expect("Failed to compile prefix part regex")
});

/// Parts of one staged upload that may be in flight at once.
pub const UPLOAD_PART_CONCURRENCY: usize = 4;
