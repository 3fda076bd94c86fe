use itertools::Itertools;

use crate::{error::BackupError, snapshot::Snapshot};

/// Keeps the `max_snapshots` most recent snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_snapshots: usize,
}

impl RetentionPolicy {
    pub fn new(max_snapshots: usize) -> Result<Self, BackupError> {
        if max_snapshots == 0 {
            return Err(BackupError::InvalidArgument(
                "retention count must be at least 1".to_string(),
            ));
        }

        Ok(RetentionPolicy { max_snapshots })
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Splits `snapshots` into the ones to prune and the ones to keep, both in
    /// creation order, oldest first.
    pub fn partition(&self, snapshots: Vec<Snapshot>) -> (Vec<Snapshot>, Vec<Snapshot>) {
        let mut sorted = snapshots
            .into_iter()
            .sorted_by(Snapshot::creation_order)
            .collect::<Vec<_>>();

        let excess = sorted.len().saturating_sub(self.max_snapshots);
        let keep = sorted.split_off(excess);

        (sorted, keep)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::snapshot::SnapshotName;

    fn snapshot(secs: i64) -> Snapshot {
        let timestamp: DateTime<Utc> = Utc.timestamp_opt(secs, 0).unwrap();
        let name = SnapshotName::new(timestamp, 0);

        Snapshot {
            key: name.to_key("snapshots"),
            name,
            created_at: timestamp,
            size_bytes: 0,
        }
    }

    #[test]
    fn test_zero_retention_is_rejected() {
        assert!(matches!(
            RetentionPolicy::new(0),
            Err(BackupError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_partition_prunes_oldest() {
        let policy = RetentionPolicy::new(3).unwrap();
        let snapshots = vec![snapshot(4), snapshot(1), snapshot(5), snapshot(3), snapshot(2)];

        let (prune, keep) = policy.partition(snapshots);

        assert_eq!(prune, vec![snapshot(1), snapshot(2)]);
        assert_eq!(keep, vec![snapshot(3), snapshot(4), snapshot(5)]);
    }

    #[test]
    fn test_partition_under_limit_is_noop() {
        let policy = RetentionPolicy::new(3).unwrap();

        let (prune, keep) = policy.partition(vec![snapshot(2), snapshot(1)]);

        assert!(prune.is_empty());
        assert_eq!(keep, vec![snapshot(1), snapshot(2)]);
    }
}
