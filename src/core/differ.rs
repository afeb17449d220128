use serde_json::Value;

use crate::error::{MeterError, Result};
use super::snapshot::{MetricsRecord, SnapshotStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub has_changes: bool,
    /// Fields missing from the previous snapshot
    pub added_fields: Vec<String>,
    /// Fields whose value differs from the previous snapshot
    pub modified_fields: Vec<String>,
}

/// Decides whether a fresh record is worth persisting
pub struct SnapshotDiffer {
    ignored_fields: Vec<String>,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self {
            ignored_fields: vec!["time".to_string()],
        }
    }

    pub fn has_changed(&self, record: &MetricsRecord, store: &SnapshotStore) -> Result<bool> {
        Ok(self.diff(record, store)?.has_changes)
    }

    /// Compare every non-ignored field of `record` with the latest snapshot.
    /// With no previous snapshot everything counts as changed.
    pub fn diff(&self, record: &MetricsRecord, store: &SnapshotStore) -> Result<SnapshotDiff> {
        let Some(previous) = store.load_latest()? else {
            return Ok(SnapshotDiff {
                has_changes: true,
                ..SnapshotDiff::default()
            });
        };

        let Value::Object(current) = serde_json::to_value(record)? else {
            return Err(MeterError::Snapshot("record is not a JSON object".to_string()));
        };

        let mut diff = SnapshotDiff::default();
        for (key, value) in &current {
            if self.ignored_fields.contains(key) {
                continue;
            }
            match previous.get(key) {
                None => diff.added_fields.push(key.clone()),
                Some(old) if old != value => diff.modified_fields.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.has_changes = !diff.added_fields.is_empty() || !diff.modified_fields.is_empty();

        Ok(diff)
    }
}

impl Default for SnapshotDiffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(second: u32, words: u64, pages: u64) -> MetricsRecord {
        let time = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, second)
            .unwrap();
        MetricsRecord::new(time, words, pages, BTreeMap::new())
    }

    #[test]
    fn test_empty_history_is_always_changed() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(SnapshotDiffer::new().has_changed(&record(0, 100, 10), &store).unwrap());
    }

    #[test]
    fn test_identical_counts_with_new_time_are_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        store.persist(&record(0, 100, 10)).unwrap();

        let differ = SnapshotDiffer::new();
        assert!(!differ.has_changed(&record(30, 100, 10), &store).unwrap());

        let diff = differ.diff(&record(30, 100, 11), &store).unwrap();
        assert!(diff.has_changes);
        assert_eq!(diff.modified_fields, vec!["page_count".to_string()]);
    }

    #[test]
    fn test_field_missing_from_previous_is_a_change() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("2024-05-01-11:00:00.json"),
            r#"{"time": "2024-05-01 11:00:00", "word_count": 100, "page_count": 10}"#,
        )
        .unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        let diff = SnapshotDiffer::new().diff(&record(0, 100, 10), &store).unwrap();
        assert!(diff.has_changes);
        assert!(diff.added_fields.contains(&"references".to_string()));
        assert!(diff.modified_fields.is_empty());
    }
}
