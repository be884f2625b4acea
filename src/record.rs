// Persisted record envelope and the no-op write gate

use crate::models::Task;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Envelope around every blob the storage layer persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<T> {
    /// When the record was written (milliseconds since epoch)
    pub stored_at: i64,
    /// Application version that wrote the record
    pub version: String,
    /// Schema revision that wrote the record
    pub schema: u32,
    pub data: T,
}

/// Last-persisted task list for one key (a file path or a pseudo-key like `ics:events`)
pub type AugmentedRecord = StoredRecord<Vec<Task>>;

impl<T> StoredRecord<T> {
    pub fn new(data: T, version: impl Into<String>, schema: u32, stored_at: i64) -> Self {
        Self {
            stored_at,
            version: version.into(),
            schema,
            data,
        }
    }

    /// A record written by a different version or schema is treated as absent
    pub fn is_valid_for(&self, version: &str, schema: u32) -> bool {
        self.version == version && self.schema == schema
    }
}

/// Compare incoming tasks against the last-persisted record for their key.
///
/// No stored record means changed. Otherwise the canonical JSON forms are compared
/// structurally, so field order inside maps never matters.
pub fn has_changed(existing: Option<&AugmentedRecord>, incoming: &[Task]) -> Result<bool> {
    let Some(existing) = existing else {
        return Ok(true);
    };
    tasks_differ(&existing.data, incoming)
}

/// Structural inequality of two task lists in canonical form
pub fn tasks_differ(current: &[Task], incoming: &[Task]) -> Result<bool> {
    let current = serde_json::to_value(current).context("Failed to canonicalize stored tasks")?;
    let incoming = serde_json::to_value(incoming).context("Failed to canonicalize incoming tasks")?;
    Ok(current != incoming)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tasks: Vec<Task>) -> AugmentedRecord {
        StoredRecord::new(tasks, "1.0.0", 1, 1000)
    }

    #[test]
    fn test_missing_record_is_changed() {
        let tasks = vec![Task::new("t1", "a.md", "One")];
        assert!(has_changed(None, &tasks).unwrap());
        // Even an empty list is a change on first write
        assert!(has_changed(None, &[]).unwrap());
    }

    #[test]
    fn test_identical_content_is_unchanged() {
        let tasks = vec![Task::new("t1", "a.md", "One").with_tags(["a", "b"])];
        let stored = record(tasks.clone());
        assert!(!has_changed(Some(&stored), &tasks).unwrap());
    }

    #[test]
    fn test_metadata_difference_is_changed() {
        let tasks = vec![Task::new("t1", "a.md", "One")];
        let stored = record(tasks.clone());
        let edited = vec![Task::new("t1", "a.md", "One").with_priority(3)];
        assert!(has_changed(Some(&stored), &edited).unwrap());
    }

    #[test]
    fn test_order_difference_is_changed() {
        let a = Task::new("t1", "a.md", "One");
        let b = Task::new("t2", "a.md", "Two");
        let stored = record(vec![a.clone(), b.clone()]);
        assert!(has_changed(Some(&stored), &[b, a]).unwrap());
    }

    #[test]
    fn test_version_validity() {
        let stored = record(vec![]);
        assert!(stored.is_valid_for("1.0.0", 1));
        assert!(!stored.is_valid_for("2.0.0", 1));
        assert!(!stored.is_valid_for("1.0.0", 2));
    }
}
