// Data models for the task repository

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A to-do item parsed from a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub file_path: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub original_markdown: String,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

fn default_status() -> String {
    " ".to_string()
}

/// Indexable metadata attached to a task. Dates are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_completion: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, file_path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            original_markdown: format!("- [ ] {}", content),
            content,
            file_path: file_path.into(),
            line: 0,
            completed: false,
            status: default_status(),
            metadata: TaskMetadata::default(),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.metadata.project = Some(project.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.metadata.priority = Some(priority);
        self
    }

    pub fn with_due(mut self, due_ms: i64) -> Self {
        self.metadata.due_date = Some(due_ms);
        self
    }

    pub fn with_start(mut self, start_ms: i64) -> Self {
        self.metadata.start_date = Some(start_ms);
        self
    }

    pub fn with_scheduled(mut self, scheduled_ms: i64) -> Self {
        self.metadata.scheduled_date = Some(scheduled_ms);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Mark the task done, stamping the completion date
    pub fn complete(mut self, at_ms: i64) -> Self {
        self.completed = true;
        self.status = "x".to_string();
        self.original_markdown = format!("- [x] {}", self.content);
        self.metadata.completed_date = Some(at_ms);
        self
    }
}

/// Helper function to get current timestamp in milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format an epoch-ms timestamp as the `YYYY-MM-DD` key used by the date indexes
pub fn format_date_key(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => "invalid".to_string(),
    }
}

/// Parse a `YYYY-MM-DD` key back to epoch ms at UTC midnight
pub fn parse_date_key(key: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms() {
        let ts = now_ms();
        assert!(ts > 0);
        // Should be reasonable timestamp (after year 2020)
        assert!(ts > 1_600_000_000_000);
    }

    #[test]
    fn test_date_key_roundtrip_is_midnight() {
        // 2024-03-15T13:45:00Z
        let ms = 1_710_510_300_000;
        let key = format_date_key(ms);
        assert_eq!(key, "2024-03-15");
        assert_eq!(parse_date_key(&key), Some(1_710_460_800_000));
    }

    #[test]
    fn test_parse_date_key_rejects_garbage() {
        assert_eq!(parse_date_key("invalid"), None);
        assert_eq!(parse_date_key("2024-13-01"), None);
    }

    #[test]
    fn test_task_deserialize_with_defaults() {
        let json = r#"{"id":"t1","content":"Write docs","file_path":"notes/a.md"}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.status, " ");
        assert!(!task.completed);
        assert!(task.metadata.tags.is_empty());
    }

    #[test]
    fn test_complete_sets_status_and_date() {
        let task = Task::new("t1", "a.md", "Ship it").complete(1000);
        assert!(task.completed);
        assert_eq!(task.status, "x");
        assert_eq!(task.metadata.completed_date, Some(1000));
        assert_eq!(task.original_markdown, "- [x] Ship it");
    }

    #[test]
    fn test_optional_metadata_skipped_when_empty() {
        let task = Task::new("t1", "a.md", "Plain");
        let json = serde_json::to_string(&task).unwrap();
        assert!(!json.contains("project"));
        assert!(!json.contains("depends_on"));
    }
}
