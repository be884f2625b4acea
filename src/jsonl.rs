// Line-delimited JSON journal files

use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Append one record as a single line. Concurrent appenders are serialized by an exclusive lock.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_string(record).context("Failed to serialize journal record")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open journal {}", path.display()))?;
    file.lock_exclusive().context("Failed to acquire journal lock")?;

    file.write_all(line.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read every journaled record in file order. Unreadable or malformed lines are logged and skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).with_context(|| format!("Failed to open journal {}", path.display()))?;
    FileExt::lock_shared(&file).context("Failed to acquire shared journal lock")?;

    let mut records = Vec::new();
    for (index, line) in BufReader::new(&file).lines().enumerate() {
        let line_no = index + 1;
        let text = match line {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => text,
            Err(e) => {
                warn!(path = ?path, line_no, error = ?e, "Unreadable journal line, skipping");
                continue;
            }
        };

        match serde_json::from_str::<T>(&text) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = ?path, line_no, error = ?e, "Malformed journal line, skipping"),
        }
    }

    debug!(path = ?path, count = records.len(), "Read journal");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Line {
        seq: u64,
        name: String,
    }

    #[test]
    fn test_append_jsonl() {
        let temp = TempDir::new().unwrap();
        let jsonl_path = temp.path().join("events.jsonl");

        append_jsonl(&jsonl_path, &Line { seq: 1, name: "one".to_string() }).unwrap();
        append_jsonl(&jsonl_path, &Line { seq: 2, name: "two".to_string() }).unwrap();

        let content = fs::read_to_string(&jsonl_path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"seq\":1"));
    }

    #[test]
    fn test_read_jsonl_preserves_order() {
        let temp = TempDir::new().unwrap();
        let jsonl_path = temp.path().join("events.jsonl");

        for seq in 1..=3 {
            append_jsonl(&jsonl_path, &Line { seq, name: format!("e{}", seq) }).unwrap();
        }

        let lines: Vec<Line> = read_jsonl(&jsonl_path).unwrap();
        let seqs: Vec<u64> = lines.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_read_jsonl_nonexistent() {
        let temp = TempDir::new().unwrap();
        let jsonl_path = temp.path().join("nonexistent.jsonl");

        let lines: Vec<Line> = read_jsonl(&jsonl_path).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_read_jsonl_malformed_line() {
        let temp = TempDir::new().unwrap();
        let jsonl_path = temp.path().join("events.jsonl");

        // Write valid record, then malformed, then another valid
        fs::write(
            &jsonl_path,
            "{\"seq\":1,\"name\":\"a\"}\n{malformed json}\n\n{\"seq\":2,\"name\":\"b\"}\n",
        )
        .unwrap();

        let lines: Vec<Line> = read_jsonl(&jsonl_path).unwrap();
        // Should skip malformed line and load the two valid records
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], Line { seq: 2, name: "b".to_string() });
    }
}
