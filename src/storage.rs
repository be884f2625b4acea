// Durable storage for augmented task lists, the consolidated snapshot and ICS events

use crate::config::{RepositoryConfig, STORE_DIR};
use crate::indexer::IndexSnapshot;
use crate::models::{Task, now_ms};
use crate::record::{AugmentedRecord, StoredRecord};
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const NS_AUGMENTED: &str = "augmented";
const NS_CONSOLIDATED: &str = "consolidated";
const NS_ICS: &str = "ics";
/// Bookkeeping that outlives `clear`
const NS_META: &str = "meta";
const CONSOLIDATED_KEY: &str = "taskIndex";
const ICS_KEY: &str = "events";
const LAST_SEQ_KEY: &str = "lastSeq";

pub type ConsolidatedRecord = StoredRecord<IndexSnapshot>;

/// Operations the repository consumes from a durable store
pub trait Storage {
    fn load_consolidated(&self) -> Result<Option<ConsolidatedRecord>>;

    fn store_consolidated(&mut self, snapshot: &IndexSnapshot) -> Result<()>;

    fn load_augmented(&self, key: &str) -> Result<Option<AugmentedRecord>>;

    /// Overwrite the task list stored for `key`
    fn store_augmented(&mut self, key: &str, tasks: &[Task]) -> Result<()>;

    /// Drop everything stored for one file
    fn clear_file(&mut self, key: &str) -> Result<()>;

    fn load_ics_events(&self) -> Result<Vec<Task>>;

    fn store_ics_events(&mut self, events: &[Task]) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    fn list_augmented_paths(&self) -> Result<Vec<String>>;
}

/// Record counts per namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub augmented: usize,
    pub consolidated: usize,
    pub ics: usize,
}

/// SQLite-backed [`Storage`]
pub struct SqliteStorage {
    base_path: PathBuf,
    db: Connection,
    version: String,
    schema: u32,
}

impl SqliteStorage {
    /// Open or create a store at the given path
    ///
    /// The store will be created in a `.taskrepo` subdirectory of the given path.
    pub fn open<P: AsRef<Path>>(path: P, config: &RepositoryConfig) -> Result<Self> {
        let base_path = path.as_ref().join(STORE_DIR);

        // Create directory if it doesn't exist
        fs::create_dir_all(&base_path).context("Failed to create store directory")?;

        // Open SQLite database
        let db_path = base_path.join("taskrepo.db");
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;

        let store = Self {
            base_path,
            db,
            version: config.version.clone(),
            schema: config.schema,
        };

        store.create_schema()?;
        store.create_gitignore()?;
        store.write_version()?;

        info!(path = ?store.base_path, version = %store.version, "Opened storage");
        Ok(store)
    }

    /// Get the base path of this store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Where the event journal for this store lives
    pub fn journal_path(&self) -> PathBuf {
        self.base_path.join("events.jsonl")
    }

    /// Create database schema
    fn create_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                data_json TEXT NOT NULL,
                version TEXT NOT NULL,
                schema INTEGER NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            CREATE INDEX IF NOT EXISTS idx_blobs_namespace ON blobs(namespace);
            "#,
        )?;

        Ok(())
    }

    /// Create .gitignore file
    fn create_gitignore(&self) -> Result<()> {
        let gitignore_path = self.base_path.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(
                gitignore_path,
                "taskrepo.db\ntaskrepo.db-shm\ntaskrepo.db-wal\nevents.jsonl\n",
            )?;
        }
        Ok(())
    }

    /// Write version file
    fn write_version(&self) -> Result<()> {
        let version_path = self.base_path.join(".version");
        if !version_path.exists() {
            fs::write(version_path, self.schema.to_string())?;
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<StorageStats> {
        let mut stmt = self
            .db
            .prepare("SELECT namespace, COUNT(*) FROM blobs GROUP BY namespace")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut stats = StorageStats::default();
        for row in rows {
            let (namespace, count) = row?;
            let count = count as usize;
            match namespace.as_str() {
                NS_AUGMENTED => stats.augmented = count,
                NS_CONSOLIDATED => stats.consolidated = count,
                NS_ICS => stats.ics = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Highest event sequence number recorded by a previous session
    pub fn last_sequence(&self) -> Result<Option<u64>> {
        Ok(self.load_blob::<u64>(NS_META, LAST_SEQ_KEY)?.map(|r| r.data))
    }

    pub fn record_last_sequence(&self, seq: u64) -> Result<()> {
        debug!(seq, "Recording last sequence");
        self.store_blob(NS_META, LAST_SEQ_KEY, &seq)
    }

    fn load_blob<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord<T>>> {
        let row = self
            .db
            .query_row(
                "SELECT data_json, version, schema, stored_at FROM blobs WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((data_json, version, schema, stored_at)) = row else {
            return Ok(None);
        };
        let raw = StoredRecord::new(data_json, version, schema, stored_at);

        if !raw.is_valid_for(&self.version, self.schema) {
            info!(namespace, key, version = %raw.version, schema = raw.schema, "Stored record version mismatch, discarding");
            self.delete_blob(namespace, key)?;
            return Ok(None);
        }

        let data: T = serde_json::from_str(&raw.data)
            .with_context(|| format!("Failed to deserialize {} record {}", namespace, key))?;
        Ok(Some(StoredRecord::new(data, raw.version, raw.schema, raw.stored_at)))
    }

    fn store_blob<T: Serialize + ?Sized>(&self, namespace: &str, key: &str, data: &T) -> Result<()> {
        let data_json = serde_json::to_string(data).context("Failed to serialize record")?;
        self.db.execute(
            "INSERT OR REPLACE INTO blobs (namespace, key, data_json, version, schema, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![namespace, key, data_json, self.version, self.schema, now_ms()],
        )?;
        Ok(())
    }

    fn delete_blob(&self, namespace: &str, key: &str) -> Result<()> {
        self.db.execute(
            "DELETE FROM blobs WHERE namespace = ?1 AND key = ?2",
            rusqlite::params![namespace, key],
        )?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn load_consolidated(&self) -> Result<Option<ConsolidatedRecord>> {
        let record = self.load_blob::<IndexSnapshot>(NS_CONSOLIDATED, CONSOLIDATED_KEY)?;
        match &record {
            Some(r) => debug!(tasks = r.data.task_count(), "Loaded consolidated snapshot"),
            None => debug!("No consolidated snapshot found"),
        }
        Ok(record)
    }

    fn store_consolidated(&mut self, snapshot: &IndexSnapshot) -> Result<()> {
        debug!(files = snapshot.files.len(), "Storing consolidated snapshot");
        self.store_blob(NS_CONSOLIDATED, CONSOLIDATED_KEY, snapshot)
    }

    fn load_augmented(&self, key: &str) -> Result<Option<AugmentedRecord>> {
        self.load_blob(NS_AUGMENTED, key)
    }

    fn store_augmented(&mut self, key: &str, tasks: &[Task]) -> Result<()> {
        self.store_blob(NS_AUGMENTED, key, tasks)
    }

    fn clear_file(&mut self, key: &str) -> Result<()> {
        self.delete_blob(NS_AUGMENTED, key)
    }

    fn load_ics_events(&self) -> Result<Vec<Task>> {
        Ok(self
            .load_blob::<Vec<Task>>(NS_ICS, ICS_KEY)?
            .map(|r| r.data)
            .unwrap_or_default())
    }

    fn store_ics_events(&mut self, events: &[Task]) -> Result<()> {
        debug!(count = events.len(), "Storing ICS events");
        self.store_blob(NS_ICS, ICS_KEY, events)
    }

    fn clear(&mut self) -> Result<()> {
        info!("Clearing storage");
        self.db
            .execute("DELETE FROM blobs WHERE namespace != ?1", rusqlite::params![NS_META])?;
        Ok(())
    }

    fn list_augmented_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .db
            .prepare("SELECT key FROM blobs WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt.query_map([NS_AUGMENTED], |row| row.get::<_, String>(0))?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }
}

/// In-memory [`Storage`] for ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStorage {
    consolidated: Option<ConsolidatedRecord>,
    augmented: BTreeMap<String, AugmentedRecord>,
    ics_events: Vec<Task>,
    version: String,
    schema: u32,
}

impl MemoryStorage {
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            version: config.version.clone(),
            schema: config.schema,
            ..Self::default()
        }
    }

    fn wrap<T>(&self, data: T) -> StoredRecord<T> {
        StoredRecord::new(data, self.version.clone(), self.schema, now_ms())
    }
}

impl Storage for MemoryStorage {
    fn load_consolidated(&self) -> Result<Option<ConsolidatedRecord>> {
        Ok(self.consolidated.clone())
    }

    fn store_consolidated(&mut self, snapshot: &IndexSnapshot) -> Result<()> {
        self.consolidated = Some(self.wrap(snapshot.clone()));
        Ok(())
    }

    fn load_augmented(&self, key: &str) -> Result<Option<AugmentedRecord>> {
        Ok(self.augmented.get(key).cloned())
    }

    fn store_augmented(&mut self, key: &str, tasks: &[Task]) -> Result<()> {
        let record = self.wrap(tasks.to_vec());
        self.augmented.insert(key.to_string(), record);
        Ok(())
    }

    fn clear_file(&mut self, key: &str) -> Result<()> {
        self.augmented.remove(key);
        Ok(())
    }

    fn load_ics_events(&self) -> Result<Vec<Task>> {
        Ok(self.ics_events.clone())
    }

    fn store_ics_events(&mut self, events: &[Task]) -> Result<()> {
        self.ics_events = events.to_vec();
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.consolidated = None;
        self.augmented.clear();
        self.ics_events.clear();
        Ok(())
    }

    fn list_augmented_paths(&self) -> Result<Vec<String>> {
        Ok(self.augmented.keys().cloned().collect())
    }
}
