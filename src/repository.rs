// Task repository: coordinates the index, durable storage and change notifications

use crate::clock::{Clock, SystemClock};
use crate::config::RepositoryConfig;
use crate::events::{CacheReady, CacheStats, Context, EventBus, EventPayload, TaskCacheUpdated};
use crate::filter::{SortCriterion, TaskFilter};
use crate::indexer::{DateField, IdSet, Indexer, TaskIndexer};
use crate::models::{Task, parse_date_key};
use crate::record;
use crate::scheduler::{PersistScheduler, ScheduleDecision};
use crate::storage::{SqliteStorage, Storage};
use eyre::{Context as _, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Pseudo-key under which ICS events are reported
pub const ICS_EVENTS_KEY: &str = "ics:events";
/// Prefix for dirty-source tokens and changed-file entries of file-level tasks
pub const FILE_TASK_PREFIX: &str = "file-task:";

/// Per-call controls for mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Write the per-key blob and schedule a snapshot
    pub persist: bool,
    /// Emit an event even when nothing changed
    pub force_emit: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            persist: true,
            force_emit: false,
        }
    }
}

impl UpdateOptions {
    pub fn forced() -> Self {
        Self {
            force_emit: true,
            ..Self::default()
        }
    }

    /// Update the index only, leaving storage untouched
    pub fn in_memory() -> Self {
        Self {
            persist: false,
            ..Self::default()
        }
    }
}

/// Inclusive date window; an absent bound is open on that side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub field: DateField,
}

impl DateRange {
    fn contains(&self, ms: i64) -> bool {
        self.from.is_none_or(|from| ms >= from) && self.to.is_none_or(|to| ms <= to)
    }
}

/// Counts grouped over the index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub total: usize,
    pub by_project: BTreeMap<String, usize>,
    pub by_tag: BTreeMap<String, usize>,
    pub by_status: BTreeMap<bool, usize>,
}

/// Central data layer for task records.
///
/// Mutations run DIFF -> APPLY_INDEX -> BLOB_WRITE -> SCHEDULE_SNAPSHOT -> EMIT. The index
/// is always updated, the per-key blob is always rewritten when persisting, but snapshot
/// scheduling and event emission only happen when content actually changed (or the
/// caller forces emission).
pub struct Repository<I: Indexer = TaskIndexer, S: Storage = SqliteStorage> {
    indexer: I,
    storage: S,
    bus: Arc<dyn EventBus>,
    context: Arc<Context>,
    clock: Arc<dyn Clock>,
    scheduler: PersistScheduler,
    scope: String,
    ics_events: Vec<Task>,
    file_tasks: BTreeMap<String, Task>,
    last_sequence: u64,
}

impl<I: Indexer, S: Storage> Repository<I, S> {
    pub fn new(indexer: I, storage: S, bus: Arc<dyn EventBus>, context: Arc<Context>, config: &RepositoryConfig) -> Self {
        Self {
            indexer,
            storage,
            bus,
            context,
            clock: Arc::new(SystemClock),
            scheduler: PersistScheduler::new(config.persist.clone()),
            scope: config.app_id.clone(),
            ics_events: Vec::new(),
            file_tasks: BTreeMap::new(),
            last_sequence: 0,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load the persisted snapshot and ICS events.
    ///
    /// Never fails: anything that cannot be loaded is logged and the repository
    /// continues from empty state for that part.
    pub fn initialize(&mut self) {
        info!("Initializing repository");

        let restored = match self.restore_snapshot() {
            Ok(restored) => restored,
            Err(e) => {
                error!(error = ?e, "Failed to restore persisted index, continuing with empty index");
                self.indexer.clear_index();
                false
            }
        };

        match self.storage.load_ics_events() {
            Ok(events) => {
                info!(count = events.len(), "Loaded ICS events from storage");
                self.ics_events = events;
            }
            Err(e) => {
                error!(error = ?e, "Failed to load ICS events, continuing without them");
                self.ics_events.clear();
            }
        }

        // Memory now mirrors what is on disk
        let now = self.clock.now_ms();
        self.scheduler.complete(now);

        if restored {
            let seq = self.next_seq();
            let payload = EventPayload::CacheReady(CacheReady {
                initial: true,
                timestamp: now,
                seq,
            });
            if let Err(e) = self.bus.emit(&self.scope, payload.name(), &payload) {
                warn!(error = ?e, "Failed to emit cache ready event");
            }
        }
    }

    fn restore_snapshot(&mut self) -> Result<bool> {
        let Some(record) = self
            .storage
            .load_consolidated()
            .context("Failed to load consolidated snapshot")?
        else {
            info!("No persisted snapshot found, starting with empty index");
            return Ok(false);
        };

        info!(tasks = record.data.task_count(), "Found persisted snapshot, restoring");
        self.indexer
            .restore_from_snapshot(record.data)
            .context("Failed to restore index from snapshot")?;
        info!(tasks = self.indexer.total_task_count(), "Index restored");
        Ok(true)
    }

    /// Flush any queued snapshot work. Failures propagate.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.execute_persist()? {
            info!("Flushed pending persistence on cleanup");
        }
        Ok(())
    }

    /// Drop the index, storage, auxiliary collections and any queued persistence
    pub fn clear(&mut self, source_seq: u64) -> Result<()> {
        // Storage goes first: on failure memory must still match what is on disk
        self.storage.clear().context("Failed to clear storage")?;

        let removed = self.total_task_count();
        let mut changed_files = self.indexer.file_paths();
        self.indexer.clear_index();
        self.scheduler.reset();

        if !self.ics_events.is_empty() {
            changed_files.push(ICS_EVENTS_KEY.to_string());
        }
        changed_files.extend(self.file_tasks.keys().map(|p| format!("{}{}", FILE_TASK_PREFIX, p)));
        self.ics_events.clear();
        self.file_tasks.clear();

        if removed == 0 && changed_files.is_empty() {
            debug!("Clear on empty repository, nothing to report");
            return Ok(());
        }
        let stats = self.stats(-(removed as i64));
        self.emit_cache_updated(changed_files, stats, source_seq)?;
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Replace the tasks of one file. Returns whether the content changed.
    pub fn update_file(&mut self, file_path: &str, tasks: &[Task], source_seq: u64, options: UpdateOptions) -> Result<bool> {
        self.run_pipeline(file_path, tasks, tasks.len() as i64, source_seq, options, false)
    }

    /// Apply several file updates with one snapshot write and one aggregate event.
    /// Returns the keys whose content changed.
    pub fn update_batch(
        &mut self,
        updates: &[(String, Vec<Task>)],
        source_seq: u64,
        options: UpdateOptions,
    ) -> Result<Vec<String>> {
        let mut changed_files = Vec::new();
        let mut total_changed = 0_i64;

        for (file_path, tasks) in updates {
            if self.apply(file_path, tasks, options.persist)? {
                changed_files.push(file_path.clone());
                total_changed += tasks.len() as i64;
            }
        }

        let has_changes = !changed_files.is_empty();
        if !has_changes && !options.force_emit {
            debug!(files = updates.len(), "Batch update had no changes, skipping event");
            return Ok(changed_files);
        }

        if options.persist && has_changes {
            self.persist()?;
            // The snapshot just written covers everything queued so far
            self.scheduler.complete(self.clock.now_ms());
            info!(files = changed_files.len(), "Persisted index after batch update");
        }

        let files_to_report = if has_changes {
            changed_files.clone()
        } else {
            updates.iter().map(|(path, _)| path.clone()).collect()
        };
        let stats = self.stats(total_changed);
        self.emit_cache_updated(files_to_report, stats, source_seq)?;
        Ok(changed_files)
    }

    /// Remove every task of a file from the index and storage
    pub fn remove_file(&mut self, file_path: &str, source_seq: u64) -> Result<bool> {
        let indexed = self.indexer.cache().files.contains_key(file_path);
        let stored = self
            .storage
            .load_augmented(file_path)
            .with_context(|| format!("Failed to load stored tasks for {}", file_path))?
            .is_some();
        if !indexed && !stored {
            debug!(file_path, "remove_file: nothing known for path");
            return Ok(false);
        }

        self.indexer
            .remove_tasks_from_file(file_path)
            .with_context(|| format!("Failed to remove {} from index", file_path))?;
        self.storage
            .clear_file(file_path)
            .with_context(|| format!("Failed to clear storage for {}", file_path))?;
        self.schedule_persist(file_path);

        let stats = self.stats(0);
        self.emit_cache_updated(vec![file_path.to_string()], stats, source_seq)?;
        Ok(true)
    }

    /// Remove one task by id; unknown ids are ignored.
    ///
    /// The change is reported under the key the task was indexed with, which may
    /// differ from its `file_path`.
    pub fn remove_task_by_id(&mut self, task_id: &str, source_seq: u64) -> Result<bool> {
        let key = self
            .indexer
            .cache()
            .files
            .iter()
            .find(|(_, ids)| ids.contains(task_id))
            .map(|(key, _)| key.clone());

        let Some(task) = self
            .indexer
            .remove_task(task_id)
            .with_context(|| format!("Failed to remove task {} from index", task_id))?
        else {
            debug!(task_id, "remove_task_by_id: task not indexed");
            return Ok(false);
        };
        let key = key.unwrap_or(task.file_path);

        // Keep the stored record in line so the next diff for this key is accurate
        let stored = self
            .storage
            .load_augmented(&key)
            .with_context(|| format!("Failed to load stored tasks for {}", key))?;
        if let Some(mut record) = stored {
            let before = record.data.len();
            record.data.retain(|t| t.id != task_id);
            if record.data.len() != before {
                self.storage
                    .store_augmented(&key, &record.data)
                    .with_context(|| format!("Failed to store tasks for {}", key))?;
            }
        }
        self.schedule_persist(&key);

        let stats = self.stats(-1);
        self.emit_cache_updated(vec![key], stats, source_seq)?;
        Ok(true)
    }

    /// Replace the ICS event collection
    pub fn update_ics_events(&mut self, events: Vec<Task>, source_seq: u64, options: UpdateOptions) -> Result<bool> {
        debug!(count = events.len(), "Updating ICS events");
        let changed = record::tasks_differ(&self.ics_events, &events)?;
        self.ics_events = events;

        if options.persist {
            self.storage
                .store_ics_events(&self.ics_events)
                .context("Failed to store ICS events")?;
        }

        if changed || options.force_emit {
            let count = self.ics_events.len();
            let mut stats = self.stats(count as i64);
            stats.ics_events = Some(count);
            self.emit_cache_updated(vec![ICS_EVENTS_KEY.to_string()], stats, source_seq)?;
        }
        Ok(changed)
    }

    /// Set the file-level task for its file
    pub fn update_file_task(&mut self, task: Task, source_seq: u64) -> Result<bool> {
        if task.file_path.is_empty() {
            warn!(task_id = %task.id, "File task without a file path, ignoring");
            return Ok(false);
        }

        let file_path = task.file_path.clone();
        let changed = match self.file_tasks.get(&file_path) {
            Some(existing) => record::tasks_differ(std::slice::from_ref(existing), std::slice::from_ref(&task))?,
            None => true,
        };
        if !changed {
            debug!(file_path = %file_path, "File task unchanged");
            return Ok(false);
        }

        self.file_tasks.insert(file_path.clone(), task);
        let source = format!("{}{}", FILE_TASK_PREFIX, file_path);
        self.schedule_persist(&source);

        let mut stats = self.stats(1);
        stats.file_tasks = Some(self.file_tasks.len());
        self.emit_cache_updated(vec![source], stats, source_seq)?;
        Ok(true)
    }

    pub fn remove_file_task(&mut self, file_path: &str, source_seq: u64) -> Result<bool> {
        if self.file_tasks.remove(file_path).is_none() {
            return Ok(false);
        }

        let source = format!("{}{}", FILE_TASK_PREFIX, file_path);
        self.schedule_persist(&source);

        let mut stats = self.stats(-1);
        stats.file_tasks = Some(self.file_tasks.len());
        self.emit_cache_updated(vec![source], stats, source_seq)?;
        Ok(true)
    }

    /// Replace one task inside its file's stored list without re-supplying the file.
    ///
    /// Does nothing when the file has no stored record or the task is not in it.
    pub fn update_single_task(&mut self, task: Task, source_seq: u64) -> Result<bool> {
        let file_path = task.file_path.clone();
        debug!(task_id = %task.id, file_path = %file_path, "Updating single task");

        let Some(record) = self
            .storage
            .load_augmented(&file_path)
            .with_context(|| format!("Failed to load stored tasks for {}", file_path))?
        else {
            warn!(file_path = %file_path, "No stored tasks for file, cannot update single task");
            return Ok(false);
        };

        let mut tasks = record.data;
        let Some(position) = tasks.iter().position(|t| t.id == task.id) else {
            warn!(task_id = %task.id, file_path = %file_path, "Task not found in stored file tasks");
            return Ok(false);
        };
        tasks[position] = task;

        self.run_pipeline(&file_path, &tasks, 1, source_seq, UpdateOptions::default(), true)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    fn run_pipeline(
        &mut self,
        key: &str,
        tasks: &[Task],
        reported_changed: i64,
        source_seq: u64,
        options: UpdateOptions,
        assume_changed: bool,
    ) -> Result<bool> {
        let changed = self.apply(key, tasks, options.persist)? || assume_changed;

        if options.persist && changed {
            self.schedule_persist(key);
        }

        if changed || options.force_emit {
            let stats = self.stats(reported_changed);
            self.emit_cache_updated(vec![key.to_string()], stats, source_seq)?;
        } else {
            debug!(key, "No changes detected, skipping event");
        }
        Ok(changed)
    }

    /// Diff against the stored record, update the index, optionally rewrite the blob
    fn apply(&mut self, key: &str, tasks: &[Task], persist: bool) -> Result<bool> {
        let existing = self
            .storage
            .load_augmented(key)
            .with_context(|| format!("Failed to load stored tasks for {}", key))?;
        let changed = record::has_changed(existing.as_ref(), tasks)?;

        self.indexer
            .update_index_with_tasks(key, tasks)
            .with_context(|| format!("Failed to index tasks for {}", key))?;

        if persist {
            self.storage
                .store_augmented(key, tasks)
                .with_context(|| format!("Failed to store tasks for {}", key))?;
        }
        Ok(changed)
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.context.seq().next();
        self.last_sequence = seq;
        seq
    }

    fn stats(&self, changed: i64) -> CacheStats {
        CacheStats {
            total: self.total_task_count(),
            changed,
            ics_events: None,
            file_tasks: None,
        }
    }

    fn emit_cache_updated(&mut self, changed_files: Vec<String>, stats: CacheStats, source_seq: u64) -> Result<u64> {
        let seq = self.next_seq();
        let payload = EventPayload::TaskCacheUpdated(TaskCacheUpdated {
            changed_files,
            stats,
            timestamp: self.clock.now_ms(),
            seq,
            source_seq,
        });
        trace!(seq, source_seq, "Emitting task cache update");
        self.bus
            .emit(&self.scope, payload.name(), &payload)
            .context("Failed to emit task cache update")?;
        Ok(seq)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write a consolidated snapshot of the index now
    pub fn persist(&mut self) -> Result<()> {
        let snapshot = self.indexer.snapshot().context("Failed to export index snapshot")?;
        self.storage
            .store_consolidated(&snapshot)
            .context("Failed to store consolidated snapshot")
    }

    fn schedule_persist(&mut self, source: &str) {
        let now = self.clock.now_ms();
        match self.scheduler.schedule(source, now) {
            ScheduleDecision::PersistNow => self.run_background_persist(now),
            ScheduleDecision::Deferred { deadline_ms } => {
                trace!(source, deadline_ms, "Persist deferred");
            }
        }
    }

    /// Persist outside of any caller's control flow: failures are logged and retried
    fn run_background_persist(&mut self, now: i64) {
        if let Err(e) = self.execute_persist() {
            let retry_at = self.scheduler.fail(now);
            warn!(error = ?e, ?retry_at, "Background persist failed");
        }
    }

    /// Persist if anything is queued. Returns whether a snapshot was written.
    fn execute_persist(&mut self) -> Result<bool> {
        self.scheduler.cancel();
        if self.scheduler.is_empty() {
            return Ok(false);
        }

        info!(queued = self.scheduler.queue_len(), "Persisting queued changes");
        self.persist()?;
        self.scheduler.complete(self.clock.now_ms());
        Ok(true)
    }

    /// Fire the debounce (or retry) timer if its deadline has passed.
    /// Hosts call this from their event loop; returns whether it fired.
    pub fn run_pending(&mut self) -> bool {
        let now = self.clock.now_ms();
        if !self.scheduler.take_due(now) {
            return false;
        }
        self.run_background_persist(now);
        true
    }

    pub fn next_persist_deadline(&self) -> Option<i64> {
        self.scheduler.next_deadline()
    }

    pub fn pending_sources(&self) -> Vec<String> {
        self.scheduler.queued().map(str::to_string).collect()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn tasks_by_ids<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> Vec<Task> {
        ids.into_iter()
            .filter_map(|id| self.indexer.task_by_id(id))
            .cloned()
            .collect()
    }

    /// Indexed tasks followed by ICS events and file-level tasks
    pub fn all(&self) -> Vec<Task> {
        let mut tasks = self.indexer.all_tasks();
        tasks.extend(self.ics_events.iter().cloned());
        tasks.extend(self.file_tasks.values().cloned());
        tasks
    }

    pub fn by_project(&self, project: &str) -> Vec<Task> {
        let mut tasks = self.tasks_by_ids(self.indexer.task_ids_by_project(project));
        tasks.extend(
            self.ics_events
                .iter()
                .filter(|t| t.metadata.project.as_deref() == Some(project))
                .cloned(),
        );
        tasks
    }

    /// Tasks carrying every one of `tags`; no tags selects nothing
    pub fn by_tags<T: AsRef<str>>(&self, tags: &[T]) -> Vec<Task> {
        let Some((first, rest)) = tags.split_first() else {
            return Vec::new();
        };

        let mut intersection: IdSet = self.indexer.task_ids_by_tag(first.as_ref()).clone();
        for tag in rest {
            let ids = self.indexer.task_ids_by_tag(tag.as_ref());
            intersection.retain(|id| ids.contains(id));
        }
        self.tasks_by_ids(&intersection)
    }

    pub fn by_status(&self, completed: bool) -> Vec<Task> {
        self.tasks_by_ids(self.indexer.task_ids_by_completion(completed))
    }

    pub fn by_date_range(&self, range: &DateRange) -> Vec<Task> {
        let index = self.indexer.cache().date_index(range.field);
        let mut ids = IdSet::new();
        for (key, key_ids) in index {
            match parse_date_key(key) {
                Some(ms) if range.contains(ms) => ids.extend(key_ids.iter().cloned()),
                Some(_) => {}
                None => warn!(key = %key, "Unparseable date index key"),
            }
        }
        self.tasks_by_ids(&ids)
    }

    pub fn by_id(&self, id: &str) -> Option<Task> {
        self.indexer.task_by_id(id).cloned()
    }

    /// Look a task up across indexed tasks, ICS events and file-level tasks
    pub fn find_task(&self, id: &str) -> Option<Task> {
        self.by_id(id).or_else(|| {
            self.ics_events
                .iter()
                .chain(self.file_tasks.values())
                .find(|t| t.id == id)
                .cloned()
        })
    }

    pub fn query(&self, filter: Option<&TaskFilter>, sorting: &[SortCriterion]) -> Vec<Task> {
        let filters: Vec<TaskFilter> = filter.into_iter().cloned().collect();
        self.indexer.query_tasks(&filters, sorting)
    }

    pub fn summary(&self) -> IndexSummary {
        let cache = self.indexer.cache();
        let count = |index: &BTreeMap<String, IdSet>| -> BTreeMap<String, usize> {
            index.iter().map(|(k, ids)| (k.clone(), ids.len())).collect()
        };
        IndexSummary {
            total: cache.tasks.len(),
            by_project: count(&cache.projects),
            by_tag: count(&cache.tags),
            by_status: cache.completed.iter().map(|(k, ids)| (*k, ids.len())).collect(),
        }
    }

    pub fn total_task_count(&self) -> usize {
        self.indexer.total_task_count() + self.ics_events.len() + self.file_tasks.len()
    }

    pub fn indexed_file_paths(&self) -> Vec<String> {
        self.indexer.file_paths()
    }

    pub fn file_task_paths(&self) -> Vec<String> {
        self.file_tasks.keys().cloned().collect()
    }

    pub fn ics_events(&self) -> &[Task] {
        &self.ics_events
    }

    /// Sequence number of the most recent event this repository emitted
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn indexer(&self) -> &I {
        &self.indexer
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}
