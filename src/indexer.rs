// In-memory inverted index over task records

use crate::filter::{Conjunction, FilterKind, FilterOp, FilterValue, SortCriterion, SortDirection, SortField, TaskFilter};
use crate::models::{Task, format_date_key, parse_date_key};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tracing::{debug, warn};

pub type IdSet = BTreeSet<String>;
pub type IdIndex<K = String> = BTreeMap<K, IdSet>;

static EMPTY: IdSet = BTreeSet::new();

/// Typed inverted indices, owned by one indexer instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskCache {
    pub tasks: BTreeMap<String, Task>,
    pub files: IdIndex,
    pub tags: IdIndex,
    pub projects: IdIndex,
    pub contexts: IdIndex,
    pub completed: IdIndex<bool>,
    pub priority: IdIndex<i64>,
    pub due_date: IdIndex,
    pub start_date: IdIndex,
    pub scheduled_date: IdIndex,
    pub cancelled_date: IdIndex,
    pub depends_on: IdIndex,
}

/// Full export of an indexer's state, grouped by source file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub files: BTreeMap<String, Vec<Task>>,
}

impl IndexSnapshot {
    pub fn task_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Which date index a range query consults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateField {
    #[default]
    Due,
    Start,
    Scheduled,
}

impl TaskCache {
    pub fn date_index(&self, field: DateField) -> &IdIndex {
        match field {
            DateField::Due => &self.due_date,
            DateField::Start => &self.start_date,
            DateField::Scheduled => &self.scheduled_date,
        }
    }
}

/// Operations the repository consumes from an index implementation
pub trait Indexer {
    /// Replace every task previously indexed for `file_path` with `tasks`
    fn update_index_with_tasks(&mut self, file_path: &str, tasks: &[Task]) -> Result<()>;

    fn remove_tasks_from_file(&mut self, file_path: &str) -> Result<()>;

    /// Remove one task, returning it if it was indexed
    fn remove_task(&mut self, id: &str) -> Result<Option<Task>>;

    fn cache(&self) -> &TaskCache;

    fn snapshot(&self) -> Result<IndexSnapshot>;

    fn restore_from_snapshot(&mut self, snapshot: IndexSnapshot) -> Result<()>;

    fn query_tasks(&self, filters: &[TaskFilter], sorting: &[SortCriterion]) -> Vec<Task>;

    fn clear_index(&mut self);

    fn task_by_id(&self, id: &str) -> Option<&Task> {
        self.cache().tasks.get(id)
    }

    fn task_ids_by_project(&self, project: &str) -> &IdSet {
        self.cache().projects.get(project).unwrap_or(&EMPTY)
    }

    fn task_ids_by_tag(&self, tag: &str) -> &IdSet {
        self.cache().tags.get(tag).unwrap_or(&EMPTY)
    }

    fn task_ids_by_completion(&self, completed: bool) -> &IdSet {
        self.cache().completed.get(&completed).unwrap_or(&EMPTY)
    }

    fn all_tasks(&self) -> Vec<Task> {
        self.cache().tasks.values().cloned().collect()
    }

    fn total_task_count(&self) -> usize {
        self.cache().tasks.len()
    }

    fn file_paths(&self) -> Vec<String> {
        self.cache().files.keys().cloned().collect()
    }
}

/// Default [`Indexer`] keeping every index in memory
#[derive(Debug, Default)]
pub struct TaskIndexer {
    cache: TaskCache,
}

fn add_id<K: Ord>(index: &mut IdIndex<K>, key: K, id: &str) {
    index.entry(key).or_default().insert(id.to_string());
}

fn remove_id<K: Ord>(index: &mut IdIndex<K>, key: &K, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn union_all<'a, K: 'a>(index: impl IntoIterator<Item = (&'a K, &'a IdSet)>) -> IdSet {
    index.into_iter().flat_map(|(_, ids)| ids.iter().cloned()).collect()
}

impl TaskIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_task(&mut self, task: &Task) {
        let cache = &mut self.cache;
        let id = task.id.as_str();
        let meta = &task.metadata;

        add_id(&mut cache.completed, task.completed, id);
        for tag in &meta.tags {
            add_id(&mut cache.tags, tag.clone(), id);
        }
        if let Some(project) = &meta.project {
            add_id(&mut cache.projects, project.clone(), id);
        }
        if let Some(context) = &meta.context {
            add_id(&mut cache.contexts, context.clone(), id);
        }
        if let Some(priority) = meta.priority {
            add_id(&mut cache.priority, priority, id);
        }
        if let Some(due) = meta.due_date {
            add_id(&mut cache.due_date, format_date_key(due), id);
        }
        if let Some(start) = meta.start_date {
            add_id(&mut cache.start_date, format_date_key(start), id);
        }
        if let Some(scheduled) = meta.scheduled_date {
            add_id(&mut cache.scheduled_date, format_date_key(scheduled), id);
        }
        if let Some(cancelled) = meta.cancelled_date {
            add_id(&mut cache.cancelled_date, format_date_key(cancelled), id);
        }
        for dependency in &meta.depends_on {
            add_id(&mut cache.depends_on, dependency.clone(), id);
        }
    }

    fn unindex_task(&mut self, task: &Task) {
        let cache = &mut self.cache;
        let id = task.id.as_str();
        let meta = &task.metadata;

        remove_id(&mut cache.completed, &task.completed, id);
        for tag in &meta.tags {
            remove_id(&mut cache.tags, tag, id);
        }
        if let Some(project) = &meta.project {
            remove_id(&mut cache.projects, project, id);
        }
        if let Some(context) = &meta.context {
            remove_id(&mut cache.contexts, context, id);
        }
        if let Some(priority) = meta.priority {
            remove_id(&mut cache.priority, &priority, id);
        }
        if let Some(due) = meta.due_date {
            remove_id(&mut cache.due_date, &format_date_key(due), id);
        }
        if let Some(start) = meta.start_date {
            remove_id(&mut cache.start_date, &format_date_key(start), id);
        }
        if let Some(scheduled) = meta.scheduled_date {
            remove_id(&mut cache.scheduled_date, &format_date_key(scheduled), id);
        }
        if let Some(cancelled) = meta.cancelled_date {
            remove_id(&mut cache.cancelled_date, &format_date_key(cancelled), id);
        }
        for dependency in &meta.depends_on {
            remove_id(&mut cache.depends_on, dependency, id);
        }
    }

    fn remove_file_from_index(&mut self, file_path: &str) {
        let Some(ids) = self.cache.files.remove(file_path) else {
            return;
        };
        for id in ids {
            if let Some(task) = self.cache.tasks.remove(&id) {
                self.unindex_task(&task);
            }
        }
    }

    fn all_ids(&self) -> IdSet {
        self.cache.tasks.keys().cloned().collect()
    }

    fn string_value(filter: &TaskFilter) -> Option<&str> {
        match &filter.value {
            FilterValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Epoch ms for a date filter value: either a `YYYY-MM-DD` string or raw ms
    fn date_value(filter: &TaskFilter) -> Option<i64> {
        match &filter.value {
            FilterValue::String(s) => parse_date_key(s),
            FilterValue::Int(ms) => Some(*ms),
            _ => None,
        }
    }

    fn keyed_filter(&self, index: &IdIndex, filter: &TaskFilter) -> IdSet {
        let value = Self::string_value(filter);
        match (filter.op, value) {
            (FilterOp::Eq | FilterOp::Contains, Some(v)) => index.get(v).cloned().unwrap_or_default(),
            (FilterOp::Ne, Some(v)) => {
                let excluded = index.get(v).unwrap_or(&EMPTY);
                self.all_ids().difference(excluded).cloned().collect()
            }
            (FilterOp::Empty, _) => {
                let with_value = union_all(index);
                self.all_ids().difference(&with_value).cloned().collect()
            }
            _ => {
                warn!(kind = ?filter.kind, op = %filter.op, "Unsupported filter operator");
                IdSet::new()
            }
        }
    }

    fn date_filter(&self, index: &IdIndex, filter: &TaskFilter) -> IdSet {
        match filter.op {
            FilterOp::Eq | FilterOp::Empty => self.keyed_filter(index, filter),
            FilterOp::Before | FilterOp::After | FilterOp::Lt | FilterOp::Gt => {
                let Some(bound) = Self::date_value(filter) else {
                    warn!(kind = ?filter.kind, value = %filter.value, "Unparseable date filter value");
                    return IdSet::new();
                };
                let before = matches!(filter.op, FilterOp::Before | FilterOp::Lt);
                union_all(index.iter().filter(|(key, _)| match parse_date_key(key) {
                    Some(date) if before => date < bound,
                    Some(date) => date > bound,
                    None => false,
                }))
            }
            _ => {
                warn!(kind = ?filter.kind, op = %filter.op, "Unsupported filter operator");
                IdSet::new()
            }
        }
    }

    fn apply_filter(&self, filter: &TaskFilter) -> IdSet {
        let cache = &self.cache;
        match filter.kind {
            FilterKind::Tag => self.keyed_filter(&cache.tags, filter),
            FilterKind::Project => self.keyed_filter(&cache.projects, filter),
            FilterKind::Context => self.keyed_filter(&cache.contexts, filter),
            FilterKind::Status => match (filter.op, &filter.value) {
                (FilterOp::Eq, FilterValue::Bool(done)) => cache.completed.get(done).cloned().unwrap_or_default(),
                _ => {
                    warn!(op = %filter.op, "Status filter only supports equality on a bool");
                    IdSet::new()
                }
            },
            FilterKind::Priority => match (filter.op, &filter.value) {
                (FilterOp::Eq, FilterValue::Int(p)) => cache.priority.get(p).cloned().unwrap_or_default(),
                (FilterOp::Gt, FilterValue::Int(p)) => {
                    union_all(cache.priority.range((Bound::Excluded(*p), Bound::Unbounded)))
                }
                (FilterOp::Lt, FilterValue::Int(p)) => union_all(cache.priority.range(..*p)),
                _ => {
                    warn!(op = %filter.op, "Unsupported priority filter");
                    IdSet::new()
                }
            },
            FilterKind::DueDate => self.date_filter(&cache.due_date, filter),
            FilterKind::StartDate => self.date_filter(&cache.start_date, filter),
            FilterKind::ScheduledDate => self.date_filter(&cache.scheduled_date, filter),
        }
    }
}

fn compare_option<T: Ord>(a: Option<T>, b: Option<T>, direction: SortDirection) -> Ordering {
    // Missing values always sort last
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match direction {
            SortDirection::Asc => a.cmp(&b),
            SortDirection::Desc => b.cmp(&a),
        },
    }
}

fn compare_by(a: &Task, b: &Task, criterion: &SortCriterion) -> Ordering {
    let (ma, mb) = (&a.metadata, &b.metadata);
    let dir = criterion.direction;
    match criterion.field {
        SortField::Priority => compare_option(ma.priority, mb.priority, dir),
        SortField::DueDate => compare_option(ma.due_date, mb.due_date, dir),
        SortField::StartDate => compare_option(ma.start_date, mb.start_date, dir),
        SortField::ScheduledDate => compare_option(ma.scheduled_date, mb.scheduled_date, dir),
        SortField::Project => compare_option(ma.project.as_deref(), mb.project.as_deref(), dir),
        SortField::Content => compare_option(Some(a.content.as_str()), Some(b.content.as_str()), dir),
        SortField::FilePath => compare_option(Some(a.file_path.as_str()), Some(b.file_path.as_str()), dir),
        SortField::Line => compare_option(Some(a.line), Some(b.line), dir),
        SortField::Completed => compare_option(Some(a.completed), Some(b.completed), dir),
    }
}

/// Sort with explicit criteria, or priority descending then due date ascending
pub fn sort_tasks(tasks: &mut [Task], sorting: &[SortCriterion]) {
    if sorting.is_empty() {
        tasks.sort_by(|a, b| {
            let pa = a.metadata.priority.unwrap_or(0);
            let pb = b.metadata.priority.unwrap_or(0);
            pb.cmp(&pa)
                .then_with(|| compare_option(a.metadata.due_date, b.metadata.due_date, SortDirection::Asc))
        });
        return;
    }

    tasks.sort_by(|a, b| {
        sorting
            .iter()
            .map(|criterion| compare_by(a, b, criterion))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

impl Indexer for TaskIndexer {
    fn update_index_with_tasks(&mut self, file_path: &str, tasks: &[Task]) -> Result<()> {
        debug!(file_path, count = tasks.len(), "update_index_with_tasks: called");
        self.remove_file_from_index(file_path);

        let mut ids = IdSet::new();
        for task in tasks {
            // A task id moving between files must not leave stale index entries behind
            if let Some(previous) = self.cache.tasks.remove(&task.id) {
                self.unindex_task(&previous);
                for file_ids in self.cache.files.values_mut() {
                    file_ids.remove(&task.id);
                }
                self.cache.files.retain(|_, file_ids| !file_ids.is_empty());
            }
            self.index_task(task);
            self.cache.tasks.insert(task.id.clone(), task.clone());
            ids.insert(task.id.clone());
        }
        self.cache.files.insert(file_path.to_string(), ids);
        Ok(())
    }

    fn remove_tasks_from_file(&mut self, file_path: &str) -> Result<()> {
        self.remove_file_from_index(file_path);
        Ok(())
    }

    fn remove_task(&mut self, id: &str) -> Result<Option<Task>> {
        let Some(task) = self.cache.tasks.remove(id) else {
            return Ok(None);
        };
        self.unindex_task(&task);
        // The owning key is whatever the task was indexed under, not necessarily its file_path
        for file_ids in self.cache.files.values_mut() {
            file_ids.remove(id);
        }
        self.cache.files.retain(|_, file_ids| !file_ids.is_empty());
        Ok(Some(task))
    }

    fn cache(&self) -> &TaskCache {
        &self.cache
    }

    fn snapshot(&self) -> Result<IndexSnapshot> {
        let mut files = BTreeMap::new();
        for (path, ids) in &self.cache.files {
            let mut tasks: Vec<Task> = ids.iter().filter_map(|id| self.cache.tasks.get(id)).cloned().collect();
            tasks.sort_by_key(|t| t.line);
            files.insert(path.clone(), tasks);
        }
        Ok(IndexSnapshot { files })
    }

    fn restore_from_snapshot(&mut self, snapshot: IndexSnapshot) -> Result<()> {
        self.clear_index();
        for (path, tasks) in &snapshot.files {
            self.update_index_with_tasks(path, tasks)?;
        }
        debug!(files = snapshot.files.len(), tasks = self.cache.tasks.len(), "Restored index from snapshot");
        Ok(())
    }

    fn query_tasks(&self, filters: &[TaskFilter], sorting: &[SortCriterion]) -> Vec<Task> {
        let mut result: Option<IdSet> = None;
        for filter in filters {
            let matched = self.apply_filter(filter);
            result = Some(match result {
                None => matched,
                Some(acc) => match filter.conjunction {
                    Conjunction::Or => acc.union(&matched).cloned().collect(),
                    Conjunction::And => acc.intersection(&matched).cloned().collect(),
                },
            });
        }

        let mut tasks: Vec<Task> = match result {
            None => self.cache.tasks.values().cloned().collect(),
            Some(ids) => ids.iter().filter_map(|id| self.cache.tasks.get(id)).cloned().collect(),
        };
        sort_tasks(&mut tasks, sorting);
        tasks
    }

    fn clear_index(&mut self) {
        self.cache = TaskCache::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_date_key;

    fn day(key: &str) -> i64 {
        parse_date_key(key).unwrap()
    }

    fn sample() -> TaskIndexer {
        let mut indexer = TaskIndexer::new();
        indexer
            .update_index_with_tasks(
                "a.md",
                &[
                    Task::new("a1", "a.md", "Draft report")
                        .with_project("work")
                        .with_tags(["urgent", "writing"])
                        .with_priority(3)
                        .with_due(day("2024-03-10")),
                    Task::new("a2", "a.md", "Book flights")
                        .with_project("travel")
                        .with_tags(["urgent"])
                        .with_due(day("2024-03-20")),
                ],
            )
            .unwrap();
        indexer
            .update_index_with_tasks(
                "b.md",
                &[Task::new("b1", "b.md", "Water plants").with_tags(["home"]).complete(1000)],
            )
            .unwrap();
        indexer
    }

    #[test]
    fn test_update_builds_indices() {
        let indexer = sample();
        assert_eq!(indexer.total_task_count(), 3);
        assert_eq!(indexer.task_ids_by_tag("urgent").len(), 2);
        assert!(indexer.task_ids_by_project("work").contains("a1"));
        assert!(indexer.task_ids_by_completion(true).contains("b1"));
        assert_eq!(indexer.cache().due_date.get("2024-03-10").unwrap().len(), 1);
        assert_eq!(indexer.file_paths(), vec!["a.md".to_string(), "b.md".to_string()]);
    }

    #[test]
    fn test_reupdate_replaces_file_tasks_and_prunes() {
        let mut indexer = sample();
        indexer
            .update_index_with_tasks("a.md", &[Task::new("a3", "a.md", "Only one")])
            .unwrap();

        assert_eq!(indexer.total_task_count(), 2);
        assert!(indexer.task_by_id("a1").is_none());
        assert!(!indexer.cache().projects.contains_key("work"));
        assert!(!indexer.cache().tags.contains_key("urgent"));
        assert!(indexer.cache().due_date.is_empty());
    }

    #[test]
    fn test_remove_task_updates_file_index() {
        let mut indexer = sample();
        let removed = indexer.remove_task("b1").unwrap();
        assert_eq!(removed.map(|t| t.id), Some("b1".to_string()));
        assert!(!indexer.cache().files.contains_key("b.md"));
        assert!(indexer.task_ids_by_completion(true).is_empty());
        assert!(indexer.remove_task("missing").unwrap().is_none());
    }

    #[test]
    fn test_remove_tasks_from_file() {
        let mut indexer = sample();
        indexer.remove_tasks_from_file("a.md").unwrap();
        assert_eq!(indexer.total_task_count(), 1);
        assert!(indexer.task_ids_by_tag("urgent").is_empty());
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let indexer = sample();
        let snapshot = indexer.snapshot().unwrap();
        assert_eq!(snapshot.task_count(), 3);

        let mut restored = TaskIndexer::new();
        restored.restore_from_snapshot(snapshot).unwrap();
        assert_eq!(restored.cache(), indexer.cache());
    }

    #[test]
    fn test_query_and_or_filters() {
        let indexer = sample();
        let urgent = TaskFilter::new(FilterKind::Tag, FilterOp::Contains, FilterValue::String("urgent".into()));
        let work = TaskFilter::new(FilterKind::Project, FilterOp::Eq, FilterValue::String("work".into()));

        let both = indexer.query_tasks(&[urgent.clone(), work.clone()], &[]);
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, "a1");

        let home = TaskFilter::new(FilterKind::Tag, FilterOp::Contains, FilterValue::String("home".into())).or();
        let either = indexer.query_tasks(&[work, home], &[]);
        let ids: Vec<_> = either.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a1") && ids.contains(&"b1"));
    }

    #[test]
    fn test_query_ne_and_empty() {
        let indexer = sample();
        let not_work = TaskFilter::new(FilterKind::Project, FilterOp::Ne, FilterValue::String("work".into()));
        assert_eq!(indexer.query_tasks(&[not_work], &[]).len(), 2);

        let no_project = TaskFilter::new(FilterKind::Project, FilterOp::Empty, FilterValue::None);
        let tasks = indexer.query_tasks(&[no_project], &[]);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "b1");
    }

    #[test]
    fn test_query_date_before_after() {
        let indexer = sample();
        let before = TaskFilter::new(FilterKind::DueDate, FilterOp::Before, FilterValue::String("2024-03-15".into()));
        let tasks = indexer.query_tasks(&[before], &[]);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "a1");

        let after = TaskFilter::new(FilterKind::DueDate, FilterOp::After, FilterValue::Int(day("2024-03-15")));
        let tasks = indexer.query_tasks(&[after], &[]);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "a2");
    }

    #[test]
    fn test_query_priority_range() {
        let indexer = sample();
        let high = TaskFilter::new(FilterKind::Priority, FilterOp::Gt, FilterValue::Int(2));
        assert_eq!(indexer.query_tasks(&[high], &[]).len(), 1);
        let low = TaskFilter::new(FilterKind::Priority, FilterOp::Lt, FilterValue::Int(3));
        assert!(indexer.query_tasks(&[low], &[]).is_empty());
    }

    #[test]
    fn test_query_priority_range_at_extremes() {
        let mut indexer = TaskIndexer::new();
        indexer
            .update_index_with_tasks(
                "a.md",
                &[
                    Task::new("max", "a.md", "Max").with_priority(i64::MAX),
                    Task::new("min", "a.md", "Min").with_priority(i64::MIN),
                ],
            )
            .unwrap();

        let above_max = TaskFilter::new(FilterKind::Priority, FilterOp::Gt, FilterValue::Int(i64::MAX));
        assert!(indexer.query_tasks(&[above_max], &[]).is_empty());
        let below_min = TaskFilter::new(FilterKind::Priority, FilterOp::Lt, FilterValue::Int(i64::MIN));
        assert!(indexer.query_tasks(&[below_min], &[]).is_empty());

        let above_min = TaskFilter::new(FilterKind::Priority, FilterOp::Gt, FilterValue::Int(i64::MIN));
        let ids: Vec<String> = indexer.query_tasks(&[above_min], &[]).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["max".to_string()]);
    }

    #[test]
    fn test_remove_task_indexed_under_other_key() {
        let mut indexer = TaskIndexer::new();
        indexer
            .update_index_with_tasks("notes", &[Task::new("t1", "a.md", "One"), Task::new("t2", "a.md", "Two")])
            .unwrap();

        let removed = indexer.remove_task("t1").unwrap().unwrap();
        assert_eq!(removed.file_path, "a.md");
        assert_eq!(indexer.cache().files["notes"].len(), 1);
        assert!(!indexer.cache().files["notes"].contains("t1"));

        indexer.remove_task("t2").unwrap();
        assert!(indexer.file_paths().is_empty());
    }

    #[test]
    fn test_default_sort_priority_then_due() {
        let indexer = sample();
        let tasks = indexer.query_tasks(&[], &[]);
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        // a1 has priority 3; a2 and b1 tie at 0, a2 has a due date so it comes first
        assert_eq!(ids, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_explicit_sort_missing_values_last() {
        let indexer = sample();
        let tasks = indexer.query_tasks(&[], &[SortCriterion::desc(SortField::DueDate)]);
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1", "b1"]);
    }

    #[test]
    fn test_task_moving_between_files() {
        let mut indexer = sample();
        indexer
            .update_index_with_tasks("c.md", &[Task::new("a1", "c.md", "Moved").with_project("home")])
            .unwrap();
        assert!(!indexer.task_ids_by_project("work").contains("a1"));
        assert!(indexer.task_ids_by_project("home").contains("a1"));
        assert_eq!(indexer.total_task_count(), 3);

        // Dropping the old file must not take the moved task with it
        indexer.remove_tasks_from_file("a.md").unwrap();
        assert!(indexer.task_by_id("a1").is_some());
        assert_eq!(indexer.total_task_count(), 2);
    }
}
