// Change notifications and the process-wide sequence counter

use crate::jsonl;
use eyre::{Result, eyre};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::trace;

pub const TASK_CACHE_UPDATED: &str = "task-cache-updated";
pub const CACHE_READY: &str = "cache-ready";

/// Monotonic sequence counter. Values are strictly increasing and start at 1.
#[derive(Debug, Default)]
pub struct Seq {
    value: AtomicU64,
}

impl Seq {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last value handed out, 0 if none
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }

    /// Continue numbering after `seen` if it is ahead of the counter
    pub fn resume_from(&self, seen: u64) {
        self.value.fetch_max(seen, Ordering::SeqCst);
    }
}

/// Process-wide state shared by every repository and every writer that
/// needs to recognize its own echoes
#[derive(Debug, Default)]
pub struct Context {
    seq: Seq,
}

static GLOBAL: OnceLock<Arc<Context>> = OnceLock::new();

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The shared instance for this process
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(Context::new).clone()
    }

    pub fn seq(&self) -> &Seq {
        &self.seq
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    /// Number of tasks touched; negative for removals
    pub changed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ics_events: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_tasks: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCacheUpdated {
    pub changed_files: Vec<String>,
    pub stats: CacheStats,
    pub timestamp: i64,
    pub seq: u64,
    /// Caller-supplied id of the write that caused this update, relayed untouched
    pub source_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheReady {
    pub initial: bool,
    pub timestamp: i64,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EventPayload {
    TaskCacheUpdated(TaskCacheUpdated),
    CacheReady(CacheReady),
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::TaskCacheUpdated(_) => TASK_CACHE_UPDATED,
            EventPayload::CacheReady(_) => CACHE_READY,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            EventPayload::TaskCacheUpdated(e) => e.seq,
            EventPayload::CacheReady(e) => e.seq,
        }
    }
}

/// Sink for repository notifications
pub trait EventBus: Send + Sync {
    fn emit(&self, scope: &str, name: &str, payload: &EventPayload) -> Result<()>;
}

/// One notification as delivered to a bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub scope: String,
    pub name: String,
    pub payload: EventPayload,
}

/// Keeps every event in memory; subscribers poll or drain it
#[derive(Debug, Default)]
pub struct MemoryEventBus {
    events: Mutex<Vec<EmittedEvent>>,
}

impl MemoryEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drain everything emitted so far
    pub fn take(&self) -> Vec<EmittedEvent> {
        self.events.lock().map(|mut e| std::mem::take(&mut *e)).unwrap_or_default()
    }

    pub fn cache_updates(&self) -> Vec<TaskCacheUpdated> {
        self.events()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::TaskCacheUpdated(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventBus for MemoryEventBus {
    fn emit(&self, scope: &str, name: &str, payload: &EventPayload) -> Result<()> {
        let mut events = self.events.lock().map_err(|_| eyre!("Event bus lock poisoned"))?;
        events.push(EmittedEvent {
            scope: scope.to_string(),
            name: name.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Appends every event as one JSON line to a journal file
#[derive(Debug, Clone)]
pub struct JournalEventBus {
    path: PathBuf,
}

impl JournalEventBus {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> Result<Vec<EmittedEvent>> {
        jsonl::read_jsonl(&self.path)
    }
}

impl EventBus for JournalEventBus {
    fn emit(&self, scope: &str, name: &str, payload: &EventPayload) -> Result<()> {
        trace!(scope, name, seq = payload.seq(), "Journaling event");
        jsonl::append_jsonl(
            &self.path,
            &EmittedEvent {
                scope: scope.to_string(),
                name: name.to_string(),
                payload: payload.clone(),
            },
        )
    }
}

/// Subscriber-side loop breaker.
///
/// A writer takes its sequence numbers through [`EchoGuard::record_write`] and passes
/// them as `source_seq` on its mutations; updates carrying one of those values are its
/// own writes coming back and can be dropped instead of re-rendered.
#[derive(Debug)]
pub struct EchoGuard {
    own: VecDeque<u64>,
    capacity: usize,
}

impl EchoGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            own: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Take a fresh sequence number for an outgoing write and remember it
    pub fn record_write(&mut self, context: &Context) -> u64 {
        let seq = context.seq().next();
        if self.own.len() == self.capacity {
            self.own.pop_front();
        }
        self.own.push_back(seq);
        seq
    }

    pub fn is_echo(&self, update: &TaskCacheUpdated) -> bool {
        update.source_seq != 0 && self.own.contains(&update.source_seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn update(seq: u64, source_seq: u64) -> EventPayload {
        EventPayload::TaskCacheUpdated(TaskCacheUpdated {
            changed_files: vec!["a.md".to_string()],
            stats: CacheStats {
                total: 1,
                changed: 1,
                ics_events: None,
                file_tasks: None,
            },
            timestamp: 1000,
            seq,
            source_seq,
        })
    }

    #[test]
    fn test_seq_strictly_increasing_and_resettable() {
        let context = Context::new();
        let a = context.seq().next();
        let b = context.seq().next();
        assert_eq!(a, 1);
        assert!(b > a);
        assert_eq!(context.seq().current(), b);

        context.seq().reset();
        assert_eq!(context.seq().next(), 1);
    }

    #[test]
    fn test_seq_resume_only_moves_forward() {
        let seq = Seq::new();
        seq.resume_from(41);
        assert_eq!(seq.next(), 42);
        seq.resume_from(10);
        assert_eq!(seq.next(), 43);
    }

    #[test]
    fn test_seq_unique_across_threads() {
        let context = Context::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ctx = context.clone();
                std::thread::spawn(move || (0..100).map(|_| ctx.seq().next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 400);
    }

    #[test]
    fn test_global_context_is_shared() {
        let a = Context::global();
        let b = Context::global();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_payload_serialization_tagged() {
        let json = serde_json::to_string(&update(3, 7)).unwrap();
        assert!(json.contains("\"type\":\"task-cache-updated\""));
        assert!(json.contains("\"source_seq\":7"));
        assert!(!json.contains("ics_events"));
    }

    #[test]
    fn test_memory_bus_records_and_drains() {
        let bus = MemoryEventBus::new();
        bus.emit("app", TASK_CACHE_UPDATED, &update(1, 0)).unwrap();
        bus.emit("app", TASK_CACHE_UPDATED, &update(2, 0)).unwrap();

        assert_eq!(bus.len(), 2);
        assert_eq!(bus.cache_updates()[1].seq, 2);
        assert_eq!(bus.take().len(), 2);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_journal_bus_appends_lines() {
        let temp = TempDir::new().unwrap();
        let bus = JournalEventBus::new(temp.path().join("events.jsonl"));

        bus.emit("app", TASK_CACHE_UPDATED, &update(1, 0)).unwrap();
        bus.emit("app", TASK_CACHE_UPDATED, &update(2, 5)).unwrap();

        let events = bus.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].scope, "app");
        assert_eq!(events[1].payload, update(2, 5));
    }

    #[test]
    fn test_echo_guard_recognizes_own_writes() {
        let context = Context::new();
        let mut guard = EchoGuard::new(2);
        let first = guard.record_write(&context);
        let second = guard.record_write(&context);

        let echo = TaskCacheUpdated {
            source_seq: second,
            ..match update(10, 0) {
                EventPayload::TaskCacheUpdated(u) => u,
                _ => unreachable!(),
            }
        };
        assert!(guard.is_echo(&echo));

        let foreign = TaskCacheUpdated { source_seq: 0, ..echo.clone() };
        assert!(!guard.is_echo(&foreign));

        // Capacity evicts the oldest remembered write
        guard.record_write(&context);
        let stale = TaskCacheUpdated { source_seq: first, ..echo };
        assert!(!guard.is_echo(&stale));
    }
}
