// TaskRepo - Indexed task repository with debounced snapshot persistence and sequenced change events

pub mod clock;
pub mod config;
pub mod events;
pub mod filter;
pub mod indexer;
pub mod jsonl;
pub mod models;
pub mod record;
pub mod repository;
pub mod scheduler;
pub mod storage;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PersistConfig, RepositoryConfig};
pub use events::{
    CacheReady, CacheStats, Context, EchoGuard, EventBus, EventPayload, JournalEventBus, MemoryEventBus,
    TaskCacheUpdated,
};
pub use filter::{FilterKind, FilterOp, FilterValue, SortCriterion, SortDirection, SortField, TaskFilter};
pub use indexer::{DateField, IndexSnapshot, Indexer, TaskIndexer};
pub use models::{Task, TaskMetadata, now_ms};
pub use repository::{DateRange, IndexSummary, Repository, UpdateOptions};
pub use storage::{MemoryStorage, SqliteStorage, Storage};
