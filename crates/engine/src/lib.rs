//! Offline-first core of pennywise.
//!
//! Mutations go to the server when it is reachable and to persisted pending
//! queues when it is not. Reads merge the last server snapshot with those
//! queues, and [`SyncEngine::sync_pending`] replays them once the device is
//! back online.

pub use cache::ServerCache;
pub use error::EngineError;
pub use kv_entries::SqliteStore;
pub use merge::{MergedRecord, build_merged_view};
pub use money::Amount;
pub use queue::{
    LOCAL_ID_PREFIX, PendingCreate, PendingDelete, PendingQueues, PendingUpdate, QueueCounts,
    is_local_id, local_id,
};
pub use remote::{ApiError, RemoteApi};
pub use repository::Repository;
pub use service::{MergedView, Mutation, OfflineService};
pub use store::{KeyValueStore, MemoryStore};
pub use sync::{DEFAULT_NAMESPACE, PendingCounts, SyncEngine, SyncEngineBuilder, SyncReport};

mod cache;
mod error;
mod kv_entries;
mod merge;
mod money;
mod queue;
pub mod recurrence;
mod remote;
mod repository;
mod service;
mod store;
mod sync;

pub(crate) type ResultEngine<T> = Result<T, EngineError>;
