//! Offline-tolerant mutation path: a durable queue of pending graph
//! operations, the client that fills it, and the worker that drains it.

pub mod client;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod worker;

pub use client::{GraphClient, MutationOutcome};
pub use queue::{OfflineMutationQueue, PendingAction, PendingOperation, SyncReport};
pub use remote::{LocalRemote, OperationResult, RemoteGraph};
pub use storage::{MemoryKvStore, PendingStore, SqliteKvStore};
pub use worker::{SyncHandle, SyncWorker};
