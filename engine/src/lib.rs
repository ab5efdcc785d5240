//! # Outbox Engine
//!
//! The client-side core of an offline-capable document database.
//!
//! This crate queues local writes until a backend confirms them, overlays the
//! pending writes on server data so they are visible immediately, and turns
//! result set changes into positional change lists for listeners.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Persistent values**: Indexes and caches are immutable versions that
//!   share structure, so old readers stay valid
//! - **Loud invariants**: Caller bugs surface as [`Error`]s before any state
//!   changes, never as silent repairs
//!
//! ## Core Concepts
//!
//! ### Mutation queue
//!
//! Local writes are grouped into [`MutationBatch`]es and appended to a
//! [`MutationQueue`] under increasing ids. The backend acknowledges batches in
//! id order. Removed batches either leave the queue or, when they are not at
//! the front, become tombstones so ids keep mapping to positions.
//!
//! ### Sorted index
//!
//! [`SortedSet`] is a persistent balanced tree with an injected comparator.
//! It backs the key index of the queue, [`ReferenceSet`] and [`DocumentSet`].
//!
//! ### Views
//!
//! A [`QueryView`] keeps a [`ViewCache`] of server and listener snapshots and
//! emits [`ViewSnapshot`]s. [`compute_changes`] derives the positional change
//! list a listener applies to its own copy of the results.
//!
//! ## Quick Start
//!
//! ```rust
//! use outbox_engine::{
//!     DocumentKey, EngineConfig, LocalStore, Mutation, Query, QueryView, ResourcePath,
//!     StreamToken,
//! };
//! use serde_json::json;
//!
//! let mut store = LocalStore::new(EngineConfig::default());
//! store.start().unwrap();
//!
//! // 1. Write locally
//! let key = DocumentKey::from_string("rooms/lobby").unwrap();
//! let batch = store
//!     .write_locally(1706745600000, vec![Mutation::set(key.clone(), json!({"topic": "hi"}))])
//!     .unwrap();
//! assert_eq!(batch.batch_id, 1);
//!
//! // 2. Listen to a query
//! let query = Query::at_path(ResourcePath::from_string("rooms").unwrap());
//! let mut view = QueryView::new(query, 1);
//! let snapshot = store.update_view(&mut view).unwrap().unwrap();
//! assert!(snapshot.has_pending_writes);
//! assert_eq!(snapshot.changes().unwrap()[0].new_index, Some(0));
//!
//! // 3. The backend accepts the write
//! store.acknowledge_batch(batch.batch_id, StreamToken::from(vec![1])).unwrap();
//! assert!(!store.has_pending_writes());
//! ```
//!
//! ## Persistence
//!
//! Use [`MemoryMutationQueue::export_state`] and
//! [`MemoryMutationQueue::import_state`] with [`QueueSnapshot`] to persist the
//! queue between sessions.

pub mod config;
pub mod diff;
pub mod document;
pub mod error;
pub mod gc;
pub mod local_store;
pub mod mutation;
pub mod mutation_queue;
pub mod path;
pub mod query;
pub mod reference;
pub mod snapshot;
pub mod sorted;
pub mod view;
pub mod view_cache;

// Re-export main types at crate root
pub use config::{ConfigError, EngineConfig, GarbageCollection};
pub use diff::{compute_changes, ChangeKind, ChangeType, DocumentChange, DocumentViewChange};
pub use document::{DocComparator, Document, DocumentSet};
pub use error::Error;
pub use gc::{EagerGarbageCollector, GarbageCollector, GarbageSource, NoOpGarbageCollector};
pub use local_store::LocalStore;
pub use mutation::{Mutation, MutationBatch};
pub use mutation_queue::{MemoryMutationQueue, MutationQueue, StreamToken};
pub use path::{DocumentKey, PathError, ResourcePath};
pub use query::{Direction, OrderBy, Query};
pub use reference::{DocReference, ReferenceSet};
pub use snapshot::{QueueSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use sorted::{Comparator, SortedSet};
pub use view::{QueryView, ViewSnapshot};
pub use view_cache::{CacheNode, ViewCache};

/// Type aliases for clarity
pub type BatchId = i64;
pub type TargetId = i64;
pub type Timestamp = u64;

/// Highest acknowledged batch id before anything was acknowledged. Compares
/// less than every real batch id.
pub const BATCH_ID_UNKNOWN: BatchId = -1;
