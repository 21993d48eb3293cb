//! # Tactical
//!
//! An offline-first client-side data synchronization layer: a versioned
//! local object store that mediates between an application, a persistent
//! key-value cache, and a remote backend.
//!
//! The store keeps a per-object **version chain** so that the most recent
//! authoritative value is always servable locally, local mutations can
//! accumulate on top of server versions while offline, and conflicts between
//! an outstanding local mutation and an incoming server push are surfaced to
//! the application instead of silently resolved.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tactical::{ChainKey, InMemoryBackend, InMemoryKv, DataManager, Value, VersionChainStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(VersionChainStore::new(Arc::new(InMemoryKv::default())));
//!     let backend: Arc<dyn tactical::BackendChannel> = Arc::new(InMemoryBackend::new());
//!     let manager = DataManager::new(store, backend);
//!
//!     let key = ChainKey::new(Value::from("doc-1"));
//!     let _values = manager.request(key).await;
//! }
//! ```
//!
//! # Architecture
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | [`tactical_core`] | The data model: [`Value`], [`Version`], [`ChainKey`]/[`RecordKey`], [`Record`]/[`ChainState`], [`StoreError`]. |
//! | [`tactical_store`] | [`VersionChainStore`]: the transactional state machine and its `outdated`/`pending` event streams, plus the pluggable [`KvEngine`] it persists through. |
//! | [`tactical_sync`] | [`DataManager`]: per-key fan-out joining the store with a [`BackendChannel`]. |
//!
//! Each crate is usable standalone; this crate is a convenience facade that
//! re-exports the surface an application embedding Tactical actually needs.

pub use tactical_core::{
    ChainKey, ChainState, Context, Entry, KvError, Record, RecordKey, StoreError, UnsupportedType,
    Value, Version,
};
pub use tactical_store::{
    InMemoryKv, KvEngine, KvTransaction, KvValue, OutdatedMutation, PendingMutation, StoreConfig,
    VersionChainStore,
};
pub use tactical_sync::{
    BackendChannel, DataFrame, DataManager, FailureFrame, InMemoryBackend, OutboundCall, Updater,
};
