//! The versioned local object store.
//!
//! This crate owns the one stateful core of the sync layer: the
//! [`VersionChainStore`], the pluggable [`kv::KvEngine`] it persists through,
//! and the two event types it emits when a push supersedes a pending
//! mutation ([`event::OutdatedMutation`]) or a commit lays down a new one
//! ([`event::PendingMutation`]).
//!
//! `tactical-sync` builds the per-key reactive fan-out on top of this crate;
//! nothing in here knows about the backend channel or the application.

#![warn(missing_docs)]

pub mod config;
pub mod event;
pub mod kv;
pub mod store;

pub use config::StoreConfig;
pub use event::{OutdatedMutation, PendingMutation};
pub use kv::{InMemoryKv, KvEngine, KvTransaction, KvValue};
pub use store::VersionChainStore;
