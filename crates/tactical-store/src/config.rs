//! Store configuration.
//!
//! The KV engine itself is external (§1) and knows nothing of "databases" —
//! that's a persistence-layer concept the store only tracks for logging, so
//! a process juggling more than one [`crate::VersionChainStore`] can tell
//! their traces apart. [`StoreConfig::event_channel_capacity`] is the one
//! tunable that actually belongs to this crate.

use serde::{Deserialize, Serialize};

/// Default database name, per §6's persisted-layout contract.
pub const DEFAULT_DATABASE_NAME: &str = "tactical_db";

/// Default capacity of the `outdated`/`pending` broadcast channels.
///
/// Only bounds how far a lagging subscriber may fall behind before it is
/// notified of a skip; neither stream replays history to new subscribers
/// regardless of capacity.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for one [`crate::VersionChainStore`] instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Advisory label for the backing KV database, attached to trace spans.
    /// Concurrent stores are not supported against the same database name
    /// (§5); this does not enforce that, only names it in logs.
    pub database_name: String,
    /// Capacity of the `outdated` and `pending` broadcast channels.
    pub event_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}
