//! Events emitted by the version chain store.
//!
//! Both streams are hot multicast with no replay: a subscriber established
//! after an emission simply never sees it. The store never completes either
//! stream.

use tactical_core::{ChainKey, Record};

/// Emitted when a `push` supersedes a pending mutation that was not
/// acknowledged via `resolves`. The application resolves it by `commit`ing a
/// new mutation on the new current version, or by `abandon`ing it.
#[derive(Debug, Clone)]
pub struct OutdatedMutation {
    /// The chain this event concerns.
    pub key: ChainKey,
    /// The new current record written by the push that caused this event.
    pub current: Record,
    /// The superseded pending mutation.
    pub mutation: Record,
    /// The initial record the mutation was built on top of.
    pub initial: Record,
}

/// Emitted whenever `commit` successfully layers a new mutation onto a chain.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    /// The chain this event concerns.
    pub key: ChainKey,
    /// The newly committed mutation record.
    pub mutation: Record,
}
