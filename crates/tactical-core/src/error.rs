//! Error taxonomy for the version chain store.
//!
//! Errors are values, not strings: every variant carries the originating
//! [`ChainKey`] (and, where relevant, the versions involved) so callers can
//! inspect and recover from them instead of parsing a message.

use thiserror::Error;

use crate::key::ChainKey;
use crate::record::Context;
use crate::value::Value;
use crate::version::Version;

/// Errors raised by [`crate::ChainKey`]/[`crate::Version`]-level store operations.
///
/// Contract violations (`KeyNotFound`, `OutdatedTargetVersion`,
/// `InvalidInitialTargetVersion`) surface synchronously to the caller and
/// never mutate state. They are distinct from `OutdatedMutation`, which is
/// not an error but an event on the store's `outdated` stream.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `commit`/`abandon` against a chain with no chain state.
    #[error("key not found: {key:?}")]
    KeyNotFound {
        /// The chain the operation targeted.
        key: ChainKey,
    },

    /// `commit` against a version that is no longer the chain's current head.
    #[error("outdated target version for {key:?}: current={current:?}, target={target:?}")]
    OutdatedTargetVersion {
        /// The chain the operation targeted.
        key: ChainKey,
        /// The chain's actual current version.
        current: Version,
        /// The version the caller expected to still be current.
        target: Version,
        /// The mutation value the caller attempted to commit.
        mutation: Value,
        /// The mutation context the caller attempted to commit.
        context: Context,
    },

    /// `abandon` called with an initial (`sub == 0`) target.
    #[error("cannot abandon an initial version for {key:?}: {target:?}")]
    InvalidInitialTargetVersion {
        /// The chain the operation targeted.
        key: ChainKey,
        /// The initial version that cannot be abandoned.
        target: Version,
    },

    /// The underlying KV engine failed mid-transaction; the transaction was
    /// aborted and no event was emitted.
    #[error("kv engine failure: {0}")]
    Kv(#[from] KvError),

    /// A value entering the store fell outside the closed [`Value`] sum.
    ///
    /// This crate's own `Value` is a closed enum, so nothing built from it
    /// can fail to serialize; this variant exists for the boundary where
    /// external data (e.g. `serde_json::Value` from the application or the
    /// backend) is converted in, per the key-encoding contract.
    #[error(transparent)]
    UnsupportedType(#[from] crate::value::UnsupportedType),
}

impl StoreError {
    /// The chain key this error originated from, present on every variant
    /// except [`StoreError::Kv`], which may not be scoped to a single chain.
    pub fn key(&self) -> Option<&ChainKey> {
        match self {
            StoreError::KeyNotFound { key } => Some(key),
            StoreError::OutdatedTargetVersion { key, .. } => Some(key),
            StoreError::InvalidInitialTargetVersion { key, .. } => Some(key),
            StoreError::Kv(_) => None,
            StoreError::UnsupportedType(_) => None,
        }
    }
}

/// Errors surfaced by a [`crate`] KV engine implementation.
///
/// The contract in §6 says implementations "may choose to surface [a
/// mid-transaction failure] as a generic IO error" — this is that generic
/// signal, kept free of any backend-specific detail so in-memory and
/// persistent engines share one error shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The transaction could not be completed; no writes took effect.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Human-readable detail, not matched on by callers.
        reason: String,
    },
    /// The store name was not one of the engine's declared object stores.
    #[error("unknown store: {0}")]
    UnknownStore(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn key() -> ChainKey {
        ChainKey::new(Value::from("k"))
    }

    #[test]
    fn key_not_found_exposes_its_key() {
        let err = StoreError::KeyNotFound { key: key() };
        assert!(err.key().is_some());
        assert!(err.to_string().contains("key not found"));
    }

    #[test]
    fn outdated_target_version_message_includes_both_versions() {
        let err = StoreError::OutdatedTargetVersion {
            key: key(),
            current: Version::initial("foobase"),
            target: Version::initial("notbase"),
            mutation: Value::from("x"),
            context: Value::empty_object(),
        };
        let message = err.to_string();
        assert!(message.contains("foobase"));
        assert!(message.contains("notbase"));
    }

    #[test]
    fn invalid_initial_target_version_rejects_sub_zero() {
        let err = StoreError::InvalidInitialTargetVersion {
            key: key(),
            target: Version::initial("foobase"),
        };
        assert!(matches!(err, StoreError::InvalidInitialTargetVersion { .. }));
    }

    #[test]
    fn kv_error_converts_into_store_error() {
        let kv_err = KvError::TransactionAborted {
            reason: "disk full".into(),
        };
        let store_err: StoreError = kv_err.into();
        assert!(store_err.key().is_none());
        assert!(store_err.to_string().contains("disk full"));
    }
}
