//! Chain and record keys.
//!
//! A [`ChainKey`] identifies one logical object; a [`RecordKey`] identifies
//! one version of that object. Both carry a `serial` — the canonical string
//! form used as the literal key in the KV engine's `"chains"` and
//! `"records"` object stores (see the store's persisted-layout contract).

use serde::{Deserialize, Serialize};

use crate::value::{self, Value};
use crate::version::Version;

/// Identifies a logical object. Equality and hashing are structural, based
/// on the canonical serial, so two `ChainKey`s built from differently
/// ordered but structurally-equal application keys compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainKey {
    /// The application-supplied structured key, retained for inspection.
    pub structured: Value,
    /// Canonical serialized form of `structured`.
    serial: String,
}

impl ChainKey {
    /// Build a `ChainKey` from an application-supplied structured key.
    pub fn new(structured: Value) -> ChainKey {
        let serial = value::serialize(&structured);
        ChainKey { structured, serial }
    }

    /// The canonical serialized form, stable under key reordering.
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl PartialEq for ChainKey {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for ChainKey {}

impl std::hash::Hash for ChainKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

/// Identifies one version of one chain: the literal key used in the
/// `"records"` object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    serial: String,
}

impl RecordKey {
    /// Build the record key for `(chain, version)`.
    ///
    /// Per the persisted layout, the serial is `chainKey.serial ++
    /// version.serial`; the version serial is its own canonical JSON-object
    /// form so the concatenation remains unambiguous (the chain serial's
    /// trailing brace can never be mistaken for the version's opening one,
    /// since a version serial always starts with `{"base"`).
    pub fn new(chain: &ChainKey, version: &Version) -> RecordKey {
        let version_value = Value::Object(
            [
                ("base".to_string(), Value::Str(version.base.clone())),
                ("sub".to_string(), Value::Num(version.sub as f64)),
            ]
            .into_iter()
            .collect(),
        );
        let serial = format!("{}{}", chain.serial(), value::serialize(&version_value));
        RecordKey { serial }
    }

    /// The literal KV key.
    pub fn serial(&self) -> &str {
        &self.serial
    }
}
