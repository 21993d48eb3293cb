//! Records and chain state: the payloads persisted per version and per chain.

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::version::Version;

/// Opaque application metadata attached to a mutation at commit time.
///
/// The backend uses this to correlate an inbound data frame with the
/// mutation that produced it (see `DataFrame.mutation_context` in
/// `tactical-sync`).
pub type Context = Value;

/// A single `(version, value, context)` triple: one row in the records
/// object store, reconstituted with its version for callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The version this record was stored under.
    pub version: Version,
    /// The record's value.
    pub value: Value,
    /// Opaque metadata supplied at commit time (empty object for pushed records).
    pub context: Context,
}

impl Record {
    /// Construct a record, pairing a version with the entry read from storage.
    pub fn new(version: Version, entry: Entry) -> Record {
        Record {
            version,
            value: entry.value,
            context: entry.context,
        }
    }

    /// Split back into the version and the entry that would be persisted.
    pub fn into_parts(self) -> (Version, Entry) {
        (
            self.version,
            Entry {
                value: self.value,
                context: self.context,
            },
        )
    }
}

/// The persisted payload for one record: everything except the version,
/// which is encoded in the record's key rather than its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// The record's value.
    pub value: Value,
    /// Opaque metadata supplied at commit time.
    pub context: Context,
}

impl Entry {
    /// An entry with no mutation context, the shape `push` writes.
    pub fn pushed(value: Value) -> Entry {
        Entry {
            value,
            context: Value::empty_object(),
        }
    }
}

/// Persisted metadata for one chain: its head and any superseded-but-retained
/// pending mutations awaiting application resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    /// The head of the chain: the version the client considers authoritative.
    pub current: Version,
    /// Pending mutations superseded by a backend push before being acknowledged.
    pub outdated: Vec<Version>,
}

impl ChainState {
    /// The state immediately after a chain's first successful `push`.
    pub fn initial(current: Version) -> ChainState {
        ChainState {
            current,
            outdated: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_entry_has_empty_context() {
        let entry = Entry::pushed(Value::from("x"));
        assert_eq!(entry.context, Value::empty_object());
    }

    #[test]
    fn record_round_trips_through_parts() {
        let version = Version::initial("b");
        let record = Record::new(version.clone(), Entry::pushed(Value::from("x")));
        let (v, entry) = record.into_parts();
        assert_eq!(v, version);
        assert_eq!(entry.value, Value::from("x"));
    }

    #[test]
    fn initial_chain_state_has_no_outdated() {
        let state = ChainState::initial(Version::initial("b"));
        assert!(state.outdated.is_empty());
    }
}
