//! Foundational types for the tactical sync layer.
//!
//! This crate defines the data model shared by every other crate in the
//! workspace:
//! - [`value`]: the closed value sum and its canonical serialization.
//! - [`version`]: `(base, sub)` version identifiers.
//! - [`key`]: chain and record keys derived from canonical serialization.
//! - [`record`]: the payloads persisted per version (`Record`/`Entry`) and
//!   per chain (`ChainState`).
//! - [`error`]: the store's error taxonomy.

#![warn(missing_docs)]

pub mod error;
pub mod key;
pub mod record;
pub mod value;
pub mod version;

pub use error::{KvError, StoreError};
pub use key::{ChainKey, RecordKey};
pub use record::{ChainState, Context, Entry, Record};
pub use value::{UnsupportedType, Value};
pub use version::Version;
