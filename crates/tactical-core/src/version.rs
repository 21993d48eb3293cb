//! Version identifiers.
//!
//! A [`Version`] names one record in a chain's history. `base` is minted by
//! the backend; `sub` distinguishes the server-pushed initial record
//! (`sub == 0`) from locally-authored mutations layered on top of it
//! (`sub > 0`). See the module doc on `random_sub` for why mutation subs are
//! random rather than a monotonic counter.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single point in a chain's version history.
///
/// Mutations are always rebased onto a fresh backend version before they
/// leave the client, so `sub` only needs to be unique within the one
/// pending-mutation slot a chain can hold at a time — not globally
/// monotonic. A uniformly random `u32` in `[1, u32::MAX]` satisfies that
/// with no persisted counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Backend-minted identifier for a server-authoritative snapshot.
    pub base: String,
    /// `0` for the initial (server-pushed) record, `>0` for a local mutation.
    pub sub: u32,
}

impl Version {
    /// The initial version of `base` — the server-pushed record, `sub == 0`.
    pub fn initial(base: impl Into<String>) -> Version {
        Version {
            base: base.into(),
            sub: 0,
        }
    }

    /// A local mutation version layered on `base`, with a random nonzero sub.
    pub fn mutation(base: impl Into<String>) -> Version {
        Version {
            base: base.into(),
            sub: random_sub(),
        }
    }

    /// `true` if this is an initial (server-pushed) version.
    pub fn is_initial(&self) -> bool {
        self.sub == 0
    }

    /// The initial version sharing this version's base.
    ///
    /// For an already-initial version this returns a version equal to
    /// itself; callers generally only call this on mutation versions, where
    /// it names the rebase anchor the mutation was built on top of.
    pub fn as_initial(&self) -> Version {
        Version::initial(self.base.clone())
    }
}

/// Draw a uniformly random nonzero `u32` for a new mutation's sub-version.
fn random_sub() -> u32 {
    loop {
        let candidate = rand::thread_rng().gen::<u32>();
        if candidate != 0 {
            return candidate;
        }
    }
}
