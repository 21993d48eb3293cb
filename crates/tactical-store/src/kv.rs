//! The pluggable KV engine abstraction.
//!
//! This is the external collaborator named in §6: a durable store of opaque
//! blobs keyed by `(store-name, string)`, supporting scoped transactions.
//! The store depends on nothing beyond this trait, so a persistent engine
//! can be swapped in without touching [`crate::store`].
//! [`InMemoryKv`] is the default implementation required for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tactical_core::KvError;

/// A blob stored under one KV key. Structured rather than a raw byte string
/// so engines can deep-clone without a serialization round trip.
pub type KvValue = serde_json::Value;

/// Durable storage of opaque blobs across a fixed set of named stores.
///
/// Implementations must be `Send + Sync` so a single engine instance can be
/// shared by every chain the store manages.
#[async_trait]
pub trait KvEngine: Send + Sync {
    /// Read `key` from `store`. A non-existent key returns `None`.
    async fn get(&self, store: &str, key: &str) -> Result<Option<KvValue>, KvError>;

    /// Write `value` under `key` in `store`. Returns `true` iff written.
    async fn put(&self, store: &str, key: &str, value: KvValue) -> Result<bool, KvError>;

    /// Remove `key` from `store`. Returns `true` iff the key existed.
    async fn remove(&self, store: &str, key: &str) -> Result<bool, KvError>;

    /// All keys currently present in `store`.
    async fn keys(&self, store: &str) -> Result<Vec<String>, KvError>;

    /// Begin a transaction scoped to `stores`, holding an exclusive lock on
    /// them until the returned transaction is committed.
    ///
    /// Engines must serialize conflicting transactions; the in-memory engine
    /// does this with a single lock shared by every transaction regardless of
    /// which stores it names, which is correct (if coarser than necessary)
    /// for the single-threaded cooperative model this crate targets.
    async fn transaction(&self, stores: &[&str]) -> Result<Box<dyn KvTransaction>, KvError>;
}

/// A transaction in progress: the same get/put/remove surface as
/// [`KvEngine`], plus [`KvTransaction::commit`] to release the lock and make
/// writes visible to subsequent operations.
///
/// Writes made before `commit` must not be observable to other callers of
/// the engine; dropping a transaction without committing discards them.
#[async_trait]
pub trait KvTransaction: Send {
    /// Read `key` from `store`, seeing this transaction's own uncommitted writes.
    async fn get(&mut self, store: &str, key: &str) -> Result<Option<KvValue>, KvError>;

    /// Write `value` under `key` in `store`, visible only within this transaction
    /// until `commit`.
    async fn put(&mut self, store: &str, key: &str, value: KvValue) -> Result<bool, KvError>;

    /// Remove `key` from `store` within this transaction.
    async fn remove(&mut self, store: &str, key: &str) -> Result<bool, KvError>;

    /// Commit all writes made so far, making them visible and releasing the
    /// transaction's lock.
    async fn commit(self: Box<Self>) -> Result<(), KvError>;
}

/// The default in-memory [`KvEngine`], backed by one [`DashMap`] per store
/// name with deep-clone-on-read/write isolation, as required by the KV
/// engine contract.
#[derive(Debug)]
pub struct InMemoryKv {
    stores: HashMap<String, Arc<DashMap<String, KvValue>>>,
    lock: Arc<Mutex<()>>,
}

impl InMemoryKv {
    /// Create an engine with the given store names pre-declared. The
    /// version chain store always opens `["chains", "records"]`.
    pub fn new(stores: &[&str]) -> InMemoryKv {
        InMemoryKv {
            stores: stores
                .iter()
                .map(|name| (name.to_string(), Arc::new(DashMap::new())))
                .collect(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn store(&self, name: &str) -> Result<&Arc<DashMap<String, KvValue>>, KvError> {
        self.stores
            .get(name)
            .ok_or_else(|| KvError::UnknownStore(name.to_string()))
    }
}

impl Default for InMemoryKv {
    /// The version chain store's two object stores, pre-declared.
    fn default() -> Self {
        InMemoryKv::new(&["chains", "records"])
    }
}

#[async_trait]
impl KvEngine for InMemoryKv {
    async fn get(&self, store: &str, key: &str) -> Result<Option<KvValue>, KvError> {
        Ok(self.store(store)?.get(key).map(|entry| entry.clone()))
    }

    async fn put(&self, store: &str, key: &str, value: KvValue) -> Result<bool, KvError> {
        self.store(store)?.insert(key.to_string(), value);
        Ok(true)
    }

    async fn remove(&self, store: &str, key: &str) -> Result<bool, KvError> {
        Ok(self.store(store)?.remove(key).is_some())
    }

    async fn keys(&self, store: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .store(store)?
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn transaction(&self, stores: &[&str]) -> Result<Box<dyn KvTransaction>, KvError> {
        for name in stores {
            self.store(name)?;
        }
        let guard = self.lock.clone().lock_owned().await;
        let scoped = stores
            .iter()
            .map(|name| Ok((name.to_string(), self.store(name)?.clone())))
            .collect::<Result<HashMap<_, _>, KvError>>()?;
        Ok(Box::new(InMemoryTransaction {
            stores: scoped,
            // Held for its lifetime, never read: its presence is what
            // serializes concurrent transactions against this engine.
            _guard: guard,
        }))
    }
}

/// A pending write inside a transaction: a put, or a remove (recorded
/// rather than applied immediately, so it can still be rolled back).
enum Staged {
    Put(KvValue),
    Removed,
}

struct InMemoryTransaction {
    stores: HashMap<String, Arc<DashMap<String, KvValue>>>,
    /// Writes staged so far, keyed by `(store, key)`. Nothing here is
    /// applied to `stores` until `commit` — the whole point of this overlay
    /// is that a transaction dropped without committing (an early `?`
    /// return, say) leaves the shared maps untouched.
    overlay: HashMap<(String, String), Staged>,
    _guard: OwnedMutexGuard<()>,
}

impl InMemoryTransaction {
    fn store(&self, name: &str) -> Result<&Arc<DashMap<String, KvValue>>, KvError> {
        self.stores
            .get(name)
            .ok_or_else(|| KvError::UnknownStore(name.to_string()))
    }
}

#[async_trait]
impl KvTransaction for InMemoryTransaction {
    async fn get(&mut self, store: &str, key: &str) -> Result<Option<KvValue>, KvError> {
        match self.overlay.get(&(store.to_string(), key.to_string())) {
            Some(Staged::Put(value)) => Ok(Some(value.clone())),
            Some(Staged::Removed) => Ok(None),
            None => Ok(self.store(store)?.get(key).map(|entry| entry.clone())),
        }
    }

    async fn put(&mut self, store: &str, key: &str, value: KvValue) -> Result<bool, KvError> {
        self.store(store)?;
        self.overlay
            .insert((store.to_string(), key.to_string()), Staged::Put(value));
        Ok(true)
    }

    async fn remove(&mut self, store: &str, key: &str) -> Result<bool, KvError> {
        let existed = match self.overlay.get(&(store.to_string(), key.to_string())) {
            Some(Staged::Put(_)) => true,
            Some(Staged::Removed) => false,
            None => self.store(store)?.contains_key(key),
        };
        self.overlay
            .insert((store.to_string(), key.to_string()), Staged::Removed);
        Ok(existed)
    }

    async fn commit(self: Box<Self>) -> Result<(), KvError> {
        // Only now do staged writes land in the shared DashMaps, guarded by
        // the lock this transaction already holds — no other transaction on
        // these stores can be running concurrently to observe a partial
        // apply, and a panic or early return before this point would have
        // dropped `self.overlay` with no effect at all.
        for ((store, key), staged) in self.overlay {
            let map = self.stores.get(&store).ok_or_else(|| KvError::UnknownStore(store.clone()))?;
            match staged {
                Staged::Put(value) => {
                    map.insert(key, value);
                }
                Staged::Removed => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_on_missing_key_returns_none() {
        let kv = InMemoryKv::default();
        assert_eq!(kv.get("chains", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_store_is_an_error() {
        let kv = InMemoryKv::default();
        assert!(kv.get("bogus", "k").await.is_err());
    }

    #[tokio::test]
    async fn transaction_writes_are_visible_after_commit() {
        let kv = InMemoryKv::default();
        let mut txn = kv.transaction(&["chains"]).await.unwrap();
        txn.put("chains", "k", serde_json::json!({"v": 1})).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(
            kv.get("chains", "k").await.unwrap(),
            Some(serde_json::json!({"v": 1}))
        );
    }

    #[tokio::test]
    async fn transaction_sees_its_own_writes_before_commit() {
        let kv = InMemoryKv::default();
        let mut txn = kv.transaction(&["chains"]).await.unwrap();
        txn.put("chains", "k", serde_json::json!(1)).await.unwrap();
        assert_eq!(txn.get("chains", "k").await.unwrap(), Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn dropping_a_transaction_without_commit_discards_its_writes() {
        let kv = InMemoryKv::default();
        kv.put("chains", "k", serde_json::json!("original")).await.unwrap();
        {
            let mut txn = kv.transaction(&["chains"]).await.unwrap();
            txn.put("chains", "k", serde_json::json!("staged")).await.unwrap();
            txn.remove("chains", "k").await.unwrap();
            // txn dropped here without commit
        }
        assert_eq!(
            kv.get("chains", "k").await.unwrap(),
            Some(serde_json::json!("original"))
        );
    }

    #[tokio::test]
    async fn uncommitted_writes_are_not_observable_outside_the_transaction() {
        let kv = InMemoryKv::default();
        let mut txn = kv.transaction(&["chains"]).await.unwrap();
        txn.put("chains", "k", serde_json::json!("staged")).await.unwrap();
        assert_eq!(kv.get("chains", "k").await.unwrap(), None);
        txn.commit().await.unwrap();
        assert_eq!(kv.get("chains", "k").await.unwrap(), Some(serde_json::json!("staged")));
    }

    #[tokio::test]
    async fn deep_clone_on_read_isolates_mutation() {
        let kv = InMemoryKv::default();
        kv.put("chains", "k", serde_json::json!({"nested": [1, 2]}))
            .await
            .unwrap();
        let mut read = kv.get("chains", "k").await.unwrap().unwrap();
        read["nested"][0] = serde_json::json!(999);
        let still = kv.get("chains", "k").await.unwrap().unwrap();
        assert_eq!(still["nested"][0], serde_json::json!(1));
    }
}
