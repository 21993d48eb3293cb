//! The Data Manager: per-key fan-out joining the [`VersionChainStore`] with a
//! [`BackendChannel`].
//!
//! State is a mapping from serialized [`ChainKey`] to a per-key record
//! stream. The stream is created on first [`DataManager::request`]/
//! [`DataManager::begin_update`] and torn down once its last subscriber goes
//! away (§4.3 "Subscriber tracking"). Two background tasks, spawned once at
//! construction, drive the reactive part: one forwards the store's `pending`
//! stream to the backend as mutate frames, the other ingests the backend's
//! `data` stream into the store and onward to per-key subscribers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_stream::stream;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_stream::{Stream, StreamExt};

use tactical_core::{ChainKey, Record, StoreError, Value, Version};
use tactical_store::VersionChainStore;

use crate::backend::BackendChannel;

/// A handle to one observed record, offered to the application so it can
/// layer a new local mutation on top of it.
///
/// `commit` is the only write path: it calls [`VersionChainStore::commit`]
/// with an empty context, exactly as §4.3 specifies. The resulting
/// `PendingMutation` event (and its forwarding to the backend) is handled by
/// the Data Manager's background task, not by the `Updater` itself.
#[derive(Debug, Clone)]
pub struct Updater {
    /// The value this updater was built from.
    pub value: Value,
    /// The version this updater's `value` was observed at.
    pub version: Version,
    key: ChainKey,
    store: Arc<VersionChainStore>,
}

impl Updater {
    /// Submit `value` as a new local mutation layered on [`Updater::version`].
    ///
    /// Fails with [`StoreError::OutdatedTargetVersion`] if the chain has
    /// moved on since this updater was observed — the application should
    /// re-subscribe and retry against the newly observed record.
    pub async fn commit(&self) -> Result<(), StoreError> {
        self.store
            .commit(&self.key, &self.version, self.value.clone(), Value::empty_object())
            .await
    }
}

/// Per-key broadcast state: the watch channel backing one chain's stream,
/// plus an explicit subscriber count used to tear the entry down once it
/// hits zero (a watch `Sender`'s own receiver-count is not enough on its own
/// since the `DataManager` itself never holds a receiver).
struct KeyStream {
    tx: watch::Sender<Option<Record>>,
    subscribers: AtomicUsize,
}

/// Drops a subscription's slot when the application stops polling its
/// stream. Removal from the shared map is deferred to here rather than done
/// eagerly by the caller, so it happens exactly once no matter how the
/// subscriber's stream is dropped (consumed to completion, cancelled, or
/// panicked over).
struct Subscription {
    streams: Arc<DashMap<String, Arc<KeyStream>>>,
    key_serial: String,
    stream: Arc<KeyStream>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.stream.subscribers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Re-check under the shard lock: a new subscriber may have
            // raced in between our fetch_sub and this removal.
            self.streams.remove_if(&self.key_serial, |_, entry| {
                Arc::ptr_eq(entry, &self.stream) && entry.subscribers.load(Ordering::Acquire) == 0
            });
        }
    }
}

/// The per-key reactive fan-out sitting on the store and the backend.
///
/// Construct with [`DataManager::new`], which spawns the two background
/// tasks described in the module doc. The returned `Arc` must be kept alive
/// for those tasks to keep running.
pub struct DataManager {
    store: Arc<VersionChainStore>,
    backend: Arc<dyn BackendChannel>,
    streams: Arc<DashMap<String, Arc<KeyStream>>>,
    /// Tracks, per chain, the version of the one pending mutation currently
    /// awaiting a backend acknowledgment — the correlation the ingress task
    /// needs to turn a data frame's `mutation_context` into a `resolves`
    /// argument for `Store.push` (see the module doc and §6).
    pending_versions: Arc<DashMap<String, Version>>,
}

impl DataManager {
    /// Build a Data Manager over `store` and `backend`, and spawn its
    /// background forwarding/ingress tasks.
    pub fn new(store: Arc<VersionChainStore>, backend: Arc<dyn BackendChannel>) -> Arc<DataManager> {
        let manager = Arc::new(DataManager {
            store,
            backend,
            streams: Arc::new(DashMap::new()),
            pending_versions: Arc::new(DashMap::new()),
        });
        manager.spawn_pending_forwarder();
        manager.spawn_data_ingress();
        manager
    }

    /// Forward every locally committed mutation to the backend as a mutate
    /// frame, and reflect it on the chain's per-key stream if one is live.
    fn spawn_pending_forwarder(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut pending = manager.store.pending();
        tokio::spawn(async move {
            while let Some(event) = pending.next().await {
                let Ok(event) = event else {
                    // A lagged receiver skipped events; the store's state is
                    // unaffected, only this stale view of it. Keep forwarding
                    // whatever arrives next.
                    continue;
                };
                manager
                    .pending_versions
                    .insert(event.key.serial().to_string(), event.mutation.version.clone());
                manager.publish(&event.key, event.mutation.clone());
                manager
                    .backend
                    .mutate(
                        &event.key,
                        &event.mutation.version.base,
                        event.mutation.value.clone(),
                        event.mutation.context.clone(),
                    )
                    .await;
            }
        });
    }

    /// Ingest backend data frames into the store, resolving the chain's
    /// tracked pending mutation when the frame acknowledges it.
    fn spawn_data_ingress(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut data = manager.backend.data();
        tokio::spawn(async move {
            while let Some(frame) = data.next().await {
                let Ok(frame) = frame else { continue };
                let resolves = if frame.mutation_context.is_some() {
                    manager
                        .pending_versions
                        .get(frame.key.serial())
                        .map(|entry| entry.clone())
                } else {
                    None
                };
                let pushed = manager
                    .store
                    .push(&frame.key, frame.version.clone(), frame.data, resolves.as_ref())
                    .await;
                // A push always replaces `current`, so whatever pending
                // mutation we were tracking for this chain is no longer it:
                // either it was just resolved, or it was just superseded
                // into `outdated` and awaits the application via that event.
                manager.pending_versions.remove(frame.key.serial());
                match pushed {
                    Ok(()) => {
                        if let Ok(Some(record)) = manager.store.fetch(&frame.key, None).await {
                            manager.publish(&frame.key, record);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(key = frame.key.serial(), error = %err, "dropping backend push");
                    }
                }
            }
        });
    }

    /// Push `record` onto `key`'s stream, a no-op if no subscriber is live.
    fn publish(&self, key: &ChainKey, record: Record) {
        if let Some(entry) = self.streams.get(key.serial()) {
            let _ = entry.tx.send(Some(record));
        }
    }

    /// Subscribe to failure frames the backend rejected a mutation with.
    ///
    /// Hot multicast with no replay, matching the store's `outdated`/`pending`
    /// streams rather than the per-key value streams.
    pub fn failures(&self) -> tokio_stream::wrappers::BroadcastStream<crate::backend::FailureFrame> {
        self.backend.failed()
    }

    /// Find-or-create `key`'s stream and record a new subscriber on it,
    /// both under the same DashMap shard lock.
    ///
    /// `entry()` holds that shard's lock until the returned guard drops, and
    /// [`Subscription::drop`]'s teardown goes through `remove_if`, which
    /// takes the same shard lock to check-and-remove. Doing the subscriber
    /// count's fetch-add here, before that guard drops, rules out a
    /// last-subscriber-leaves-while-a-new-one-arrives interleaving: whichever
    /// of create-or-increment vs. decrement-and-maybe-remove gets the shard
    /// lock first is fully visible to the other.
    fn ensure_stream(&self, key: &ChainKey) -> (Arc<KeyStream>, bool) {
        let mut created = false;
        let mut entry = self
            .streams
            .entry(key.serial().to_string())
            .or_insert_with(|| {
                created = true;
                let (tx, _) = watch::channel(None);
                Arc::new(KeyStream {
                    tx,
                    subscribers: AtomicUsize::new(0),
                })
            });
        entry.subscribers.fetch_add(1, Ordering::AcqRel);
        (entry.clone(), created)
    }

    fn subscribe(&self, key: &ChainKey) -> (watch::Receiver<Option<Record>>, Subscription, bool) {
        let (stream, created) = self.ensure_stream(key);
        let rx = stream.tx.subscribe();
        let subscription = Subscription {
            streams: Arc::clone(&self.streams),
            key_serial: key.serial().to_string(),
            stream,
        };
        (rx, subscription, created)
    }

    /// Request `key`'s value, as a lazily-started stream of `Value`.
    ///
    /// On first subscription this issues a backend `request(key)` and a
    /// `Store.fetch(key)`, pushing the fetched record onto the stream if one
    /// exists. Subsequent backend data frames for `key` flow onto the
    /// stream as they arrive (§4.3). Late subscribers receive the most
    /// recently delivered record immediately, then all future ones.
    pub async fn request(self: &Arc<Self>, key: ChainKey) -> impl Stream<Item = Value> {
        let (mut rx, subscription, created) = self.subscribe(&key);
        if created {
            self.backend.request(&key).await;
            if let Ok(Some(record)) = self.store.fetch(&key, None).await {
                self.publish(&key, record);
            }
        }
        stream! {
            let _subscription = subscription;
            if let Some(record) = rx.borrow_and_update().clone() {
                yield record.value;
            }
            while rx.changed().await.is_ok() {
                if let Some(record) = rx.borrow_and_update().clone() {
                    yield record.value;
                }
            }
        }
    }

    /// Request updater handles for `key`, one per observed record.
    ///
    /// Shares the same per-key stream and lazy-start behavior as
    /// [`DataManager::request`]; each yielded [`Updater`] carries the
    /// observed value and version so the application can [`Updater::commit`]
    /// a new mutation on top of it.
    pub async fn begin_update(self: &Arc<Self>, key: ChainKey) -> impl Stream<Item = Updater> {
        let (mut rx, subscription, created) = self.subscribe(&key);
        if created {
            self.backend.request(&key).await;
            if let Ok(Some(record)) = self.store.fetch(&key, None).await {
                self.publish(&key, record);
            }
        }
        let store = Arc::clone(&self.store);
        let updater_key = key.clone();
        stream! {
            let _subscription = subscription;
            let store = store;
            let key = updater_key;
            if let Some(record) = rx.borrow_and_update().clone() {
                yield Updater { value: record.value, version: record.version, key: key.clone(), store: Arc::clone(&store) };
            }
            while rx.changed().await.is_ok() {
                if let Some(record) = rx.borrow_and_update().clone() {
                    yield Updater { value: record.value, version: record.version, key: key.clone(), store: Arc::clone(&store) };
                }
            }
        }
    }

    /// Passthrough to [`VersionChainStore::fetch`], for callers that want a
    /// single value rather than a stream.
    pub async fn fetch(&self, key: &ChainKey) -> Result<Option<Record>, StoreError> {
        self.store.fetch(key, None).await
    }

    /// Passthrough to [`VersionChainStore::abandon`]. Clears this chain's
    /// tracked pending version if `target` was it, since an abandoned
    /// mutation can no longer be the thing a later data frame resolves.
    pub async fn abandon(&self, key: &ChainKey, target: &Version) -> Result<(), StoreError> {
        self.store.abandon(key, target).await?;
        self.pending_versions
            .remove_if(key.serial(), |_, v| v == target);
        if let Ok(Some(record)) = self.store.fetch(key, None).await {
            self.publish(key, record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DataFrame, InMemoryBackend, OutboundCall};
    use std::time::Duration;
    use tactical_core::Value;
    use tactical_store::InMemoryKv;

    fn key(s: &str) -> ChainKey {
        ChainKey::new(Value::from(s))
    }

    fn manager() -> (Arc<DataManager>, Arc<InMemoryBackend>) {
        let store = Arc::new(VersionChainStore::new(Arc::new(InMemoryKv::default())));
        let backend = Arc::new(InMemoryBackend::new());
        (DataManager::new(store, Arc::clone(&backend) as Arc<dyn BackendChannel>), backend)
    }

    #[tokio::test]
    async fn request_issues_backend_request_once() {
        let (manager, backend) = manager();
        let k = key("k");
        let _a = manager.request(k.clone()).await;
        let _b = manager.request(k.clone()).await;
        let requests = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, OutboundCall::Request { .. }))
            .count();
        assert_eq!(requests, 1);
    }

    #[tokio::test]
    async fn request_sees_existing_fetch_before_any_push() {
        let (manager, _backend) = manager();
        let k = key("k");
        manager
            .fetch(&k)
            .await
            .unwrap();
        // No record yet; push one directly through the store the manager holds.
        manager
            .store
            .push(&k, "b", Value::from("x"), None)
            .await
            .unwrap();
        let mut stream = Box::pin(manager.request(k.clone()).await);
        let first = tokio::time::timeout(Duration::from_millis(200), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, Value::from("x"));
    }

    #[tokio::test]
    async fn late_subscriber_replays_last_value() {
        let (manager, _backend) = manager();
        let k = key("k");
        manager.store.push(&k, "b", Value::from("x"), None).await.unwrap();

        let mut first = Box::pin(manager.request(k.clone()).await);
        assert_eq!(first.next().await, Some(Value::from("x")));

        let mut second = Box::pin(manager.request(k.clone()).await);
        assert_eq!(second.next().await, Some(Value::from("x")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn new_subscriber_arriving_as_the_last_one_leaves_still_gets_updates() {
        // Regression test for a lost-subscriber race: an outgoing
        // subscription's teardown and an incoming one's registration used to
        // touch the subscriber count and the streams map in separate steps,
        // so the teardown could remove the entry after the new subscriber
        // had already cloned its (about to become unreachable) `Arc`. Run
        // many iterations across real worker threads so the two code paths
        // actually get a chance to interleave.
        let (manager, _backend) = manager();
        let k = key("k");
        manager.store.push(&k, "b", Value::from("x"), None).await.unwrap();

        for i in 0..200 {
            let outgoing = manager.request(k.clone()).await;

            let manager_for_incoming = Arc::clone(&manager);
            let incoming_key = k.clone();
            let subscribe_task =
                tokio::spawn(async move { manager_for_incoming.request(incoming_key).await });
            drop(outgoing);
            let incoming = subscribe_task.await.expect("subscribe task panicked");
            let mut incoming = Box::pin(incoming);

            let base = if i % 2 == 0 { "b2" } else { "b" };
            manager.store.push(&k, base, Value::from("y"), None).await.unwrap();
            let seen = tokio::time::timeout(Duration::from_millis(200), incoming.next())
                .await
                .expect("new subscriber must still observe pushes after this race");
            assert!(seen.is_some());
        }
    }

    #[tokio::test]
    async fn committed_mutation_is_forwarded_to_backend() {
        let (manager, backend) = manager();
        let k = key("k");
        manager.store.push(&k, "b", Value::from("x"), None).await.unwrap();

        let mut updates = Box::pin(manager.begin_update(k.clone()).await);
        let updater = updates.next().await.unwrap();
        let mutated = Updater { value: Value::from("y"), ..updater };
        mutated.commit().await.unwrap();

        // Give the pending-forwarder task a turn.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mutate_calls = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, OutboundCall::Mutate { .. }))
            .count();
        assert_eq!(mutate_calls, 1);
    }

    #[tokio::test]
    async fn resolved_data_frame_uses_tracked_pending_version() {
        let (manager, backend) = manager();
        let k = key("k");
        manager.store.push(&k, "b", Value::from("x"), None).await.unwrap();

        let mut updates = Box::pin(manager.begin_update(k.clone()).await);
        let updater = updates.next().await.unwrap();
        let mutated = Updater { value: Value::from("y"), ..updater };
        mutated.commit().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mutation_context = Value::from("ctx-marker");
        backend.push_data(DataFrame {
            key: k.clone(),
            version: "b2".to_string(),
            data: Value::from("y"),
            mutation_context: Some(mutation_context),
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let record = manager.fetch(&k).await.unwrap().unwrap();
        assert_eq!(record.version, Version::initial("b2"));
        assert_eq!(record.value, Value::from("y"));
    }
}
