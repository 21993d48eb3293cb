//! The version chain store: the versioned record lifecycle, conflict
//! detection, and event emission described in the component design.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use tactical_core::{ChainKey, ChainState, Entry, Record, StoreError, Value, Version};

use crate::config::StoreConfig;
use crate::event::{OutdatedMutation, PendingMutation};
use crate::kv::{KvEngine, KvTransaction};

const CHAINS: &str = "chains";
const RECORDS: &str = "records";

/// The versioned local object store.
///
/// Owns chain state and records inside a KV engine exclusively: the Data
/// Manager and application hold only weak references (lookup by
/// [`ChainKey`]). Every operation runs inside a single KV transaction and
/// emits its event, if any, only after that transaction commits.
pub struct VersionChainStore {
    kv: Arc<dyn KvEngine>,
    database_name: String,
    outdated_tx: broadcast::Sender<OutdatedMutation>,
    pending_tx: broadcast::Sender<PendingMutation>,
}

impl VersionChainStore {
    /// Build a store over the given KV engine with default configuration.
    /// The engine must have been constructed with (at least) the
    /// `"chains"` and `"records"` stores.
    pub fn new(kv: Arc<dyn KvEngine>) -> VersionChainStore {
        VersionChainStore::with_config(kv, StoreConfig::default())
    }

    /// Build a store over the given KV engine, tuned by `config`.
    pub fn with_config(kv: Arc<dyn KvEngine>, config: StoreConfig) -> VersionChainStore {
        let (outdated_tx, _) = broadcast::channel(config.event_channel_capacity);
        let (pending_tx, _) = broadcast::channel(config.event_channel_capacity);
        VersionChainStore {
            kv,
            database_name: config.database_name,
            outdated_tx,
            pending_tx,
        }
    }

    /// Subscribe to supersession events. Late subscribers do not see events
    /// emitted before they subscribed.
    pub fn outdated(&self) -> BroadcastStream<OutdatedMutation> {
        BroadcastStream::new(self.outdated_tx.subscribe())
    }

    /// Subscribe to newly committed local mutations. Late subscribers do not
    /// see events emitted before they subscribed.
    pub fn pending(&self) -> BroadcastStream<PendingMutation> {
        BroadcastStream::new(self.pending_tx.subscribe())
    }

    /// Return the record at `version`, or the chain's current record if
    /// `version` is omitted. Does not touch chain state when `version` is
    /// given.
    pub async fn fetch(
        &self,
        key: &ChainKey,
        version: Option<&Version>,
    ) -> Result<Option<Record>, StoreError> {
        let mut txn = self.kv.transaction(&[CHAINS, RECORDS]).await?;
        let record = match version {
            Some(version) => read_record(txn.as_mut(), key, version).await?,
            None => match read_chain_state(txn.as_mut(), key).await? {
                Some(state) => read_record(txn.as_mut(), key, &state.current).await?,
                None => None,
            },
        };
        txn.commit().await?;
        Ok(record)
    }

    /// Ingest a server-authoritative version.
    pub async fn push(
        &self,
        key: &ChainKey,
        base: impl Into<String>,
        value: Value,
        resolves: Option<&Version>,
    ) -> Result<(), StoreError> {
        let base = base.into();
        tracing::debug!(db = %self.database_name, key = key.serial(), base, "push");
        let push_version = Version::initial(base);

        let mut txn = self.kv.transaction(&[CHAINS, RECORDS]).await?;
        let prev_state = read_chain_state(txn.as_mut(), key).await?;
        let prev = prev_state.as_ref().map(|state| state.current.clone());

        let new_state = match &prev_state {
            None => ChainState::initial(push_version.clone()),
            Some(state) => {
                let is_outdated = prev.as_ref().is_some_and(|v| !v.is_initial());
                let is_resolved = resolves.is_some_and(|r| Some(r) == prev.as_ref());
                let mut outdated = state.outdated.clone();
                if is_outdated && !is_resolved {
                    outdated.push(prev.clone().expect("is_outdated implies prev exists"));
                }
                ChainState {
                    current: push_version.clone(),
                    outdated,
                }
            }
        };
        write_chain_state(txn.as_mut(), key, &new_state).await?;
        write_record(txn.as_mut(), key, &push_version, Entry::pushed(value.clone())).await?;

        let mut emit = None;
        if let Some(prev) = &prev {
            if *prev != push_version {
                let is_resolved = resolves.is_some_and(|r| r == prev);
                if prev.is_initial() || is_resolved {
                    remove_record(txn.as_mut(), key, prev).await?;
                    if !prev.is_initial() {
                        remove_record(txn.as_mut(), key, &prev.as_initial()).await?;
                    }
                } else {
                    let mutation = read_record(txn.as_mut(), key, prev)
                        .await?
                        .expect("invariant 2: a non-initial current has a retained record");
                    let initial = read_record(txn.as_mut(), key, &prev.as_initial())
                        .await?
                        .expect("invariant 2: a non-initial current retains its initial");
                    emit = Some(OutdatedMutation {
                        key: key.clone(),
                        current: Record::new(push_version.clone(), Entry::pushed(value)),
                        mutation,
                        initial,
                    });
                }
            }
        }
        txn.commit().await?;

        if let Some(event) = emit {
            tracing::debug!(db = %self.database_name, key = key.serial(), "outdated mutation");
            let _ = self.outdated_tx.send(event);
        }
        Ok(())
    }

    /// Layer a local mutation on the current version.
    pub async fn commit(
        &self,
        key: &ChainKey,
        target: &Version,
        mutation: Value,
        context: Value,
    ) -> Result<(), StoreError> {
        tracing::debug!(db = %self.database_name, key = key.serial(), ?target, "commit");
        let mut txn = self.kv.transaction(&[CHAINS, RECORDS]).await?;
        let state = read_chain_state(txn.as_mut(), key)
            .await?
            .ok_or_else(|| StoreError::KeyNotFound { key: key.clone() })?;
        let prev = state.current.clone();
        if *target != prev {
            return Err(StoreError::OutdatedTargetVersion {
                key: key.clone(),
                current: prev,
                target: target.clone(),
                mutation,
                context,
            });
        }

        let mut_version = Version::mutation(prev.base.clone());
        write_chain_state(
            txn.as_mut(),
            key,
            &ChainState {
                current: mut_version.clone(),
                outdated: state.outdated,
            },
        )
        .await?;
        let record = Record::new(mut_version.clone(), Entry {
            value: mutation,
            context,
        });
        let (version, entry) = record.clone().into_parts();
        write_record(txn.as_mut(), key, &version, entry).await?;

        if !prev.is_initial() {
            remove_record(txn.as_mut(), key, &prev).await?;
        }
        txn.commit().await?;

        let _ = self.pending_tx.send(PendingMutation {
            key: key.clone(),
            mutation: record,
        });
        Ok(())
    }

    /// Discard a pending or outdated mutation.
    pub async fn abandon(&self, key: &ChainKey, target: &Version) -> Result<(), StoreError> {
        tracing::debug!(db = %self.database_name, key = key.serial(), ?target, "abandon");
        let mut txn = self.kv.transaction(&[CHAINS, RECORDS]).await?;
        let mut state = read_chain_state(txn.as_mut(), key)
            .await?
            .ok_or_else(|| StoreError::KeyNotFound { key: key.clone() })?;

        if target.is_initial() {
            return Err(StoreError::InvalidInitialTargetVersion {
                key: key.clone(),
                target: target.clone(),
            });
        }

        if *target == state.current {
            state.current = target.as_initial();
            remove_record(txn.as_mut(), key, target).await?;
        } else if let Some(pos) = state.outdated.iter().position(|v| v == target) {
            state.outdated.remove(pos);
            remove_record(txn.as_mut(), key, target).await?;
            remove_record(txn.as_mut(), key, &target.as_initial()).await?;
        }
        write_chain_state(txn.as_mut(), key, &state).await?;
        txn.commit().await?;
        Ok(())
    }
}

async fn read_chain_state(
    txn: &mut dyn KvTransaction,
    key: &ChainKey,
) -> Result<Option<ChainState>, StoreError> {
    match txn.get(CHAINS, key.serial()).await? {
        None => Ok(None),
        Some(blob) => Ok(Some(serde_json::from_value(blob).map_err(|err| {
            StoreError::Kv(tactical_core::KvError::TransactionAborted {
                reason: format!("corrupt chain state for {}: {err}", key.serial()),
            })
        })?)),
    }
}

async fn write_chain_state(
    txn: &mut dyn KvTransaction,
    key: &ChainKey,
    state: &ChainState,
) -> Result<(), StoreError> {
    let blob = serde_json::to_value(state).expect("ChainState always serializes");
    txn.put(CHAINS, key.serial(), blob).await?;
    Ok(())
}

async fn read_record(
    txn: &mut dyn KvTransaction,
    key: &ChainKey,
    version: &Version,
) -> Result<Option<Record>, StoreError> {
    let record_key = tactical_core::RecordKey::new(key, version);
    match txn.get(RECORDS, record_key.serial()).await? {
        None => Ok(None),
        Some(blob) => {
            let entry: Entry = serde_json::from_value(blob).map_err(|err| {
                StoreError::Kv(tactical_core::KvError::TransactionAborted {
                    reason: format!("corrupt record for {}: {err}", record_key.serial()),
                })
            })?;
            Ok(Some(Record::new(version.clone(), entry)))
        }
    }
}

async fn write_record(
    txn: &mut dyn KvTransaction,
    key: &ChainKey,
    version: &Version,
    entry: Entry,
) -> Result<(), StoreError> {
    let record_key = tactical_core::RecordKey::new(key, version);
    let blob = serde_json::to_value(&entry).expect("Entry always serializes");
    txn.put(RECORDS, record_key.serial(), blob).await?;
    Ok(())
}

async fn remove_record(
    txn: &mut dyn KvTransaction,
    key: &ChainKey,
    version: &Version,
) -> Result<(), StoreError> {
    let record_key = tactical_core::RecordKey::new(key, version);
    txn.remove(RECORDS, record_key.serial()).await?;
    Ok(())
}
