//! The backend channel contract (§6): the bidirectional frame transport
//! between client and server. This crate depends only on [`BackendChannel`];
//! the wire transport itself is out of scope (§1) and left to a real
//! implementation the application supplies.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use tactical_core::{ChainKey, Value};

/// A server push: the backend's latest value for `key` at `version`.
///
/// May arrive unprompted or as the result of a previously-submitted
/// mutation, in which case `mutation_context` equals the `context` passed to
/// the [`BackendChannel::mutate`] call that produced it.
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// The chain this frame concerns.
    pub key: ChainKey,
    /// The backend-minted base version of the pushed value.
    pub version: String,
    /// The pushed value.
    pub data: Value,
    /// Present iff this frame acknowledges a previously-submitted mutation.
    pub mutation_context: Option<Value>,
}

/// A rejected mutation, for a non-version reason (the version-conflict case
/// is instead surfaced as an ordinary [`DataFrame`] without `mutation_context`,
/// which the store resolves as an [`tactical_store::OutdatedMutation`]).
#[derive(Debug, Clone)]
pub struct FailureFrame {
    /// The chain the rejected mutation targeted.
    pub key: ChainKey,
    /// The base version the rejected mutation was built on.
    pub base_version: String,
    /// The context originally passed to `mutate`.
    pub context: Value,
    /// Human-readable rejection reason.
    pub reason: String,
    /// Opaque backend debugging detail, not interpreted by the client.
    pub debugging_info: Value,
}

/// Outbound requests/mutations to the server, and inbound data/failure frames.
///
/// Implementations must be cheap to clone-share (`Send + Sync`) since a
/// single channel instance backs every chain a [`crate::DataManager`] fans
/// out to.
#[async_trait]
pub trait BackendChannel: Send + Sync {
    /// Ask the server for the latest version of `key`.
    async fn request(&self, key: &ChainKey);

    /// Submit a local mutation built on `base` for `key`.
    async fn mutate(&self, key: &ChainKey, base: &str, value: Value, context: Value);

    /// Inbound data frames, a hot multicast with no replay.
    fn data(&self) -> BroadcastStream<DataFrame>;

    /// Inbound failure frames, a hot multicast with no replay.
    fn failed(&self) -> BroadcastStream<FailureFrame>;
}

const CHANNEL_CAPACITY: usize = 256;

/// Outbound call recorded by [`InMemoryBackend`], for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCall {
    /// A `request(key)` call.
    Request {
        /// The requested chain.
        key: ChainKey,
    },
    /// A `mutate(key, base, value, context)` call.
    Mutate {
        /// The mutated chain.
        key: ChainKey,
        /// The base version the mutation was built on.
        base: String,
        /// The submitted mutation value.
        value: Value,
        /// The submitted mutation context.
        context: Value,
    },
}

/// An in-memory [`BackendChannel`] test double.
///
/// Records every outbound call so tests can assert on what the Data Manager
/// sent, and exposes [`InMemoryBackend::push_data`]/[`InMemoryBackend::push_failed`]
/// to drive inbound frames without a real transport.
pub struct InMemoryBackend {
    calls: std::sync::Mutex<Vec<OutboundCall>>,
    data_tx: broadcast::Sender<DataFrame>,
    failed_tx: broadcast::Sender<FailureFrame>,
}

impl InMemoryBackend {
    /// Build an idle backend with no recorded calls.
    pub fn new() -> InMemoryBackend {
        let (data_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (failed_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        InMemoryBackend {
            calls: std::sync::Mutex::new(Vec::new()),
            data_tx,
            failed_tx,
        }
    }

    /// Every outbound call made so far, in call order.
    pub fn calls(&self) -> Vec<OutboundCall> {
        self.calls.lock().expect("backend call log poisoned").clone()
    }

    /// Inject an inbound data frame, as if the server had pushed it.
    pub fn push_data(&self, frame: DataFrame) {
        let _ = self.data_tx.send(frame);
    }

    /// Inject an inbound failure frame, as if the server had rejected a mutation.
    pub fn push_failed(&self, frame: FailureFrame) {
        let _ = self.failed_tx.send(frame);
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        InMemoryBackend::new()
    }
}

#[async_trait]
impl BackendChannel for InMemoryBackend {
    async fn request(&self, key: &ChainKey) {
        self.calls
            .lock()
            .expect("backend call log poisoned")
            .push(OutboundCall::Request { key: key.clone() });
    }

    async fn mutate(&self, key: &ChainKey, base: &str, value: Value, context: Value) {
        self.calls
            .lock()
            .expect("backend call log poisoned")
            .push(OutboundCall::Mutate {
                key: key.clone(),
                base: base.to_string(),
                value,
                context,
            });
    }

    fn data(&self) -> BroadcastStream<DataFrame> {
        BroadcastStream::new(self.data_tx.subscribe())
    }

    fn failed(&self) -> BroadcastStream<FailureFrame> {
        BroadcastStream::new(self.failed_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactical_core::Value;
    use tokio_stream::StreamExt;

    fn key(s: &str) -> ChainKey {
        ChainKey::new(Value::from(s))
    }

    #[tokio::test]
    async fn records_request_calls() {
        let backend = InMemoryBackend::new();
        backend.request(&key("k")).await;
        assert_eq!(backend.calls(), vec![OutboundCall::Request { key: key("k") }]);
    }

    #[tokio::test]
    async fn pushed_data_is_observable_on_the_stream() {
        let backend = InMemoryBackend::new();
        let mut data = backend.data();
        backend.push_data(DataFrame {
            key: key("k"),
            version: "b".to_string(),
            data: Value::from("x"),
            mutation_context: None,
        });
        let frame = data.next().await.unwrap().unwrap();
        assert_eq!(frame.version, "b");
    }
}
