//! Outbound delivery of session results to listening hosts.
//!
//! Each target exposes up to three channels (message post, shared latest-results
//! slot, key-value store). Every channel attempt is independent and produces its
//! own [`DeliveryOutcome`]; a failure is logged and never stops the next attempt.

mod store;

pub use store::{InMemoryStore, JsonFileStore, KeyValueStore};

use super::aggregate::TotalGrade;
use super::domain::{Factor, Grade, SessionContext};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub const RESULTS_KEY: &str = "results";
pub const TIMESTAMP_KEY: &str = "timestamp";
const LOCAL_TARGET: &str = "local";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorReport {
    pub score: i32,
    pub grade: Grade,
    pub record: Option<f64>,
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsPayload {
    pub session_context: SessionContext,
    pub per_factor: BTreeMap<Factor, FactorReport>,
    pub total_score: i32,
    pub total_grade: TotalGrade,
}

/// Envelope posted to listeners: `{"type": "results", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum RelayMessage {
    Results(ResultsPayload),
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("message port unavailable: {0}")]
    Port(String),
    #[error("shared results slot poisoned")]
    SlotPoisoned,
    #[error("store write failed: {0}")]
    Store(String),
    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait MessagePort: Send + Sync {
    fn post(&self, message: &RelayMessage) -> Result<(), RelayError>;
}

/// In-process message port; zero subscribers is not a failure.
#[derive(Debug, Clone)]
pub struct BroadcastPort {
    sender: broadcast::Sender<RelayMessage>,
}

impl BroadcastPort {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.sender.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl MessagePort for BroadcastPort {
    fn post(&self, message: &RelayMessage) -> Result<(), RelayError> {
        match self.sender.send(message.clone()) {
            Ok(listeners) => debug!(listeners, "results message posted"),
            Err(_) => debug!("results message posted with no listeners"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedResultsState {
    pub latest: Option<ResultsPayload>,
    pub received: bool,
    pub last_update_time: Option<i64>,
}

/// Latest-results slot a host can read at any time.
#[derive(Debug, Clone, Default)]
pub struct SharedResults {
    inner: Arc<RwLock<SharedResultsState>>,
}

impl SharedResults {
    pub fn write(&self, payload: &ResultsPayload, timestamp_ms: i64) -> Result<(), RelayError> {
        let mut guard = self.inner.write().map_err(|_| RelayError::SlotPoisoned)?;
        guard.latest = Some(payload.clone());
        guard.received = true;
        guard.last_update_time = Some(timestamp_ms);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<SharedResultsState, RelayError> {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| RelayError::SlotPoisoned)
    }
}

/// A listening host reachable through any subset of channels.
#[derive(Clone)]
pub struct RelayTarget {
    label: String,
    port: Option<Arc<dyn MessagePort>>,
    shared: Option<SharedResults>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl RelayTarget {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            port: None,
            shared: None,
            store: None,
        }
    }

    pub fn with_port(mut self, port: Arc<dyn MessagePort>) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_shared(mut self, shared: SharedResults) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for RelayTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayTarget")
            .field("label", &self.label)
            .field("port", &self.port.is_some())
            .field("shared", &self.shared.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayChannel {
    MessagePost,
    SharedSlot,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub target: String,
    pub channel: RelayChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub timestamp: i64,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl RelayReport {
    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.succeeded())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Fan-out of results to the local store and every target.
#[derive(Debug, Clone, Default)]
pub struct Relay {
    local_store: Option<LocalStore>,
    targets: Vec<RelayTarget>,
}

#[derive(Clone)]
struct LocalStore(Arc<dyn KeyValueStore>);

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalStore")
    }
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.local_store = Some(LocalStore(store));
        self
    }

    pub fn with_target(mut self, target: RelayTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn targets(&self) -> &[RelayTarget] {
        &self.targets
    }

    pub fn deliver(&self, payload: &ResultsPayload) -> RelayReport {
        self.deliver_at(payload, Utc::now().timestamp_millis())
    }

    pub fn deliver_at(&self, payload: &ResultsPayload, timestamp: i64) -> RelayReport {
        let mut outcomes = Vec::new();
        let encoded = serde_json::to_string(payload).map_err(|err| err.to_string());

        if let Some(LocalStore(store)) = &self.local_store {
            outcomes.push(attempt(LOCAL_TARGET, RelayChannel::Store, || {
                write_store(store.as_ref(), &encoded, timestamp)
            }));
        }

        if self.targets.is_empty() {
            warn!("no relay targets configured; results kept locally");
        }

        let message = RelayMessage::Results(payload.clone());
        for target in &self.targets {
            info!(
                relay_target = %target.label,
                total_score = payload.total_score,
                total_grade = %payload.total_grade,
                factors = payload.per_factor.len(),
                "relaying results"
            );

            if let Some(port) = &target.port {
                outcomes.push(attempt(&target.label, RelayChannel::MessagePost, || {
                    port.post(&message)
                }));
            }
            if let Some(shared) = &target.shared {
                outcomes.push(attempt(&target.label, RelayChannel::SharedSlot, || {
                    shared.write(payload, timestamp)
                }));
            }
            if let Some(store) = &target.store {
                outcomes.push(attempt(&target.label, RelayChannel::Store, || {
                    write_store(store.as_ref(), &encoded, timestamp)
                }));
            }
        }

        RelayReport {
            timestamp,
            outcomes,
        }
    }
}

fn write_store(
    store: &dyn KeyValueStore,
    encoded: &Result<String, String>,
    timestamp: i64,
) -> Result<(), RelayError> {
    let payload = encoded.as_ref().map_err(|err| RelayError::Store(err.clone()))?;
    store.set_item(RESULTS_KEY, payload)?;
    store.set_item(TIMESTAMP_KEY, &timestamp.to_string())
}

fn attempt<F>(target: &str, channel: RelayChannel, deliver: F) -> DeliveryOutcome
where
    F: FnOnce() -> Result<(), RelayError>,
{
    let error = match deliver() {
        Ok(()) => {
            debug!(relay_target = target, ?channel, "relay channel delivered");
            None
        }
        Err(err) => {
            error!(relay_target = target, ?channel, error = %err, "relay channel failed");
            Some(err.to_string())
        }
    };

    DeliveryOutcome {
        target: target.to_string(),
        channel,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPort;

    impl MessagePort for ClosedPort {
        fn post(&self, _message: &RelayMessage) -> Result<(), RelayError> {
            Err(RelayError::Port("window closed".to_string()))
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn set_item(&self, _key: &str, _value: &str) -> Result<(), RelayError> {
            Err(RelayError::Store("quota exceeded".to_string()))
        }

        fn get_item(&self, _key: &str) -> Result<Option<String>, RelayError> {
            Ok(None)
        }
    }

    fn payload() -> ResultsPayload {
        let mut per_factor = BTreeMap::new();
        per_factor.insert(
            Factor::Power,
            FactorReport {
                score: 3,
                grade: Grade::from_label("3등급"),
                record: Some(8.5),
                event: "50m달리기".to_string(),
            },
        );
        per_factor.insert(
            Factor::BodyComposition,
            FactorReport {
                score: 0,
                grade: Grade::Unset,
                record: None,
                event: "체질량지수".to_string(),
            },
        );
        ResultsPayload {
            session_context: SessionContext::new("중", "1", "남"),
            per_factor,
            total_score: 3,
            total_grade: TotalGrade::Fifth,
        }
    }

    #[test]
    fn message_envelope_uses_results_type() {
        let encoded =
            serde_json::to_value(RelayMessage::Results(payload())).expect("message encodes");

        assert_eq!(encoded["type"], "results");
        assert_eq!(encoded["payload"]["totalScore"], 3);
        assert_eq!(encoded["payload"]["totalGrade"], "5등급");
        assert_eq!(encoded["payload"]["sessionContext"]["schoolStage"], "중");
        assert_eq!(encoded["payload"]["perFactor"]["순발력"]["grade"], "3등급");
        assert_eq!(encoded["payload"]["perFactor"]["비만"]["grade"], "-");
        assert!(encoded["payload"]["perFactor"]["비만"]["record"].is_null());
    }

    #[test]
    fn failing_channels_do_not_block_the_others() {
        let parent_store = InMemoryStore::default();
        let top_shared = SharedResults::default();
        let relay = Relay::new()
            .with_local_store(Arc::new(FailingStore))
            .with_target(
                RelayTarget::new("parent")
                    .with_port(Arc::new(ClosedPort))
                    .with_store(Arc::new(parent_store.clone())),
            )
            .with_target(
                RelayTarget::new("top")
                    .with_shared(top_shared.clone())
                    .with_store(Arc::new(FailingStore)),
            );

        let report = relay.deliver_at(&payload(), 1_700_000_000_000);

        assert_eq!(report.outcomes.len(), 5);
        let failed: Vec<(&str, RelayChannel)> = report
            .failures()
            .map(|outcome| (outcome.target.as_str(), outcome.channel))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("local", RelayChannel::Store),
                ("parent", RelayChannel::MessagePost),
                ("top", RelayChannel::Store),
            ]
        );

        let entries = parent_store.entries();
        assert_eq!(entries.get(TIMESTAMP_KEY).map(String::as_str), Some("1700000000000"));
        let stored: ResultsPayload =
            serde_json::from_str(entries.get(RESULTS_KEY).expect("results stored"))
                .expect("stored payload decodes");
        assert_eq!(stored, payload());

        let shared = top_shared.snapshot().expect("slot readable");
        assert!(shared.received);
        assert_eq!(shared.last_update_time, Some(1_700_000_000_000));
        assert_eq!(shared.latest, Some(payload()));
    }

    #[test]
    fn broadcast_port_reaches_subscribers() {
        let port = BroadcastPort::new(4);
        let mut listener = port.subscribe();
        let relay = Relay::new().with_target(RelayTarget::new("parent").with_port(Arc::new(port)));

        let report = relay.deliver(&payload());

        assert!(report.is_clean());
        let received = listener.try_recv().expect("message delivered");
        assert_eq!(received, RelayMessage::Results(payload()));
    }

    #[test]
    fn no_targets_still_writes_local_store() {
        let local = InMemoryStore::default();
        let relay = Relay::new().with_local_store(Arc::new(local.clone()));

        let report = relay.deliver(&payload());

        assert_eq!(report.outcomes.len(), 1);
        assert!(report.is_clean());
        assert!(local.entries().contains_key(RESULTS_KEY));
    }
}
