//! HTTP surface over the grading engine.

mod routes;
mod server;

pub(crate) use routes::{grade_single, GradeResponse};
pub use routes::router;
pub use server::run;

use crate::assessment::{
    BroadcastPort, InMemoryStore, JsonFileStore, KeyValueStore, ReferenceTable, Relay,
    RelayTarget, SharedResults,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Label of the host the service relays to.
pub const PARENT_TARGET: &str = "parent";

const PORT_CAPACITY: usize = 64;
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Clone)]
pub struct AppState {
    pub readiness: Arc<AtomicBool>,
    pub metrics: Arc<PrometheusHandle>,
    pub table: Arc<ReferenceTable>,
    pub relay: Arc<Relay>,
    pub shared: SharedResults,
    pub port: BroadcastPort,
    pub poll_timeout: Duration,
}

impl AppState {
    /// Wires a relay with an in-process store and one `parent` target that
    /// receives posts, the shared slot and, when configured, a JSON file store.
    pub fn new(
        table: Arc<ReferenceTable>,
        metrics: Arc<PrometheusHandle>,
        store_path: Option<&Path>,
    ) -> Self {
        let port = BroadcastPort::new(PORT_CAPACITY);
        let shared = SharedResults::default();

        let mut parent = RelayTarget::new(PARENT_TARGET)
            .with_port(Arc::new(port.clone()))
            .with_shared(shared.clone());
        if let Some(path) = store_path {
            let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(path));
            parent = parent.with_store(store);
        }

        let relay = Relay::new()
            .with_local_store(Arc::new(InMemoryStore::default()))
            .with_target(parent);

        Self {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics,
            table,
            relay: Arc::new(relay),
            shared,
            port,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}
