use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::logic::operations::OperationTracker;
use crate::store::traits::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonPhase {
    Starting,
    Ready,
}

/// One-way readiness latch: Starting -> Ready, resolved once at startup
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<DaemonPhase>>,
}

impl Default for Readiness {
    fn default() -> Self {
        let (tx, _) = watch::channel(DaemonPhase::Starting);
        Self { tx: Arc::new(tx) }
    }
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        if self.tx.send_replace(DaemonPhase::Ready) == DaemonPhase::Starting {
            log::info!("Daemon is ready");
        }
    }

    pub fn phase(&self) -> DaemonPhase {
        *self.tx.borrow()
    }

    /// Suspends until the daemon finished starting up
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let ready = *rx.borrow_and_update() == DaemonPhase::Ready;
            if ready || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Shared daemon state handed to every request handler
pub struct Daemon<S: Store> {
    pub store: Arc<S>,
    pub operations: OperationTracker,
    pub readiness: Readiness,
    /// Name of this cluster member, reported as operation location
    pub server_name: String,
}

impl<S: Store + 'static> Daemon<S> {
    pub fn new(store: Arc<S>, server_name: &str, retention: Duration) -> Self {
        let operations = OperationTracker::new(store.clone(), server_name, retention);
        Self {
            store,
            operations,
            readiness: Readiness::new(),
            server_name: server_name.to_string(),
        }
    }
}

pub type AppState<S> = Arc<Daemon<S>>;
