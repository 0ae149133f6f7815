/// Controller lifecycle as a small state machine.
pub mod phase;
pub mod watches;

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock, watch};

use crate::dto::leaderboard::Snapshot;

use self::{
    phase::{ControllerEvent, ControllerPhase, InvalidTransition, PhaseMachine, PhaseSnapshot},
    watches::WatchRegistry,
};

/// Handle shared between the controller and whoever reads its snapshots.
pub type SharedState = Arc<ObserverState>;

/// Derived state held by the observer. Everything here can be discarded and rebuilt
/// from the namespace.
pub struct ObserverState {
    /// Held for the whole processing of one firing (re-arm, recompute, publish).
    registry: Mutex<WatchRegistry>,
    phase: RwLock<PhaseMachine>,
    snapshot: watch::Sender<Arc<Snapshot>>,
}

impl ObserverState {
    /// Construct a new [`ObserverState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(root: impl Into<String>) -> SharedState {
        let (snapshot, _rx) = watch::channel(Arc::new(Snapshot::default()));
        Arc::new(Self {
            registry: Mutex::new(WatchRegistry::new(root)),
            phase: RwLock::new(PhaseMachine::new()),
            snapshot,
        })
    }

    /// Lock the watch registry. The guard serializes firings against each other.
    pub async fn registry(&self) -> MutexGuard<'_, WatchRegistry> {
        self.registry.lock().await
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> ControllerPhase {
        self.phase.read().await.phase()
    }

    /// Lifecycle phase together with its transition counters.
    pub async fn phase_snapshot(&self) -> PhaseSnapshot {
        self.phase.read().await.snapshot()
    }

    /// Apply a lifecycle event.
    pub async fn transition(
        &self,
        event: ControllerEvent,
    ) -> Result<ControllerPhase, InvalidTransition> {
        let mut sm = self.phase.write().await;
        sm.apply(event)
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot publications.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    /// Replace the published snapshot, waking every subscriber.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshot.send_replace(snapshot.clone());
        snapshot
    }
}
