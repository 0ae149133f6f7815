//! The observer loop: bootstrap, react to firings, rebuild after session loss.
//!
//! Exactly one task runs [`DashboardController::run`]. Firings from every watch land on a
//! single channel and are processed one batch at a time while the registry lock is held,
//! so re-arming and recomputing for one batch never interleaves with the next.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, watch,
    },
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    coord::{
        CoordError, CoordResult, CoordinationClient, SessionEvent, WatchEvent, WatchEventKind,
        WatchSink, retry_once, wait_connected,
    },
    error::ObserverError,
    services::{
        aggregator::ScoreAggregator,
        presence::PresenceOracle,
        ranking::RankingEngine,
        render::SnapshotRenderer,
    },
    state::{
        SharedState,
        phase::{ControllerEvent, ControllerPhase},
        watches::{FireOutcome, WatchRegistry},
    },
};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Everything bound to one coordination session. Dropped as a whole when the session ends.
struct ActiveSession {
    client: Arc<dyn CoordinationClient>,
    sink: WatchSink,
    firings: mpsc::UnboundedReceiver<WatchEvent>,
    session_events: broadcast::Receiver<SessionEvent>,
    events_open: bool,
    aggregator: ScoreAggregator,
    oracle: PresenceOracle,
}

/// Result of registering every queued path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    Done,
    SessionLost,
}

/// What the loop does after handling a wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Rebootstrap,
}

enum Wake {
    Shutdown,
    Firing(WatchEvent),
    Session(Result<SessionEvent, RecvError>),
    Retry,
}

/// Drives the leaderboard observer from bootstrap to termination.
pub struct DashboardController {
    state: SharedState,
    ranking: RankingEngine,
    root: String,
    renderer: Arc<dyn SnapshotRenderer>,
}

impl DashboardController {
    /// Controller publishing into `state`, ranking at most `max_size` entries per list.
    pub fn new(
        state: SharedState,
        root: impl Into<String>,
        max_size: usize,
        renderer: Arc<dyn SnapshotRenderer>,
    ) -> Self {
        Self {
            state,
            ranking: RankingEngine::new(max_size),
            root: root.into(),
            renderer,
        }
    }

    /// Run until `shutdown` turns `true` or a fatal error occurs.
    ///
    /// `connect` is called once at startup and again every time a session has to be
    /// replaced. A failed first connection, or a missing root, ends the run with an error;
    /// every later failure is retried with backoff.
    pub async fn run<F, Fut>(
        &self,
        mut connect: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ObserverError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = CoordResult<Arc<dyn CoordinationClient>>> + Send,
    {
        info!(root = %self.root, max_size = self.ranking.max_size(), "starting leaderboard observer");

        let first = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => return self.terminate(None).await,
            result = connect() => result.map_err(ObserverError::Connect)?,
        };

        let mut session = match self.establish(Some(first), &mut connect, &mut shutdown).await {
            Ok(Some(session)) => session,
            Ok(None) => return self.terminate(None).await,
            Err(err) => return self.fail(err, None).await,
        };

        let mut retry_delay = INITIAL_RETRY_DELAY;
        loop {
            let retry_due = self.state.registry().await.has_pending();
            let wake = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => Wake::Shutdown,
                event = session.session_events.recv(), if session.events_open => Wake::Session(event),
                Some(event) = session.firings.recv() => Wake::Firing(event),
                _ = sleep(retry_delay), if retry_due => Wake::Retry,
            };

            let step = match wake {
                Wake::Shutdown => return self.terminate(Some(&session.client)).await,
                Wake::Firing(event) => {
                    let mut batch = vec![event];
                    while let Ok(event) = session.firings.try_recv() {
                        batch.push(event);
                    }
                    debug!(firings = batch.len(), "processing watch firings");
                    self.process(&session, &batch).await
                }
                Wake::Session(Ok(SessionEvent::Expired)) => Ok(Step::Rebootstrap),
                Wake::Session(Ok(SessionEvent::Closed)) => {
                    warn!("session closed underneath the observer");
                    Ok(Step::Rebootstrap)
                }
                Wake::Session(Ok(SessionEvent::Reconnected)) => {
                    info!("session reconnected; refreshing snapshot");
                    let event = WatchEvent::new(&self.root, WatchEventKind::SessionReconnected);
                    self.process(&session, &[event]).await
                }
                Wake::Session(Err(RecvError::Lagged(missed))) => {
                    warn!(missed, "session notifications lagged; refreshing snapshot");
                    let event = WatchEvent::new(&self.root, WatchEventKind::SessionReconnected);
                    self.process(&session, &[event]).await
                }
                Wake::Session(Err(RecvError::Closed)) => {
                    debug!("session notification channel closed");
                    session.events_open = false;
                    Ok(Step::Continue)
                }
                Wake::Retry => {
                    let mut registry = self.state.registry().await;
                    let step = self.refresh(&mut registry, &session).await;
                    retry_delay = if registry.has_pending() {
                        (retry_delay * 2).min(MAX_RETRY_DELAY)
                    } else {
                        INITIAL_RETRY_DELAY
                    };
                    step
                }
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Rebootstrap) => {
                    info!("session lost; rebuilding every watch on a fresh session");
                    session.client.close().await;
                    self.state.registry().await.reset();
                    if self.state.phase().await != ControllerPhase::Rebootstrapping {
                        self.state.transition(ControllerEvent::SessionExpired).await?;
                    }
                    retry_delay = INITIAL_RETRY_DELAY;
                    session = match self.establish(None, &mut connect, &mut shutdown).await {
                        Ok(Some(next)) => next,
                        Ok(None) => return self.terminate(None).await,
                        Err(err) => return self.fail(err, None).await,
                    };
                }
                Err(err) => return self.fail(err, Some(&session.client)).await,
            }
        }
    }

    /// Bootstrap on `client` (or on a fresh connection) until it succeeds.
    ///
    /// Returns `None` when shutdown was requested first.
    async fn establish<F, Fut>(
        &self,
        mut client: Option<Arc<dyn CoordinationClient>>,
        connect: &mut F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<ActiveSession>, ObserverError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = CoordResult<Arc<dyn CoordinationClient>>> + Send,
    {
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            let candidate = match client.take() {
                Some(candidate) => candidate,
                None => {
                    let connected = tokio::select! {
                        biased;
                        _ = wait_for_shutdown(shutdown) => return Ok(None),
                        result = connect() => result,
                    };
                    match connected {
                        Ok(candidate) => candidate,
                        Err(err) => {
                            warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "connection attempt failed");
                            if !pause(&mut delay, shutdown).await {
                                return Ok(None);
                            }
                            continue;
                        }
                    }
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    candidate.close().await;
                    return Ok(None);
                }
                outcome = self.bootstrap(candidate.clone()) => outcome,
            };

            match outcome {
                Ok(session) => return Ok(Some(session)),
                Err(err @ ObserverError::RootMissing { .. }) => {
                    candidate.close().await;
                    return Err(err);
                }
                Err(err) => {
                    warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "bootstrap failed; retrying on a fresh session");
                    candidate.close().await;
                    if err.is_session_lost()
                        && self.state.phase().await != ControllerPhase::Rebootstrapping
                    {
                        self.state.transition(ControllerEvent::SessionExpired).await?;
                    }
                    if !pause(&mut delay, shutdown).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Arm the root and every player, publish a first snapshot and enter the steady phase.
    async fn bootstrap(
        &self,
        client: Arc<dyn CoordinationClient>,
    ) -> Result<ActiveSession, ObserverError> {
        wait_connected(client.connected()).await?;
        let session_events = client.session_events();

        if !retry_once("exists", &self.root, || client.exists(&self.root)).await? {
            return Err(ObserverError::RootMissing {
                root: self.root.clone(),
            });
        }

        let (sink, firings) = mpsc::unbounded_channel();
        let session = ActiveSession {
            aggregator: ScoreAggregator::new(client.clone(), self.root.clone()),
            oracle: PresenceOracle::new(client.clone(), self.root.clone()),
            client,
            sink,
            firings,
            session_events,
            events_open: true,
        };

        {
            let mut registry = self.state.registry().await;
            registry.reset();
            registry.arm(self.root.clone());
            if self.refresh(&mut registry, &session).await? == Step::Rebootstrap {
                return Err(CoordError::SessionExpired.into());
            }
            info!(
                players = registry.players().count(),
                watches = registry.armed_count(),
                "watches armed"
            );
        }

        self.state.transition(ControllerEvent::Bootstrapped).await?;
        let phase = self.state.phase_snapshot().await;
        info!(bootstraps = phase.bootstraps, "observer is steady");
        Ok(session)
    }

    /// Acknowledge a batch of firings, then re-arm and recompute once.
    async fn process(
        &self,
        session: &ActiveSession,
        batch: &[WatchEvent],
    ) -> Result<Step, ObserverError> {
        let mut registry = self.state.registry().await;
        for event in batch {
            match registry.on_fire(event) {
                FireOutcome::Recompute => {}
                FireOutcome::Rebootstrap => return Ok(Step::Rebootstrap),
                FireOutcome::RootRemoved => {
                    error!(root = %self.root, "leaderboard root was removed");
                    return Err(ObserverError::RootMissing {
                        root: self.root.clone(),
                    });
                }
            }
        }
        self.refresh(&mut registry, session).await
    }

    /// Register every queued path, then recompute and publish.
    async fn refresh(
        &self,
        registry: &mut WatchRegistry,
        session: &ActiveSession,
    ) -> Result<Step, ObserverError> {
        if self.drain(registry, session).await? == Drain::SessionLost {
            return Ok(Step::Rebootstrap);
        }
        self.recompute(session).await
    }

    async fn drain(
        &self,
        registry: &mut WatchRegistry,
        session: &ActiveSession,
    ) -> Result<Drain, ObserverError> {
        let mut deferred = Vec::new();
        while let Some(path) = registry.next_pending() {
            let result = retry_once("watch_children", &path, || {
                session.client.watch_children(&path, session.sink.clone())
            })
            .await;

            match result {
                Ok(children) => registry.mark_armed(&path, &children),
                Err(err) if err.is_no_node() => {
                    if path == self.root {
                        return Err(ObserverError::RootMissing {
                            root: self.root.clone(),
                        });
                    }
                    registry.forget(&path);
                }
                Err(CoordError::SessionExpired | CoordError::Closed) => {
                    return Ok(Drain::SessionLost);
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "watch registration failed; will retry");
                    deferred.push(path);
                }
            }
        }
        for path in deferred {
            registry.defer(path);
        }
        Ok(Drain::Done)
    }

    async fn recompute(&self, session: &ActiveSession) -> Result<Step, ObserverError> {
        let records = match session.aggregator.collect().await {
            Ok(records) => records,
            Err(err) if err.is_session_lost() => return Ok(Step::Rebootstrap),
            Err(err @ ObserverError::RootMissing { .. }) => return Err(err),
            Err(err) => {
                warn!(error = %err, "recompute failed; keeping the previous snapshot");
                return Ok(Step::Continue);
            }
        };

        let ranking = self.ranking.rank(&records);
        let presence = session.oracle.lookup(ranking.players()).await;
        let snapshot = self.state.publish(ranking.into_snapshot(&presence));
        debug!(
            records = records.len(),
            recent = snapshot.recent_scores.len(),
            top = snapshot.top_scores.len(),
            "snapshot published"
        );

        if let Err(err) = self.renderer.render(&snapshot) {
            warn!(error = %err, "failed to render snapshot");
        }
        Ok(Step::Continue)
    }

    async fn terminate(
        &self,
        client: Option<&Arc<dyn CoordinationClient>>,
    ) -> Result<(), ObserverError> {
        self.state.registry().await.shutdown();
        self.state
            .transition(ControllerEvent::ShutdownRequested)
            .await?;
        if let Some(client) = client {
            client.close().await;
        }
        info!("leaderboard observer stopped");
        Ok(())
    }

    async fn fail(
        &self,
        err: ObserverError,
        client: Option<&Arc<dyn CoordinationClient>>,
    ) -> Result<(), ObserverError> {
        error!(error = %err, "leaderboard observer stopping on a fatal error");
        self.state.registry().await.shutdown();
        if let Err(transition) = self
            .state
            .transition(ControllerEvent::ShutdownRequested)
            .await
        {
            debug!(error = %transition, "controller already terminated");
        }
        if let Some(client) = client {
            client.close().await;
        }
        Err(err)
    }
}

/// Resolve once shutdown is requested. A dropped sender never requests shutdown.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `delay` and double it, unless shutdown comes first.
async fn pause(delay: &mut Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let wait = *delay;
    *delay = (*delay * 2).min(MAX_RETRY_DELAY);
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown) => false,
        _ = sleep(wait) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Mutex as StdMutex};

    use tokio::{sync::Mutex, task::JoinHandle, time::timeout};

    use super::*;
    use crate::{
        coord::memory::{MemoryNamespace, MemorySession},
        dto::leaderboard::Snapshot,
        state::ObserverState,
    };

    const ROOT: &str = "/PlayerList";
    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct RecordingRenderer {
        frames: StdMutex<Vec<Snapshot>>,
    }

    impl RecordingRenderer {
        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl SnapshotRenderer for RecordingRenderer {
        fn render(&self, snapshot: &Snapshot) -> io::Result<()> {
            self.frames.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    struct Harness {
        ns: MemoryNamespace,
        state: SharedState,
        renderer: Arc<RecordingRenderer>,
        sessions: Arc<Mutex<Vec<MemorySession>>>,
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<Result<(), ObserverError>>,
    }

    impl Harness {
        async fn start(ns: &MemoryNamespace, max_size: usize) -> Self {
            let state = ObserverState::new(ROOT);
            let renderer = Arc::new(RecordingRenderer::default());
            let sessions = Arc::new(Mutex::new(Vec::new()));
            let (shutdown, shutdown_rx) = watch::channel(false);

            let controller =
                DashboardController::new(state.clone(), ROOT, max_size, renderer.clone());
            let connect = {
                let ns = ns.clone();
                let sessions = sessions.clone();
                move || {
                    let ns = ns.clone();
                    let sessions = sessions.clone();
                    async move {
                        let session = ns.session().await;
                        sessions.lock().await.push(session.clone());
                        Ok(Arc::new(session) as Arc<dyn CoordinationClient>)
                    }
                }
            };
            let handle = tokio::spawn(async move { controller.run(connect, shutdown_rx).await });

            Self {
                ns: ns.clone(),
                state,
                renderer,
                sessions,
                shutdown,
                handle,
            }
        }

        async fn snapshot_where(&self, predicate: impl Fn(&Snapshot) -> bool) -> Arc<Snapshot> {
            let mut rx = self.state.subscribe_snapshots();
            let result = timeout(WAIT, rx.wait_for(|snapshot| predicate(&**snapshot))).await;
            let snapshot = result
                .expect("timed out waiting for snapshot")
                .expect("controller dropped its state");
            snapshot.clone()
        }

        async fn phase_where(&self, predicate: impl Fn(ControllerPhase, usize) -> bool) {
            timeout(WAIT, async {
                loop {
                    let phase = self.state.phase_snapshot().await;
                    if predicate(phase.phase, phase.bootstraps) {
                        return;
                    }
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("timed out waiting for phase");
        }

        async fn current_session(&self) -> MemorySession {
            self.sessions
                .lock()
                .await
                .last()
                .cloned()
                .expect("controller never connected")
        }

        async fn stop(self) -> Result<(), ObserverError> {
            self.shutdown.send_replace(true);
            timeout(WAIT, self.handle)
                .await
                .expect("controller did not stop")
                .expect("controller panicked")
        }
    }

    async fn seeded(scores: &[(&str, i64, &str)]) -> MemoryNamespace {
        let ns = MemoryNamespace::new();
        ns.create(ROOT, "").await.unwrap();
        for (player, timestamp, payload) in scores {
            let player_path = format!("{ROOT}/{player}");
            if !ns.contains(&player_path).await {
                ns.create(&player_path, "").await.unwrap();
            }
            ns.create(&format!("{player_path}/{timestamp}"), *payload)
                .await
                .unwrap();
        }
        ns
    }

    fn players(entries: &[crate::dto::leaderboard::RankedEntry]) -> Vec<(&str, i32, bool)> {
        entries
            .iter()
            .map(|e| (e.player.as_str(), e.score, e.online))
            .collect()
    }

    async fn liveness_holds(ns: &MemoryNamespace, paths: &[&str]) -> bool {
        for path in paths {
            if ns.outstanding_watches(path).await != 1 {
                return false;
            }
        }
        true
    }

    async fn eventually_live(ns: &MemoryNamespace, paths: &[&str]) {
        timeout(WAIT, async {
            while !liveness_holds(ns, paths).await {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("watches were not re-armed exactly once");
    }

    #[tokio::test]
    async fn bootstrap_publishes_ranked_snapshot() {
        let ns = seeded(&[("A", 100, "10"), ("B", 200, "30")]).await;
        let writer = ns.session().await;
        writer
            .create_ephemeral("/PlayerList/B/online", Vec::new())
            .await
            .unwrap();

        let harness = Harness::start(&ns, 2).await;
        let snapshot = harness.snapshot_where(|s| !s.is_empty()).await;

        assert_eq!(
            players(&snapshot.recent_scores),
            vec![("B", 30, true), ("A", 10, false)]
        );
        assert_eq!(
            players(&snapshot.top_scores),
            vec![("B", 30, true), ("A", 10, false)]
        );
        harness
            .phase_where(|phase, bootstraps| phase == ControllerPhase::Steady && bootstraps == 1)
            .await;
        assert!(harness.renderer.count() >= 1);
        assert_eq!(*harness.state.snapshot(), *snapshot);
        eventually_live(&ns, &[ROOT, "/PlayerList/A", "/PlayerList/B"]).await;

        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_root_stops_startup() {
        let ns = MemoryNamespace::new();
        let harness = Harness::start(&ns, 5).await;

        let result = timeout(WAIT, harness.handle).await.unwrap().unwrap();

        assert!(matches!(result, Err(ObserverError::RootMissing { root }) if root == ROOT));
        assert_eq!(harness.state.phase().await, ControllerPhase::Terminated);
    }

    #[tokio::test]
    async fn failed_first_connection_is_fatal() {
        let state = ObserverState::new(ROOT);
        let controller = DashboardController::new(
            state,
            ROOT,
            5,
            Arc::new(RecordingRenderer::default()),
        );
        let (_shutdown, shutdown_rx) = watch::channel(false);

        let result = controller
            .run(
                || async {
                    Err::<Arc<dyn CoordinationClient>, _>(CoordError::ConnectionLoss {
                        path: "/".into(),
                    })
                },
                shutdown_rx,
            )
            .await;

        assert!(matches!(result, Err(ObserverError::Connect(_))));
    }

    #[tokio::test]
    async fn new_scores_and_new_players_are_picked_up() {
        let ns = seeded(&[("A", 100, "10")]).await;
        let harness = Harness::start(&ns, 5).await;
        harness.snapshot_where(|s| s.recent_scores.len() == 1).await;

        ns.create("/PlayerList/A/300", "50").await.unwrap();
        let snapshot = harness.snapshot_where(|s| s.recent_scores.len() == 2).await;
        assert_eq!(players(&snapshot.top_scores)[0], ("A", 50, false));

        ns.create("/PlayerList/C", "").await.unwrap();
        ns.create("/PlayerList/C/400", "70").await.unwrap();
        let snapshot = harness.snapshot_where(|s| s.recent_scores.len() == 3).await;
        assert_eq!(players(&snapshot.recent_scores)[0], ("C", 70, false));

        ns.create("/PlayerList/C/500", "5").await.unwrap();
        harness.snapshot_where(|s| s.recent_scores.len() == 4).await;

        eventually_live(&ns, &[ROOT, "/PlayerList/A", "/PlayerList/C"]).await;
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn presence_flips_only_the_online_flag() {
        let ns = seeded(&[("C", 100, "10"), ("D", 200, "20")]).await;
        let c_session = ns.session().await;
        c_session
            .create_ephemeral("/PlayerList/C/online", Vec::new())
            .await
            .unwrap();

        let harness = Harness::start(&ns, 5).await;
        let before = harness
            .snapshot_where(|s| s.top_scores.iter().any(|e| e.player == "C" && e.online))
            .await;
        assert_eq!(
            players(&before.top_scores),
            vec![("D", 20, false), ("C", 10, true)]
        );

        ns.expire(&c_session).await;
        let d_session = ns.session().await;
        d_session
            .create_ephemeral("/PlayerList/D/online", Vec::new())
            .await
            .unwrap();

        let after = harness
            .snapshot_where(|s| {
                s.top_scores
                    .iter()
                    .all(|e| e.online == (e.player == "D"))
            })
            .await;
        assert_eq!(
            players(&after.top_scores),
            vec![("D", 20, true), ("C", 10, false)]
        );
        eventually_live(&ns, &[ROOT, "/PlayerList/C", "/PlayerList/D"]).await;
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_record_does_not_stall_the_view() {
        let ns = seeded(&[("A", 100, "abc"), ("B", 200, "30")]).await;
        let harness = Harness::start(&ns, 5).await;

        let snapshot = harness.snapshot_where(|s| !s.is_empty()).await;
        assert_eq!(players(&snapshot.recent_scores), vec![("B", 30, false)]);

        ns.create("/PlayerList/A/300", "12").await.unwrap();
        let snapshot = harness.snapshot_where(|s| s.recent_scores.len() == 2).await;
        assert_eq!(players(&snapshot.recent_scores)[0], ("A", 12, false));
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn session_expiry_rebootstraps_to_a_cold_equivalent_snapshot() {
        let ns = seeded(&[("A", 100, "10"), ("B", 200, "30")]).await;
        let harness = Harness::start(&ns, 3).await;
        harness.snapshot_where(|s| s.recent_scores.len() == 2).await;
        harness
            .phase_where(|phase, _| phase == ControllerPhase::Steady)
            .await;

        let first = harness.current_session().await;
        ns.expire(&first).await;
        // Written while the observer has no session; only a fresh enumeration finds it.
        ns.create("/PlayerList/E", "").await.unwrap();
        ns.create("/PlayerList/E/300", "90").await.unwrap();

        harness
            .phase_where(|phase, bootstraps| phase == ControllerPhase::Steady && bootstraps == 2)
            .await;
        let rebuilt = harness.snapshot_where(|s| s.recent_scores.len() == 3).await;
        assert_ne!(harness.current_session().await.id(), first.id());

        let cold = Harness::start(&ns, 3).await;
        let cold_snapshot = cold.snapshot_where(|s| s.recent_scores.len() == 3).await;
        assert_eq!(*rebuilt, *cold_snapshot);

        ns.create("/PlayerList/E/400", "1").await.unwrap();
        harness
            .snapshot_where(|s| s.recent_scores.first().is_some_and(|e| e.score == 1))
            .await;

        cold.stop().await.unwrap();
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn session_closed_elsewhere_rebuilds_on_a_fresh_session() {
        let ns = seeded(&[("A", 100, "10")]).await;
        let harness = Harness::start(&ns, 5).await;
        harness.snapshot_where(|s| !s.is_empty()).await;
        harness
            .phase_where(|phase, _| phase == ControllerPhase::Steady)
            .await;

        let first = harness.current_session().await;
        first.close().await;
        ns.create("/PlayerList/A/200", "20").await.unwrap();

        harness
            .phase_where(|phase, bootstraps| phase == ControllerPhase::Steady && bootstraps == 2)
            .await;
        let snapshot = harness.snapshot_where(|s| s.recent_scores.len() == 2).await;
        assert_eq!(players(&snapshot.recent_scores)[0], ("A", 20, false));
        assert_ne!(harness.current_session().await.id(), first.id());
        eventually_live(&ns, &[ROOT, "/PlayerList/A"]).await;

        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn deleted_player_is_dropped_without_stalling() {
        let ns = seeded(&[("A", 100, "10"), ("B", 200, "30")]).await;
        let harness = Harness::start(&ns, 5).await;
        harness.snapshot_where(|s| s.recent_scores.len() == 2).await;

        ns.delete("/PlayerList/B").await.unwrap();
        let snapshot = harness.snapshot_where(|s| s.recent_scores.len() == 1).await;
        assert_eq!(players(&snapshot.recent_scores), vec![("A", 10, false)]);

        ns.create("/PlayerList/A/300", "40").await.unwrap();
        harness.snapshot_where(|s| s.recent_scores.len() == 2).await;
        eventually_live(&ns, &[ROOT, "/PlayerList/A"]).await;
        assert_eq!(ns.outstanding_watches("/PlayerList/B").await, 0);
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn removing_the_root_is_fatal() {
        let ns = seeded(&[("A", 100, "10")]).await;
        let harness = Harness::start(&ns, 5).await;
        harness.snapshot_where(|s| !s.is_empty()).await;

        ns.delete(ROOT).await.unwrap();
        let result = timeout(WAIT, harness.handle).await.unwrap().unwrap();

        assert!(matches!(result, Err(ObserverError::RootMissing { .. })));
    }

    #[tokio::test]
    async fn failed_rearm_is_retried_until_it_succeeds() {
        let ns = seeded(&[("A", 100, "10")]).await;
        let harness = Harness::start(&ns, 5).await;
        harness.snapshot_where(|s| !s.is_empty()).await;
        eventually_live(&ns, &[ROOT, "/PlayerList/A"]).await;

        // Both registration attempts fail; the path goes back on the queue.
        ns.inject_faults("/PlayerList/A", 2).await;
        ns.create("/PlayerList/A/200", "20").await.unwrap();

        eventually_live(&ns, &[ROOT, "/PlayerList/A"]).await;
        ns.create("/PlayerList/A/300", "30").await.unwrap();
        harness.snapshot_where(|s| s.recent_scores.len() == 3).await;
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_refreshes_without_rebootstrapping() {
        let ns = seeded(&[("A", 100, "10")]).await;
        let harness = Harness::start(&ns, 5).await;
        harness.snapshot_where(|s| !s.is_empty()).await;
        harness
            .phase_where(|phase, _| phase == ControllerPhase::Steady)
            .await;
        let rendered = harness.renderer.count();

        ns.bounce(&harness.current_session().await).await;
        timeout(WAIT, async {
            while harness.renderer.count() == rendered {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reconnect did not trigger a refresh");

        assert_eq!(harness.state.phase_snapshot().await.bootstraps, 1);
        eventually_live(&ns, &[ROOT, "/PlayerList/A"]).await;
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_terminates_and_closes_the_session() {
        let ns = seeded(&[("A", 100, "10")]).await;
        let harness = Harness::start(&ns, 5).await;
        harness.snapshot_where(|s| !s.is_empty()).await;
        harness
            .phase_where(|phase, _| phase == ControllerPhase::Steady)
            .await;
        let session = harness.current_session().await;
        let state = harness.state.clone();

        harness.stop().await.unwrap();

        assert_eq!(state.phase().await, ControllerPhase::Terminated);
        assert!(!*session.connected().borrow());
        assert!(!state.registry().await.has_pending());
        assert_eq!(ns.outstanding_watches(ROOT).await, 0);
    }
}
