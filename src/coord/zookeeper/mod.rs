//! ZooKeeper-backed [`CoordinationClient`] built on `zookeeper-client`.

mod error;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};
use zookeeper_client as zk;

use self::error::map_error;
use crate::coord::{
    CoordError, CoordResult, CoordinationClient, SessionEvent, WatchEvent, WatchEventKind,
    WatchSink,
};

/// A single ZooKeeper session.
#[derive(Clone)]
pub struct ZookeeperClient {
    inner: Arc<ZookeeperInner>,
}

struct ZookeeperInner {
    client: RwLock<Option<zk::Client>>,
    connected: watch::Receiver<bool>,
    events: broadcast::Sender<SessionEvent>,
    closing: Arc<AtomicBool>,
}

impl ZookeeperInner {
    async fn client(&self) -> CoordResult<zk::Client> {
        let guard = self.client.read().await;
        guard.clone().ok_or(CoordError::Closed)
    }
}

/// Open a session against the ensemble at `endpoint` (`host:port[,host:port...]`).
///
/// Resolves once the session is established; later state changes are mirrored onto the
/// client's connected flag and session events.
pub async fn connect(endpoint: &str) -> CoordResult<ZookeeperClient> {
    let client = zk::Client::connect(endpoint)
        .await
        .map_err(|err| map_error(endpoint, err))?;

    let (connected_tx, connected_rx) = watch::channel(true);
    let (events, _rx) = broadcast::channel(8);
    let closing = Arc::new(AtomicBool::new(false));
    spawn_state_mirror(
        client.state_watcher(),
        connected_tx,
        events.clone(),
        closing.clone(),
    );
    info!(endpoint, "zookeeper session established");

    Ok(ZookeeperClient {
        inner: Arc::new(ZookeeperInner {
            client: RwLock::new(Some(client)),
            connected: connected_rx,
            events,
            closing,
        }),
    })
}

/// Follow session state transitions until the session ends.
///
/// Every terminal state is reported as a [`SessionEvent`], except a close requested
/// through [`CoordinationClient::close`] on this client.
fn spawn_state_mirror(
    mut watcher: zk::StateWatcher,
    connected: watch::Sender<bool>,
    events: broadcast::Sender<SessionEvent>,
    closing: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut disconnected = false;
        loop {
            match watcher.changed().await {
                zk::SessionState::SyncConnected => {
                    let _ = connected.send(true);
                    if disconnected {
                        disconnected = false;
                        info!("zookeeper connection restored");
                        let _ = events.send(SessionEvent::Reconnected);
                    }
                }
                zk::SessionState::Disconnected => {
                    warn!("zookeeper connection lost; waiting for reconnect");
                    disconnected = true;
                    let _ = connected.send(false);
                }
                zk::SessionState::Expired => {
                    warn!("zookeeper session expired");
                    let _ = connected.send(false);
                    let _ = events.send(SessionEvent::Expired);
                    break;
                }
                zk::SessionState::Closed => {
                    let _ = connected.send(false);
                    if !closing.load(Ordering::Acquire) {
                        warn!("zookeeper session closed by another handle");
                        let _ = events.send(SessionEvent::Closed);
                    }
                    break;
                }
                other => {
                    warn!(state = ?other, "zookeeper session terminated");
                    let _ = connected.send(false);
                    let _ = events.send(SessionEvent::Closed);
                    break;
                }
            }
        }
    });
}

/// Wait for a one-shot watcher and forward its firing into `sink`.
async fn forward_firing(path: String, watcher: zk::OneshotWatcher, sink: WatchSink) {
    let event = watcher.changed().await;
    let kind = match event.event_type {
        zk::EventType::NodeChildrenChanged => WatchEventKind::ChildrenChanged,
        zk::EventType::NodeDeleted => WatchEventKind::NodeDeleted,
        zk::EventType::Session if matches!(event.session_state, zk::SessionState::Expired) => {
            WatchEventKind::SessionExpired
        }
        other => {
            debug!(path = %path, event_type = ?other, "ignoring zookeeper watch event");
            return;
        }
    };
    let _ = sink.send(WatchEvent::new(path, kind));
}

fn create_options(mode: zk::CreateMode) -> zk::CreateOptions<'static> {
    mode.with_acls(zk::Acls::anyone_all())
}

impl ZookeeperClient {
    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: zk::CreateMode,
    ) -> BoxFuture<'static, CoordResult<()>> {
        let (inner, path) = (self.inner.clone(), path.to_owned());
        async move {
            let client = inner.client().await?;
            client
                .create(&path, &data, &create_options(mode))
                .await
                .map(|_| ())
                .map_err(|err| map_error(&path, err))
        }
        .boxed()
    }
}

impl CoordinationClient for ZookeeperClient {
    fn children(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<String>>> {
        let (inner, path) = (self.inner.clone(), path.to_owned());
        async move {
            let client = inner.client().await?;
            client
                .get_children(&path)
                .await
                .map(|(children, _stat)| children)
                .map_err(|err| map_error(&path, err))
        }
        .boxed()
    }

    fn exists(&self, path: &str) -> BoxFuture<'static, CoordResult<bool>> {
        let (inner, path) = (self.inner.clone(), path.to_owned());
        async move {
            let client = inner.client().await?;
            client
                .check_stat(&path)
                .await
                .map(|stat| stat.is_some())
                .map_err(|err| map_error(&path, err))
        }
        .boxed()
    }

    fn read(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<u8>>> {
        let (inner, path) = (self.inner.clone(), path.to_owned());
        async move {
            let client = inner.client().await?;
            client
                .get_data(&path)
                .await
                .map(|(data, _stat)| data)
                .map_err(|err| map_error(&path, err))
        }
        .boxed()
    }

    fn watch_children(
        &self,
        path: &str,
        sink: WatchSink,
    ) -> BoxFuture<'static, CoordResult<Vec<String>>> {
        let (inner, path) = (self.inner.clone(), path.to_owned());
        async move {
            let client = inner.client().await?;
            let (children, _stat, watcher) = client
                .get_and_watch_children(&path)
                .await
                .map_err(|err| map_error(&path, err))?;
            tokio::spawn(forward_firing(path, watcher, sink));
            Ok(children)
        }
        .boxed()
    }

    fn create_persistent(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<()>> {
        self.create(path, data, zk::CreateMode::Persistent)
    }

    fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<()>> {
        self.create(path, data, zk::CreateMode::Ephemeral)
    }

    fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> BoxFuture<'static, CoordResult<()>> {
        let (inner, path) = (self.inner.clone(), path.to_owned());
        async move {
            let client = inner.client().await?;
            client
                .set_data(&path, &data, expected_version)
                .await
                .map(|_| ())
                .map_err(|err| map_error(&path, err))
        }
        .boxed()
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.clone()
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let inner = self.inner.clone();
        async move {
            inner.closing.store(true, Ordering::Release);
            // Dropping the last handle ends the session and its ephemeral nodes.
            let mut guard = inner.client.write().await;
            if guard.take().is_some() {
                info!("zookeeper session closed");
            }
        }
        .boxed()
    }
}
