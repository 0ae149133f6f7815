/// Error types shared by every coordination backend.
pub mod error;
/// In-process namespace with one-shot watches and ephemeral sessions.
pub mod memory;
/// Namespace path helpers.
pub mod paths;
/// ZooKeeper session backed by `zookeeper-client`.
#[cfg(feature = "zookeeper-store")]
pub mod zookeeper;

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

pub use self::error::{CoordError, CoordResult};

/// Kind of change reported by a one-shot watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// A child was created under, or removed from, the watched node.
    ChildrenChanged,
    /// The watched node itself was removed.
    NodeDeleted,
    /// The session that registered the watch expired.
    SessionExpired,
    /// The session reconnected after a disconnect; its watches are still registered.
    SessionReconnected,
}

/// A single firing delivered to a [`WatchSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Path the watch was registered on.
    pub path: String,
    /// What happened.
    pub kind: WatchEventKind,
}

impl WatchEvent {
    /// Build an event for `path`.
    pub fn new(path: impl Into<String>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Channel every firing is funnelled through; the receiving side is drained by a single task.
pub type WatchSink = mpsc::UnboundedSender<WatchEvent>;

/// Session-level notifications, kept apart from the level-triggered connected flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is gone for good; watches and ephemeral nodes are lost.
    Expired,
    /// The connection came back within the same session.
    Reconnected,
    /// The session ended without expiring: an authentication failure, or a close through
    /// another handle. Watches and ephemeral nodes are lost just as on expiry.
    Closed,
}

/// Hierarchical namespace contract consumed by the observer and the publisher.
pub trait CoordinationClient: Send + Sync {
    /// List the children of `path`. Order is not stable across calls.
    fn children(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<String>>>;
    /// Whether a node exists at `path`.
    fn exists(&self, path: &str) -> BoxFuture<'static, CoordResult<bool>>;
    /// Read the payload stored at `path`.
    fn read(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<u8>>>;
    /// List the children of `path` and register a one-shot watch delivering into `sink`.
    ///
    /// The watch fires at most once: on a child-list change, on removal of `path`, or when the
    /// session expires.
    fn watch_children(
        &self,
        path: &str,
        sink: WatchSink,
    ) -> BoxFuture<'static, CoordResult<Vec<String>>>;
    /// Create a node that outlives the session.
    fn create_persistent(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<()>>;
    /// Create a node that disappears together with the session.
    fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<()>>;
    /// Replace the payload at `path`, optionally guarded by the node version.
    fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> BoxFuture<'static, CoordResult<()>>;
    /// Level-triggered "session is usable" condition.
    fn connected(&self) -> watch::Receiver<bool>;
    /// Subscribe to session loss and reconnect notifications.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;
    /// Close the session, releasing its ephemeral nodes.
    fn close(&self) -> BoxFuture<'static, ()>;
}

/// Block until the connected condition holds.
pub async fn wait_connected(mut connected: watch::Receiver<bool>) -> CoordResult<()> {
    connected
        .wait_for(|up| *up)
        .await
        .map(|_| ())
        .map_err(|_| CoordError::Closed)
}

/// Run `op`, retrying it once when the first attempt fails with a transient error.
pub async fn retry_once<T, F, Fut>(what: &'static str, path: &str, mut op: F) -> CoordResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoordResult<T>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            debug!(op = what, path, error = %err, "transient coordination failure; retrying once");
            op().await
        }
        other => other,
    }
}
