//! In-process coordination namespace.
//!
//! Mirrors the parts of ZooKeeper the observer relies on: a tree of nodes with
//! insertion-ordered children, one-shot child watches, ephemeral nodes bound to a
//! session, and session expiry. Tests drive it directly; it also backs demos that
//! run without a real ensemble.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use futures::{FutureExt, future::BoxFuture};
use indexmap::IndexSet;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::debug;
use uuid::Uuid;

use super::{
    CoordError, CoordResult, CoordinationClient, SessionEvent, WatchEvent, WatchEventKind,
    WatchSink, paths,
};

/// Shared namespace; every [`MemorySession`] created from it sees the same tree.
#[derive(Clone, Default)]
pub struct MemoryNamespace {
    tree: Arc<Mutex<Tree>>,
}

/// A client session against a [`MemoryNamespace`].
#[derive(Clone)]
pub struct MemorySession {
    id: Uuid,
    tree: Arc<Mutex<Tree>>,
    connected: watch::Receiver<bool>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Live,
    Expired,
    Closed,
}

struct SessionSlot {
    status: SessionStatus,
    connected: watch::Sender<bool>,
    events: broadcast::Sender<SessionEvent>,
}

struct Node {
    data: Vec<u8>,
    version: i32,
    owner: Option<Uuid>,
    children: IndexSet<String>,
}

impl Node {
    fn new(data: Vec<u8>, owner: Option<Uuid>) -> Self {
        Self {
            data,
            version: 0,
            owner,
            children: IndexSet::new(),
        }
    }
}

struct Registration {
    session: Uuid,
    sink: WatchSink,
}

struct Tree {
    nodes: BTreeMap<String, Node>,
    child_watches: HashMap<String, Vec<Registration>>,
    sessions: HashMap<Uuid, SessionSlot>,
    faults: HashMap<String, u32>,
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_owned(), Node::new(Vec::new(), None));
        Self {
            nodes,
            child_watches: HashMap::new(),
            sessions: HashMap::new(),
            faults: HashMap::new(),
        }
    }
}

impl Tree {
    fn check_session(&self, session: Uuid) -> CoordResult<()> {
        match self.sessions.get(&session).map(|slot| slot.status) {
            Some(SessionStatus::Live) => Ok(()),
            Some(SessionStatus::Expired) => Err(CoordError::SessionExpired),
            Some(SessionStatus::Closed) | None => Err(CoordError::Closed),
        }
    }

    fn take_fault(&mut self, path: &str) -> CoordResult<()> {
        if let Some(remaining) = self.faults.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CoordError::ConnectionLoss {
                    path: path.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn node(&self, path: &str) -> CoordResult<&Node> {
        self.nodes.get(path).ok_or_else(|| CoordError::NoNode {
            path: path.to_owned(),
        })
    }

    fn children(&mut self, session: Uuid, path: &str) -> CoordResult<Vec<String>> {
        self.check_session(session)?;
        self.take_fault(path)?;
        Ok(self.node(path)?.children.iter().cloned().collect())
    }

    fn exists(&mut self, session: Uuid, path: &str) -> CoordResult<bool> {
        self.check_session(session)?;
        self.take_fault(path)?;
        Ok(self.nodes.contains_key(path))
    }

    fn read(&mut self, session: Uuid, path: &str) -> CoordResult<Vec<u8>> {
        self.check_session(session)?;
        self.take_fault(path)?;
        Ok(self.node(path)?.data.clone())
    }

    fn watch_children(
        &mut self,
        session: Uuid,
        path: &str,
        sink: WatchSink,
    ) -> CoordResult<Vec<String>> {
        let children = self.children(session, path)?;
        self.child_watches
            .entry(path.to_owned())
            .or_default()
            .push(Registration { session, sink });
        Ok(children)
    }

    fn create(&mut self, path: &str, data: Vec<u8>, owner: Option<Uuid>) -> CoordResult<()> {
        if self.nodes.contains_key(path) {
            return Err(CoordError::NodeExists {
                path: path.to_owned(),
            });
        }
        let parent = paths::parent(path).ok_or_else(|| CoordError::NodeExists {
            path: path.to_owned(),
        })?;
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| CoordError::NoNode {
                path: parent.to_owned(),
            })?;
        parent_node.children.insert(paths::name(path).to_owned());
        self.nodes.insert(path.to_owned(), Node::new(data, owner));
        let parent = parent.to_owned();
        self.fire(&parent, WatchEventKind::ChildrenChanged);
        Ok(())
    }

    fn write(&mut self, path: &str, data: Vec<u8>, expected_version: Option<i32>) -> CoordResult<()> {
        let node = self.nodes.get_mut(path).ok_or_else(|| CoordError::NoNode {
            path: path.to_owned(),
        })?;
        if let Some(expected) = expected_version {
            if expected != node.version {
                debug!(path, expected, found = node.version, "guarded write rejected");
                return Err(CoordError::BadVersion {
                    path: path.to_owned(),
                });
            }
        }
        node.data = data;
        node.version += 1;
        Ok(())
    }

    fn delete_subtree(&mut self, path: &str) -> CoordResult<()> {
        let children: Vec<String> = self.node(path)?.children.iter().cloned().collect();
        for child in children {
            self.delete_subtree(&paths::join(path, &child))?;
        }
        self.nodes.remove(path);
        self.fire(path, WatchEventKind::NodeDeleted);
        if let Some(parent) = paths::parent(path) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.shift_remove(paths::name(path));
            }
            let parent = parent.to_owned();
            self.fire(&parent, WatchEventKind::ChildrenChanged);
        }
        Ok(())
    }

    fn fire(&mut self, path: &str, kind: WatchEventKind) {
        let Some(registrations) = self.child_watches.remove(path) else {
            return;
        };
        for registration in registrations {
            debug!(path, ?kind, session = %registration.session, "memory watch fired");
            let _ = registration.sink.send(WatchEvent::new(path, kind));
        }
    }

    fn take_registrations(&mut self, session: Uuid) -> Vec<(String, WatchSink)> {
        let mut taken = Vec::new();
        for (path, registrations) in self.child_watches.iter_mut() {
            let (mine, others): (Vec<_>, Vec<_>) = registrations
                .drain(..)
                .partition(|registration| registration.session == session);
            *registrations = others;
            taken.extend(mine.into_iter().map(|r| (path.clone(), r.sink)));
        }
        self.child_watches.retain(|_, registrations| !registrations.is_empty());
        taken
    }

    fn drop_ephemerals(&mut self, session: Uuid) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.delete_subtree(&path);
        }
    }

    fn end_session(&mut self, session: Uuid, status: SessionStatus) {
        let Some(slot) = self.sessions.get_mut(&session) else {
            return;
        };
        if slot.status != SessionStatus::Live {
            return;
        }
        slot.status = status;
        let _ = slot.connected.send(false);
        let _ = slot.events.send(match status {
            SessionStatus::Expired => SessionEvent::Expired,
            _ => SessionEvent::Closed,
        });

        let registrations = self.take_registrations(session);
        if status == SessionStatus::Expired {
            for (path, sink) in registrations {
                let _ = sink.send(WatchEvent::new(path, WatchEventKind::SessionExpired));
            }
        }
        self.drop_ephemerals(session);
    }
}

impl MemoryNamespace {
    /// Create an empty namespace containing only `/`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new live session.
    pub async fn session(&self) -> MemorySession {
        let id = Uuid::new_v4();
        let (connected_tx, connected_rx) = watch::channel(true);
        let (events, _rx) = broadcast::channel(8);
        self.tree.lock().await.sessions.insert(
            id,
            SessionSlot {
                status: SessionStatus::Live,
                connected: connected_tx,
                events: events.clone(),
            },
        );
        MemorySession {
            id,
            tree: self.tree.clone(),
            connected: connected_rx,
            events,
        }
    }

    /// Create a persistent node outside any session, e.g. to seed fixtures.
    pub async fn create(&self, path: &str, data: impl Into<Vec<u8>>) -> CoordResult<()> {
        self.tree.lock().await.create(path, data.into(), None)
    }

    /// Remove `path` and everything below it, firing the matching watches.
    pub async fn delete(&self, path: &str) -> CoordResult<()> {
        self.tree.lock().await.delete_subtree(path)
    }

    /// Expire `session`: its watches receive a session-expired firing and its ephemeral
    /// nodes are removed.
    pub async fn expire(&self, session: &MemorySession) {
        self.tree
            .lock()
            .await
            .end_session(session.id, SessionStatus::Expired);
    }

    /// Simulate a disconnect followed by a reconnect within the same session.
    pub async fn bounce(&self, session: &MemorySession) {
        let tree = self.tree.lock().await;
        if let Some(slot) = tree.sessions.get(&session.id) {
            let _ = slot.connected.send(false);
            let _ = slot.connected.send(true);
            let _ = slot.events.send(SessionEvent::Reconnected);
        }
    }

    /// Make the next `count` reads of `path` fail with a connection loss.
    pub async fn inject_faults(&self, path: &str, count: u32) {
        self.tree.lock().await.faults.insert(path.to_owned(), count);
    }

    /// Number of one-shot watches currently registered on `path`.
    pub async fn outstanding_watches(&self, path: &str) -> usize {
        self.tree
            .lock()
            .await
            .child_watches
            .get(path)
            .map_or(0, Vec::len)
    }

    /// Whether a node exists at `path`, regardless of session.
    pub async fn contains(&self, path: &str) -> bool {
        self.tree.lock().await.nodes.contains_key(path)
    }
}

impl MemorySession {
    /// Identifier of this session.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl CoordinationClient for MemorySession {
    fn children(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<String>>> {
        let (tree, id, path) = (self.tree.clone(), self.id, path.to_owned());
        async move { tree.lock().await.children(id, &path) }.boxed()
    }

    fn exists(&self, path: &str) -> BoxFuture<'static, CoordResult<bool>> {
        let (tree, id, path) = (self.tree.clone(), self.id, path.to_owned());
        async move { tree.lock().await.exists(id, &path) }.boxed()
    }

    fn read(&self, path: &str) -> BoxFuture<'static, CoordResult<Vec<u8>>> {
        let (tree, id, path) = (self.tree.clone(), self.id, path.to_owned());
        async move { tree.lock().await.read(id, &path) }.boxed()
    }

    fn watch_children(
        &self,
        path: &str,
        sink: WatchSink,
    ) -> BoxFuture<'static, CoordResult<Vec<String>>> {
        let (tree, id, path) = (self.tree.clone(), self.id, path.to_owned());
        async move { tree.lock().await.watch_children(id, &path, sink) }.boxed()
    }

    fn create_persistent(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<()>> {
        let (tree, id, path) = (self.tree.clone(), self.id, path.to_owned());
        async move {
            let mut tree = tree.lock().await;
            tree.check_session(id)?;
            tree.create(&path, data, None)
        }
        .boxed()
    }

    fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> BoxFuture<'static, CoordResult<()>> {
        let (tree, id, path) = (self.tree.clone(), self.id, path.to_owned());
        async move {
            let mut tree = tree.lock().await;
            tree.check_session(id)?;
            tree.create(&path, data, Some(id))
        }
        .boxed()
    }

    fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> BoxFuture<'static, CoordResult<()>> {
        let (tree, id, path) = (self.tree.clone(), self.id, path.to_owned());
        async move {
            let mut tree = tree.lock().await;
            tree.check_session(id)?;
            tree.write(&path, data, expected_version)
        }
        .boxed()
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let (tree, id) = (self.tree.clone(), self.id);
        async move {
            tree.lock().await.end_session(id, SessionStatus::Closed);
        }
        .boxed()
    }
}
