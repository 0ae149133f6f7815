//! Bookkeeping for one-shot child watches.
//!
//! The registry never talks to the coordination service itself. It decides which
//! paths need a registration; the controller drains [`WatchRegistry::next_pending`],
//! performs the registration and reports the result back with
//! [`WatchRegistry::mark_armed`], [`WatchRegistry::defer`] or [`WatchRegistry::forget`].
//! Every path is therefore in exactly one of three places: armed (one outstanding
//! registration), queued, or in flight between the two.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexSet;
use tracing::{debug, error, info};

use crate::coord::{WatchEvent, WatchEventKind, paths};

/// What the controller must do after a firing has been acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Affected paths were queued or dropped; drain the queue and recompute.
    Recompute,
    /// The session is gone; every registration is void and must be rebuilt from scratch.
    Rebootstrap,
    /// The root node itself was removed; there is nothing left to observe.
    RootRemoved,
}

/// Tracks armed and pending watches for the root and every player subtree.
#[derive(Debug)]
pub struct WatchRegistry {
    root: String,
    armed: HashSet<String>,
    pending: VecDeque<String>,
    queued: HashSet<String>,
    players: IndexSet<String>,
    shutdown: bool,
}

impl WatchRegistry {
    /// Create an empty registry for the namespace rooted at `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            armed: HashSet::new(),
            pending: VecDeque::new(),
            queued: HashSet::new(),
            players: IndexSet::new(),
            shutdown: false,
        }
    }

    /// Queue `path` for a watch registration.
    ///
    /// Returns `false` when the path already has an outstanding registration, is already
    /// queued, or the registry is shut down.
    pub fn arm(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.shutdown || self.armed.contains(&path) || self.queued.contains(&path) {
            return false;
        }
        self.queued.insert(path.clone());
        self.pending.push_back(path);
        true
    }

    /// Take the next path that needs a registration.
    pub fn next_pending(&mut self) -> Option<String> {
        if self.shutdown {
            return None;
        }
        let path = self.pending.pop_front()?;
        self.queued.remove(&path);
        Some(path)
    }

    /// Record a successful registration on `path`, with the children listed by it.
    ///
    /// Children of the root are player subtrees; any player not seen before is queued.
    pub fn mark_armed(&mut self, path: &str, children: &[String]) {
        if !self.armed.insert(path.to_owned()) {
            error!(path, "watch registered twice on the same path");
            debug_assert!(false, "watch registered twice on `{path}`");
        }

        if path != self.root {
            return;
        }
        for child in children {
            if self.players.insert(child.clone()) {
                info!(player = %child, "player discovered");
                let player_path = paths::join(&self.root, child);
                self.arm(player_path);
            }
        }
    }

    /// Put `path` back in the queue after a registration attempt failed transiently.
    pub fn defer(&mut self, path: String) {
        if self.shutdown || self.armed.contains(&path) || !self.queued.insert(path.clone()) {
            return;
        }
        self.pending.push_back(path);
    }

    /// Drop `path` because its node no longer exists.
    pub fn forget(&mut self, path: &str) {
        self.armed.remove(path);
        if self.queued.remove(path) {
            self.pending.retain(|queued| queued != path);
        }
        if paths::parent(path) == Some(self.root.as_str()) {
            self.players.shift_remove(paths::name(path));
        }
        debug!(path, "watch dropped; node is gone");
    }

    /// Acknowledge a firing. Must be called exactly once per delivered event.
    pub fn on_fire(&mut self, event: &WatchEvent) -> FireOutcome {
        match event.kind {
            WatchEventKind::SessionExpired => {
                info!(path = %event.path, "session expired; voiding every watch");
                self.reset();
                FireOutcome::Rebootstrap
            }
            WatchEventKind::SessionReconnected => FireOutcome::Recompute,
            WatchEventKind::ChildrenChanged | WatchEventKind::NodeDeleted => {
                if !self.armed.remove(&event.path) {
                    error!(path = %event.path, kind = ?event.kind, "firing for a path with no outstanding watch");
                    debug_assert!(false, "no outstanding watch on `{}`", event.path);
                    return FireOutcome::Recompute;
                }

                if event.kind == WatchEventKind::NodeDeleted && event.path == self.root {
                    return FireOutcome::RootRemoved;
                }

                // A deleted player may already have been re-created; the registration attempt
                // settles it, and a missing node ends up in `forget`.
                debug!(path = %event.path, kind = ?event.kind, "re-arming after firing");
                self.arm(event.path.clone());
                FireOutcome::Recompute
            }
        }
    }

    /// Void every registration and forget every known player.
    pub fn reset(&mut self) {
        self.armed.clear();
        self.pending.clear();
        self.queued.clear();
        self.players.clear();
    }

    /// Stop handing out paths; nothing is re-armed after this.
    pub fn shutdown(&mut self) {
        self.shutdown = true;
        self.pending.clear();
        self.queued.clear();
    }

    /// Whether `path` has an outstanding registration.
    pub fn is_armed(&self, path: &str) -> bool {
        self.armed.contains(path)
    }

    /// Whether any path is waiting for a registration.
    pub fn has_pending(&self) -> bool {
        !self.shutdown && !self.pending.is_empty()
    }

    /// Number of paths with an outstanding registration.
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Known players in discovery order.
    pub fn players(&self) -> impl Iterator<Item = &str> {
        self.players.iter().map(String::as_str)
    }
}
