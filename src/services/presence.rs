//! Online status of players, read from their ephemeral presence markers.

use std::sync::Arc;

use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::coord::{CoordinationClient, paths, retry_once};

/// Point-in-time presence checks against each player's ephemeral marker.
#[derive(Clone)]
pub struct PresenceOracle {
    client: Arc<dyn CoordinationClient>,
    root: String,
}

/// Presence of a set of players, each looked up exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceBatch {
    online: IndexMap<String, bool>,
}

impl PresenceBatch {
    /// Record the presence of `player`.
    pub fn insert(&mut self, player: impl Into<String>, online: bool) {
        self.online.insert(player.into(), online);
    }

    /// Presence of `player`; players missing from the batch are offline.
    pub fn is_online(&self, player: &str) -> bool {
        self.online.get(player).copied().unwrap_or(false)
    }

    /// Number of players in the batch.
    pub fn len(&self) -> usize {
        self.online.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

impl PresenceOracle {
    /// Oracle checking markers under `root` through `client`.
    pub fn new(client: Arc<dyn CoordinationClient>, root: impl Into<String>) -> Self {
        Self {
            client,
            root: root.into(),
        }
    }

    /// Whether `player`'s marker exists right now.
    ///
    /// A missing marker is the normal offline signal. A check that still fails after one
    /// retry is logged and reported as offline.
    pub async fn is_online(&self, player: &str) -> bool {
        let path = paths::presence_path(&self.root, player);
        match retry_once("exists", &path, || self.client.exists(&path)).await {
            Ok(online) => online,
            Err(err) => {
                warn!(player, error = %err, "presence check failed; reporting offline");
                false
            }
        }
    }

    /// Look up every distinct player in `players` once, concurrently.
    pub async fn lookup<'a>(&self, players: impl IntoIterator<Item = &'a str>) -> PresenceBatch {
        let distinct: IndexSet<&str> = players.into_iter().collect();
        let checks = distinct.iter().map(|player| self.is_online(player));
        let results = join_all(checks).await;

        let mut batch = PresenceBatch::default();
        for (player, online) in distinct.into_iter().zip(results) {
            batch.insert(player, online);
        }
        batch
    }
}
