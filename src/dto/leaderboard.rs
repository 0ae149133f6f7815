use serde::Serialize;

/// One score event read from a player's subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreRecord {
    /// Owning player, the parent node's name.
    pub player: String,
    /// Publish time in wall-clock milliseconds, taken from the node name.
    pub timestamp: i64,
    /// Decoded payload.
    pub score: i32,
}

impl ScoreRecord {
    /// Record for `player` at `timestamp`.
    pub fn new(player: impl Into<String>, timestamp: i64, score: i32) -> Self {
        Self {
            player: player.into(),
            timestamp,
            score,
        }
    }
}

/// A ranked score annotated with the player's presence at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    /// Player the score belongs to.
    pub player: String,
    /// Publish time in wall-clock milliseconds.
    pub timestamp: i64,
    /// Score value.
    pub score: i32,
    /// Whether the player's presence marker existed when the snapshot was taken.
    pub online: bool,
}

/// The two bounded projections, recomputed from scratch on every trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Most recent score events, newest first.
    pub recent_scores: Vec<RankedEntry>,
    /// Highest scores, best first.
    pub top_scores: Vec<RankedEntry>,
}

impl Snapshot {
    /// Whether neither projection holds an entry.
    pub fn is_empty(&self) -> bool {
        self.recent_scores.is_empty() && self.top_scores.is_empty()
    }
}
