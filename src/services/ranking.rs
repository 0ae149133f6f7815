//! Bounded projections over the aggregated score records.
//!
//! Both orders are total: `(player, timestamp)` identifies a record uniquely, so the
//! result never depends on the order in which the namespace listed its children.
//!
//! * recent: timestamp descending, then score descending, then player ascending.
//! * top: score descending, then timestamp ascending (the earlier score wins), then
//!   player ascending.

use std::cmp::Ordering;

use indexmap::IndexSet;

use crate::{
    dto::leaderboard::{RankedEntry, ScoreRecord, Snapshot},
    services::presence::PresenceBatch,
};

/// Derives the most-recent and top-score projections, each bounded to `max_size`.
#[derive(Debug, Clone, Copy)]
pub struct RankingEngine {
    max_size: usize,
}

/// Ordered projections awaiting presence annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranking {
    recent: Vec<ScoreRecord>,
    top: Vec<ScoreRecord>,
}

fn recent_order(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| b.score.cmp(&a.score))
        .then_with(|| a.player.cmp(&b.player))
}

fn top_order(a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.player.cmp(&b.player))
}

fn bounded(
    records: &[ScoreRecord],
    max_size: usize,
    order: fn(&ScoreRecord, &ScoreRecord) -> Ordering,
) -> Vec<ScoreRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(order);
    sorted.truncate(max_size);
    sorted
}

impl RankingEngine {
    /// Engine keeping at most `max_size` entries in each projection.
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Bound applied to each projection.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Rank `records`. Pure: the same input always yields the same output.
    pub fn rank(&self, records: &[ScoreRecord]) -> Ranking {
        Ranking {
            recent: bounded(records, self.max_size, recent_order),
            top: bounded(records, self.max_size, top_order),
        }
    }
}

impl Ranking {
    /// Distinct players appearing in either projection, in first-seen order.
    pub fn players(&self) -> impl Iterator<Item = &str> {
        self.recent
            .iter()
            .chain(&self.top)
            .map(|record| record.player.as_str())
            .collect::<IndexSet<_>>()
            .into_iter()
    }

    /// Newest records first.
    pub fn recent(&self) -> &[ScoreRecord] {
        &self.recent
    }

    /// Highest scores first.
    pub fn top(&self) -> &[ScoreRecord] {
        &self.top
    }

    /// Attach presence to every entry.
    pub fn into_snapshot(self, presence: &PresenceBatch) -> Snapshot {
        let annotate = |records: Vec<ScoreRecord>| -> Vec<RankedEntry> {
            records
                .into_iter()
                .map(|record| RankedEntry {
                    online: presence.is_online(&record.player),
                    player: record.player,
                    timestamp: record.timestamp,
                    score: record.score,
                })
                .collect()
        };
        Snapshot {
            recent_scores: annotate(self.recent),
            top_scores: annotate(self.top),
        }
    }
}
