//! Reads every score record under the leaderboard root in one pass.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    coord::{CoordError, CoordResult, CoordinationClient, paths, retry_once},
    dto::leaderboard::ScoreRecord,
    error::ObserverError,
};

/// Reason a score node was dropped from a pass.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The node name is not a millisecond timestamp.
    #[error("node name `{0}` is not a timestamp")]
    Timestamp(String),
    /// The payload is not UTF-8.
    #[error("score payload is not valid UTF-8")]
    Encoding,
    /// The payload is not a decimal integer.
    #[error("score payload `{0}` is not an integer")]
    Score(String),
}

/// Flattens every player subtree into score records.
#[derive(Clone)]
pub struct ScoreAggregator {
    client: Arc<dyn CoordinationClient>,
    root: String,
}

impl ScoreAggregator {
    /// Aggregator reading the subtree under `root` through `client`.
    pub fn new(client: Arc<dyn CoordinationClient>, root: impl Into<String>) -> Self {
        Self {
            client,
            root: root.into(),
        }
    }

    /// Read every score record currently stored under the root.
    ///
    /// Malformed or unreadable records are dropped individually. The pass only fails when
    /// the root itself cannot be listed or the session is lost.
    pub async fn collect(&self) -> Result<Vec<ScoreRecord>, ObserverError> {
        let players = match retry_once("children", &self.root, || self.client.children(&self.root))
            .await
        {
            Ok(players) => players,
            Err(err) if err.is_no_node() => {
                return Err(ObserverError::RootMissing {
                    root: self.root.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for player in players {
            match self.collect_player(&player).await {
                Ok(mut player_records) => records.append(&mut player_records),
                Err(err @ (CoordError::SessionExpired | CoordError::Closed)) => {
                    return Err(err.into());
                }
                Err(err) if err.is_no_node() => {
                    debug!(player = %player, "player removed during aggregation");
                }
                Err(err) => {
                    warn!(player = %player, error = %err, "skipping player for this pass");
                }
            }
        }
        Ok(records)
    }

    async fn collect_player(&self, player: &str) -> CoordResult<Vec<ScoreRecord>> {
        let player_path = paths::join(&self.root, player);
        let children =
            retry_once("children", &player_path, || self.client.children(&player_path)).await?;

        let mut records = Vec::with_capacity(children.len());
        for child in children {
            if child == paths::PRESENCE_MARKER {
                continue;
            }
            let record_path = paths::join(&player_path, &child);
            let payload =
                match retry_once("read", &record_path, || self.client.read(&record_path)).await {
                    Ok(payload) => payload,
                    Err(err @ (CoordError::SessionExpired | CoordError::Closed)) => return Err(err),
                    Err(err) if err.is_no_node() => {
                        debug!(path = %record_path, "score record removed during aggregation");
                        continue;
                    }
                    Err(err) => {
                        warn!(path = %record_path, error = %err, "skipping unreadable score record");
                        continue;
                    }
                };

            match parse_record(player, &child, &payload) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %record_path, error = %err, "dropping malformed score record");
                }
            }
        }
        Ok(records)
    }
}

/// Build a record from a score node's name and payload.
pub fn parse_record(player: &str, name: &str, payload: &[u8]) -> Result<ScoreRecord, RecordError> {
    let timestamp = name
        .parse::<i64>()
        .map_err(|_| RecordError::Timestamp(name.to_owned()))?;
    let text = std::str::from_utf8(payload).map_err(|_| RecordError::Encoding)?;
    let score = text
        .trim()
        .parse::<i32>()
        .map_err(|_| RecordError::Score(text.to_owned()))?;
    Ok(ScoreRecord::new(player, timestamp, score))
}
