//! Writer side of the leaderboard: player registration, presence and score records.
//!
//! Records are create-only. A score that lands on an occupied millisecond moves to the
//! next free one; nothing here rewrites a record once it exists.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    coord::{CoordError, CoordinationClient, paths},
    dto::{leaderboard::ScoreRecord, validation::validate_player_id},
    error::PublishError,
};

/// Attempts at finding a free millisecond slot when two scores land in the same one.
const MAX_SLOT_ATTEMPTS: i64 = 16;

/// Writer side of the leaderboard: owns one player's subtree and presence marker.
pub struct ScorePublisher {
    client: Arc<dyn CoordinationClient>,
    player_path: String,
    player: String,
}

impl ScorePublisher {
    /// Create the root and player nodes when missing and mark the player online.
    ///
    /// The presence marker is ephemeral: it goes away with `client`'s session. A marker
    /// already held by another session means the player is online elsewhere.
    pub async fn register(
        client: Arc<dyn CoordinationClient>,
        root: &str,
        player: &str,
    ) -> Result<Self, PublishError> {
        validate_player_id(player).map_err(|_| PublishError::InvalidPlayer(player.to_owned()))?;

        let player_path = paths::join(root, player);
        ensure_path(client.as_ref(), &player_path).await?;

        let marker = paths::presence_path(root, player);
        match client.create_ephemeral(&marker, Vec::new()).await {
            Ok(()) => {}
            Err(CoordError::NodeExists { .. }) => {
                return Err(PublishError::AlreadyOnline(player.to_owned()));
            }
            Err(err) => return Err(err.into()),
        }
        info!(player, "player registered and online");

        Ok(Self {
            client,
            player_path,
            player: player.to_owned(),
        })
    }

    /// Registered player name.
    pub fn player(&self) -> &str {
        &self.player
    }

    /// Publish `score` stamped with the current wall-clock time.
    pub async fn publish(&self, score: i64) -> Result<ScoreRecord, PublishError> {
        self.publish_at(now_millis(), score).await
    }

    /// Publish `score` at `timestamp`, moving to the next free millisecond on collision.
    pub async fn publish_at(&self, timestamp: i64, score: i64) -> Result<ScoreRecord, PublishError> {
        let score = checked_score(score)?;
        let payload = score.to_string().into_bytes();

        let mut slot = timestamp;
        loop {
            let path = paths::join(&self.player_path, &slot.to_string());
            match self.client.create_persistent(&path, payload.clone()).await {
                Ok(()) => {
                    debug!(player = %self.player, timestamp = slot, score, "score published");
                    return Ok(ScoreRecord::new(&self.player, slot, score));
                }
                Err(CoordError::NodeExists { .. }) if slot - timestamp + 1 < MAX_SLOT_ATTEMPTS => {
                    slot += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Close the session; the presence marker disappears with it.
    pub async fn leave(self) {
        self.client.close().await;
        info!(player = %self.player, "player left");
    }
}

fn checked_score(score: i64) -> Result<i32, PublishError> {
    i32::try_from(score)
        .ok()
        .filter(|score| *score >= 0)
        .ok_or(PublishError::InvalidScore(score))
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Create every missing node on the way to `path`.
async fn ensure_path(client: &dyn CoordinationClient, path: &str) -> Result<(), CoordError> {
    let mut current = String::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match client.create_persistent(&current, Vec::new()).await {
            Ok(()) | Err(CoordError::NodeExists { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
