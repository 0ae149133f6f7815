use thiserror::Error;
use validator::ValidationErrors;

use crate::{coord::CoordError, state::phase::InvalidTransition};

/// Errors surfaced by the observer.
///
/// Only [`ObserverError::RootMissing`], [`ObserverError::Config`] and a failed first
/// [`ObserverError::Connect`] stop the process; everything else is handled inside the
/// controller loop.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// The leaderboard root does not exist; there is nothing to observe.
    #[error("leaderboard root `{root}` does not exist")]
    RootMissing {
        /// Configured root path.
        root: String,
    },
    /// Startup configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// No session could be established.
    #[error("failed to connect to the coordination service")]
    Connect(#[source] CoordError),
    /// A coordination call failed.
    #[error(transparent)]
    Coordination(#[from] CoordError),
    /// The controller lifecycle was driven out of order.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl ObserverError {
    /// Whether the session behind the call is gone, expired or closed. The controller
    /// recovers from this by bootstrapping on a fresh session.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            ObserverError::Coordination(CoordError::SessionExpired | CoordError::Closed)
        )
    }
}

impl From<ValidationErrors> for ObserverError {
    fn from(err: ValidationErrors) -> Self {
        ObserverError::Config(format!("validation failed: {}", err))
    }
}

/// Errors raised by the score publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The player name cannot be used as a namespace segment.
    #[error("invalid player name: {0}")]
    InvalidPlayer(String),
    /// Scores are non-negative integers.
    #[error("invalid score: {0}")]
    InvalidScore(i64),
    /// Another session already holds this player's presence marker.
    #[error("player `{0}` is already online")]
    AlreadyOnline(String),
    /// A coordination call failed.
    #[error(transparent)]
    Coordination(#[from] CoordError),
}
