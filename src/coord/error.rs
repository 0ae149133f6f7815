use std::error::Error;
use thiserror::Error;

/// Result alias for coordination-service operations.
pub type CoordResult<T> = Result<T, CoordError>;

/// Error raised by coordination backends regardless of the underlying service.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The node addressed by the operation does not exist.
    #[error("node `{path}` does not exist")]
    NoNode {
        /// Path that was not found.
        path: String,
    },
    /// A create targeted a path that is already taken.
    #[error("node `{path}` already exists")]
    NodeExists {
        /// Path that is already taken.
        path: String,
    },
    /// A guarded write found the node at a different version.
    #[error("node `{path}` is not at the expected version")]
    BadVersion {
        /// Path of the guarded node.
        path: String,
    },
    /// The session backing the client expired; every watch it held is void.
    #[error("coordination session expired")]
    SessionExpired,
    /// The connection dropped while the request was in flight.
    #[error("connection lost while accessing `{path}`")]
    ConnectionLoss {
        /// Path of the interrupted request.
        path: String,
    },
    /// The session was closed, locally or by the service; every watch it held is void.
    #[error("coordination client closed")]
    Closed,
    /// Any other backend failure.
    #[error("coordination service unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl CoordError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        CoordError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether a single retry of the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordError::ConnectionLoss { .. } | CoordError::Unavailable { .. }
        )
    }

    /// Whether the error reports that the addressed node is gone.
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordError::NoNode { .. })
    }
}
