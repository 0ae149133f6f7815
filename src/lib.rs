//! Library crate for leaderboard-watch, exposing modules for the binaries and tests.

pub mod config;
/// Coordination-service contract and its backends.
pub mod coord;
/// Plain data types shared by the observer, the publisher and the renderer.
pub mod dto;
/// Observer and publisher error types.
pub mod error;
/// Leaderboard services: aggregation, ranking, presence, the observer loop and the writer.
pub mod services;
/// Derived observer state: watch bookkeeping, lifecycle phase and the current snapshot.
pub mod state;
