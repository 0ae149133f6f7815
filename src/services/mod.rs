/// Flattens player subtrees into score records.
pub mod aggregator;
/// Observer loop driving bootstrap, re-arming and recomputation.
pub mod controller;
/// Point-in-time presence checks.
pub mod presence;
/// Writer side: registers a player and publishes scores.
pub mod publisher;
/// Bounded recent and top-score projections.
pub mod ranking;
/// Console rendering of snapshots.
pub mod render;
