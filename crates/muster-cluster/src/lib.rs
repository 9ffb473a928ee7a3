//! muster-cluster — the coordinator that glues discovery, sessions,
//! registry, and the scheduler into one fleet.
//!
//! The [`Cluster`] consumes membership sets from discovery, opens one
//! [`muster_engine::Engine`] session per address, funnels every session's
//! events through a single channel (source order preserved per engine),
//! and exposes the deploy/destroy/lookup surface the API frontend
//! dispatches to. Placement state persists in a
//! [`muster_store::PlacementStore`] so restarts can reconcile and, for
//! `on-node-failure` containers, re-place.

pub mod cluster;
pub mod error;

pub use cluster::{ClientFactory, Cluster, ClusterOptions};
pub use error::{ClusterError, ClusterResult};
