//! muster-discovery — membership discovery for the muster cluster manager.
//!
//! A discovery backend translates a URI into a stream of engine addresses.
//! Backends are registered by scheme and resolved at startup:
//!
//! ```text
//! nodes://host1:2375,host2:2375   static list, emitted once
//! file:///etc/muster/cluster      re-read when the file changes
//! etcd://host:2379/muster/nodes   watch a key prefix in a KV store
//! zk://..., consul://...          same contract, different store
//! host1:2375,host2:2375           no scheme defaults to `nodes`
//! ```
//!
//! # Contract
//!
//! `Backend::watch` returns a channel that carries the **complete** current
//! membership on every message — never deltas. The consumer computes diffs.
//! Transient backend errors are retried with capped exponential backoff and
//! reported on a separate error channel; the entries channel stays open.

pub mod entry;
pub mod file;
pub mod kv;
pub mod nodes;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub use entry::Entry;
pub use file::FileBackend;
pub use kv::{KvBackend, KvStore, MemoryStore};
pub use nodes::NodesBackend;

/// Result type alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur while discovering cluster membership.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("unsupported discovery scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid discovery entry {0:?}: expected host:port")]
    InvalidEntry(String),

    #[error("backend not initialized: {0}")]
    NotInitialized(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channels handed back by [`Backend::watch`].
///
/// `entries` carries the full membership set on every message. `errors`
/// reports backend failures without closing the entries channel.
#[derive(Debug)]
pub struct WatchChannels {
    pub entries: mpsc::Receiver<Vec<Entry>>,
    pub errors: mpsc::Receiver<DiscoveryError>,
}

/// A pluggable membership source.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Short scheme name, e.g. `nodes`.
    fn name(&self) -> &'static str;

    /// Start watching for membership changes.
    ///
    /// Every message on the entries channel is the complete current set.
    /// The backend keeps emitting until `shutdown` flips to true.
    async fn watch(&self, shutdown: watch::Receiver<bool>) -> DiscoveryResult<WatchChannels>;
}

/// Split a discovery URI into `(scheme, authority)`.
///
/// A URI without `://` defaults to the `nodes` scheme.
pub fn parse_uri(uri: &str) -> (&str, &str) {
    match uri.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("nodes", uri),
    }
}

/// Resolve a URI to a backend via the scheme registry.
///
/// `heartbeat` paces polling backends (file re-read, kv refresh).
pub fn backend_for_uri(uri: &str, heartbeat: Duration) -> DiscoveryResult<Box<dyn Backend>> {
    let (scheme, authority) = parse_uri(uri);
    match scheme {
        "nodes" => Ok(Box::new(NodesBackend::new(authority)?)),
        "file" => Ok(Box::new(FileBackend::new(authority, heartbeat))),
        "zk" | "etcd" | "consul" => Ok(Box::new(KvBackend::unbound(scheme, authority, heartbeat))),
        other => Err(DiscoveryError::UnsupportedScheme(other.to_string())),
    }
}

/// Capped exponential backoff used by watch loops: 1s, 2s, 4s, ... 30s.
pub(crate) fn backoff(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX).min(30);
    Duration::from_secs(secs)
}
