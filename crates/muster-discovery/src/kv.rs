//! Key/value coordination-store backend: `zk://`, `etcd://`, `consul://`.
//!
//! All three schemes share one discovery shape: engines register themselves
//! under a key prefix and the manager watches that prefix for the current
//! membership. The store itself is behind the [`KvStore`] trait so concrete
//! bindings plug in without changing the watch loop; [`MemoryStore`] backs
//! the tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::{backoff, Backend, DiscoveryError, DiscoveryResult, Entry, WatchChannels};

/// Minimal coordination-store surface needed for membership discovery.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// List all values stored under `prefix`. Each value is one
    /// `host:port` address.
    async fn list(&self, prefix: &str) -> DiscoveryResult<Vec<String>>;

    /// Wait until the tree under `prefix` may have changed, or until the
    /// timeout elapses. Polling stores simply sleep.
    async fn wait_for_change(&self, prefix: &str, timeout: Duration) -> DiscoveryResult<()>;
}

/// KV-backed discovery for one scheme (`zk`, `etcd`, `consul`).
pub struct KvBackend {
    scheme: &'static str,
    prefix: String,
    poll_interval: Duration,
    store: Option<Arc<dyn KvStore>>,
}

impl std::fmt::Debug for KvBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvBackend")
            .field("scheme", &self.scheme)
            .field("prefix", &self.prefix)
            .field("poll_interval", &self.poll_interval)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl KvBackend {
    /// Build a backend with a concrete store binding.
    pub fn new(
        scheme: &'static str,
        authority: &str,
        poll_interval: Duration,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let mut backend = Self::unbound(scheme, authority, poll_interval);
        backend.store = Some(store);
        backend
    }

    /// Build a backend without a store binding. Watching it reports
    /// `NotInitialized`; [`KvBackend::bind`] attaches the store.
    pub fn unbound(scheme: &str, authority: &str, poll_interval: Duration) -> Self {
        // `host:port/path/to/prefix`: everything after the first slash is
        // the watched key prefix.
        let prefix = match authority.split_once('/') {
            Some((_, path)) => format!("/{path}"),
            None => "/".to_string(),
        };
        let scheme = match scheme {
            "zk" => "zk",
            "consul" => "consul",
            _ => "etcd",
        };
        Self {
            scheme,
            prefix,
            poll_interval,
            store: None,
        }
    }

    /// Attach a concrete store binding.
    pub fn bind(&mut self, store: Arc<dyn KvStore>) {
        self.store = Some(store);
    }

    /// The key prefix watched for membership.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl Backend for KvBackend {
    fn name(&self) -> &'static str {
        self.scheme
    }

    async fn watch(&self, mut shutdown: watch::Receiver<bool>) -> DiscoveryResult<WatchChannels> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| DiscoveryError::NotInitialized(self.scheme.to_string()))?;

        let (entries_tx, entries_rx) = mpsc::channel(4);
        let (errors_tx, errors_rx) = mpsc::channel(4);
        let prefix = self.prefix.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last: Option<Vec<Entry>> = None;
            let mut failures: u32 = 0;
            loop {
                match list_entries(store.as_ref(), &prefix).await {
                    Ok(entries) => {
                        failures = 0;
                        if last.as_ref() != Some(&entries) {
                            debug!(%prefix, count = entries.len(), "kv membership changed");
                            if entries_tx.send(entries.clone()).await.is_err() {
                                break;
                            }
                            last = Some(entries);
                        }
                    }
                    Err(e) => {
                        warn!(%prefix, error = %e, "kv membership read failed");
                        let _ = errors_tx.try_send(e);
                        let delay = backoff(failures);
                        failures = failures.saturating_add(1);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue,
                            _ = shutdown.changed() => break,
                        }
                    }
                }

                tokio::select! {
                    _ = store.wait_for_change(&prefix, interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        });

        Ok(WatchChannels {
            entries: entries_rx,
            errors: errors_rx,
        })
    }
}

async fn list_entries(store: &dyn KvStore, prefix: &str) -> DiscoveryResult<Vec<Entry>> {
    let mut entries = store
        .list(prefix)
        .await?
        .iter()
        .map(|addr| Entry::parse(addr))
        .collect::<DiscoveryResult<Vec<_>>>()?;
    entries.sort();
    entries.dedup();
    Ok(entries)
}

/// In-memory [`KvStore`] used by tests and embedded setups.
#[derive(Default)]
pub struct MemoryStore {
    tree: Mutex<BTreeMap<String, String>>,
    changed: tokio::sync::Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: &str, value: &str) {
        self.tree.lock().await.insert(key.to_string(), value.to_string());
        self.changed.notify_waiters();
    }

    pub async fn delete(&self, key: &str) {
        self.tree.lock().await.remove(key);
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn list(&self, prefix: &str) -> DiscoveryResult<Vec<String>> {
        let tree = self.tree.lock().await;
        Ok(tree
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn wait_for_change(&self, _prefix: &str, timeout: Duration) -> DiscoveryResult<()> {
        let _ = tokio::time::timeout(timeout, self.changed.notified()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_split_extracts_prefix() {
        let backend = KvBackend::unbound("etcd", "10.0.0.1:2379/muster/nodes", Duration::from_secs(1));
        assert_eq!(backend.prefix(), "/muster/nodes");
        assert_eq!(backend.name(), "etcd");

        let bare = KvBackend::unbound("zk", "10.0.0.1:2181", Duration::from_secs(1));
        assert_eq!(bare.prefix(), "/");
        assert_eq!(bare.name(), "zk");
    }

    #[tokio::test]
    async fn unbound_backend_reports_not_initialized() {
        let backend = KvBackend::unbound("consul", "h:8500/x", Duration::from_secs(1));
        let (_tx, shutdown) = watch::channel(false);
        let err = backend.watch(shutdown).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn emits_full_set_on_every_change() {
        let store = Arc::new(MemoryStore::new());
        store.put("/muster/nodes/a", "10.0.0.1:2375").await;

        let backend = KvBackend::new(
            "etcd",
            "h:2379/muster/nodes",
            Duration::from_millis(20),
            store.clone(),
        );
        let (_tx, shutdown) = watch::channel(false);
        let mut channels = backend.watch(shutdown).await.unwrap();

        let first = channels.entries.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        store.put("/muster/nodes/b", "10.0.0.2:2375").await;
        let second = tokio::time::timeout(Duration::from_millis(500), channels.entries.recv())
            .await
            .expect("change not observed")
            .unwrap();
        // Full set, not a delta.
        assert_eq!(second.len(), 2);

        store.delete("/muster/nodes/a").await;
        let third = tokio::time::timeout(Duration::from_millis(500), channels.entries.recv())
            .await
            .expect("removal not observed")
            .unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].to_string(), "10.0.0.2:2375");
    }

    #[tokio::test]
    async fn keys_outside_prefix_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.put("/muster/nodes/a", "10.0.0.1:2375").await;
        store.put("/other/b", "10.9.9.9:2375").await;

        let backend = KvBackend::new(
            "consul",
            "h:8500/muster/nodes",
            Duration::from_millis(20),
            store,
        );
        let (_tx, shutdown) = watch::channel(false);
        let mut channels = backend.watch(shutdown).await.unwrap();

        let set = channels.entries.recv().await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].to_string(), "10.0.0.1:2375");
    }
}
