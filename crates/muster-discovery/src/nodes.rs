//! Static node-list backend: `nodes://host1:2375,host2:2375`.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{Backend, DiscoveryResult, Entry, WatchChannels};

/// Fixed membership parsed once from the URI authority.
#[derive(Debug)]
pub struct NodesBackend {
    entries: Vec<Entry>,
}

impl NodesBackend {
    pub fn new(authority: &str) -> DiscoveryResult<Self> {
        let entries = Entry::parse_list(authority)?;
        Ok(Self { entries })
    }
}

#[async_trait]
impl Backend for NodesBackend {
    fn name(&self) -> &'static str {
        "nodes"
    }

    async fn watch(&self, _shutdown: watch::Receiver<bool>) -> DiscoveryResult<WatchChannels> {
        let (entries_tx, entries_rx) = mpsc::channel(1);
        let (_errors_tx, errors_rx) = mpsc::channel(1);

        debug!(count = self.entries.len(), "static membership emitted");
        // A static list never changes: emit the full set once and keep the
        // channel open so the consumer does not treat it as a backend death.
        let entries = self.entries.clone();
        tokio::spawn(async move {
            let _ = entries_tx.send(entries).await;
            entries_tx.closed().await;
        });

        Ok(WatchChannels {
            entries: entries_rx,
            errors: errors_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_full_set_once() {
        let backend = NodesBackend::new("10.0.0.1:2375,10.0.0.2:2375").unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let mut channels = backend.watch(shutdown).await.unwrap();

        let set = channels.entries.recv().await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].to_string(), "10.0.0.1:2375");
        assert_eq!(set[1].to_string(), "10.0.0.2:2375");

        // No further messages, but the channel is still open.
        let more =
            tokio::time::timeout(std::time::Duration::from_millis(50), channels.entries.recv())
                .await;
        assert!(more.is_err(), "static backend must not emit twice");
    }

    #[test]
    fn rejects_malformed_authority() {
        assert!(NodesBackend::new("10.0.0.1").is_err());
    }
}
