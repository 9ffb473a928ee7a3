//! File backend: `file:///etc/muster/cluster`.
//!
//! The file lists one `host:port` per line; blank lines and `#` comments are
//! ignored. The file is re-read on every poll tick and the full set is
//! emitted whenever the content changes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::{Backend, DiscoveryError, DiscoveryResult, Entry, WatchChannels};

#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileBackend {
    pub fn new(path: &str, poll_interval: Duration) -> Self {
        Self {
            path: PathBuf::from(path),
            poll_interval,
        }
    }

    async fn read_entries(path: &PathBuf) -> DiscoveryResult<Vec<Entry>> {
        let content = tokio::fs::read_to_string(path).await?;
        parse_file(&content)
    }
}

fn parse_file(content: &str) -> DiscoveryResult<Vec<Entry>> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(Entry::parse)
        .collect()
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn watch(&self, mut shutdown: watch::Receiver<bool>) -> DiscoveryResult<WatchChannels> {
        let (entries_tx, entries_rx) = mpsc::channel(4);
        let (errors_tx, errors_rx) = mpsc::channel(4);

        let path = self.path.clone();
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last: Option<Vec<Entry>> = None;
            loop {
                match Self::read_entries(&path).await {
                    Ok(entries) => {
                        if last.as_ref() != Some(&entries) {
                            debug!(path = %path.display(), count = entries.len(), "membership file changed");
                            if entries_tx.send(entries.clone()).await.is_err() {
                                break;
                            }
                            last = Some(entries);
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "membership file read failed");
                        let _ = errors_tx.try_send(e);
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_skips_comments_and_blanks() {
        let content = "\n# fleet\n10.0.0.1:2375\n10.0.0.2:2375 # spare\n\n";
        let entries = parse_file(content).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].to_string(), "10.0.0.2:2375");
    }

    #[test]
    fn parse_propagates_bad_lines() {
        assert!(parse_file("10.0.0.1:2375\nnot-an-address\n").is_err());
    }

    #[tokio::test]
    async fn emits_on_change_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.0.0.1:2375").unwrap();
        file.flush().unwrap();

        let backend = FileBackend::new(
            file.path().to_str().unwrap(),
            Duration::from_millis(20),
        );
        let (_tx, shutdown) = watch::channel(false);
        let mut channels = backend.watch(shutdown).await.unwrap();

        let first = channels.entries.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        // Unchanged content re-read: nothing new arrives.
        let silent =
            tokio::time::timeout(Duration::from_millis(80), channels.entries.recv()).await;
        assert!(silent.is_err());

        // Append a second node: the full new set is emitted.
        writeln!(file, "10.0.0.2:2375").unwrap();
        file.flush().unwrap();
        let second = tokio::time::timeout(Duration::from_millis(500), channels.entries.recv())
            .await
            .expect("change not picked up")
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn missing_file_reports_on_error_channel() {
        let backend = FileBackend::new("/nonexistent/muster-cluster", Duration::from_millis(20));
        let (_tx, shutdown) = watch::channel(false);
        let mut channels = backend.watch(shutdown).await.unwrap();

        let err = tokio::time::timeout(Duration::from_millis(500), channels.errors.recv())
            .await
            .expect("no error reported")
            .unwrap();
        assert!(matches!(err, DiscoveryError::Io(_)));
    }
}
