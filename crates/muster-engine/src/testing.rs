//! In-memory [`EngineClient`] for tests.
//!
//! Behaves like a tiny engine: containers live in a map, created names are
//! honored, and events are injected by hand. `set_fail(true)` makes every
//! remote call return a transport error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use crate::client::{
    ContainerDetails, ContainerSummary, EngineClient, EngineEvent, EngineInfo,
};
use crate::config::ContainerConfig;
use crate::error::{EngineError, EngineResult};
use crate::image::Image;

pub struct MockEngineClient {
    info: Mutex<EngineInfo>,
    containers: Mutex<HashMap<String, ContainerDetails>>,
    images: Mutex<Vec<Image>>,
    fail: AtomicBool,
    create_seq: AtomicU64,
    event_tx: Mutex<Option<mpsc::Sender<EngineEvent>>>,
}

impl MockEngineClient {
    pub fn new(id: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(EngineInfo {
                id: id.to_string(),
                name: name.to_string(),
                cpus: 4,
                memory: 8 * 1024 * 1024 * 1024,
                labels: HashMap::new(),
                storage_driver: "overlay2".to_string(),
                execution_driver: "native".to_string(),
                kernel_version: "6.8.0".to_string(),
                operating_system: "linux".to_string(),
                api_version: "1.44".to_string(),
            }),
            containers: Mutex::new(HashMap::new()),
            images: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            create_seq: AtomicU64::new(1),
            event_tx: Mutex::new(None),
        })
    }

    pub async fn set_labels(&self, labels: HashMap<String, String>) {
        self.info.lock().await.labels = labels;
    }

    pub async fn set_resources(&self, cpus: i64, memory: i64) {
        let mut info = self.info.lock().await;
        info.cpus = cpus;
        info.memory = memory;
    }

    pub async fn set_api_version(&self, version: &str) {
        self.info.lock().await.api_version = version.to_string();
    }

    pub async fn add_container(&self, details: ContainerDetails) {
        self.containers
            .lock()
            .await
            .insert(details.id.clone(), details);
    }

    pub async fn add_image(&self, image: Image) {
        self.images.lock().await.push(image);
    }

    pub async fn remove(&self, id: &str) {
        self.containers.lock().await.remove(id);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Push an event down the stream captured by [`EngineClient::events`].
    /// Waits briefly for the stream to be attached.
    pub async fn inject_event(&self, container_id: &str, status: &str) {
        for _ in 0..100 {
            if let Some(tx) = self.event_tx.lock().await.clone() {
                let _ = tx
                    .send(EngineEvent {
                        container_id: container_id.to_string(),
                        status: status.to_string(),
                    })
                    .await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no event stream attached");
    }

    fn check_fail(&self) -> EngineResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(EngineError::Transport("mock transport failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EngineClient for MockEngineClient {
    async fn info(&self) -> EngineResult<EngineInfo> {
        self.check_fail()?;
        Ok(self.info.lock().await.clone())
    }

    async fn list_containers(
        &self,
        _all: bool,
        filter_ids: Option<&[String]>,
    ) -> EngineResult<Vec<ContainerSummary>> {
        self.check_fail()?;
        let containers = self.containers.lock().await;
        Ok(containers
            .values()
            .filter(|c| filter_ids.map_or(true, |ids| ids.contains(&c.id)))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: c.names.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails> {
        self.check_fail()?;
        self.containers
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchContainer(id.to_string()))
    }

    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> EngineResult<String> {
        self.check_fail()?;
        let seq = self.create_seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-{seq:016x}");
        let names = if name.is_empty() {
            vec![format!("/{id}")]
        } else {
            vec![format!("/{name}")]
        };
        self.containers.lock().await.insert(
            id.clone(),
            ContainerDetails {
                id: id.clone(),
                names,
                config: config.clone(),
                ..ContainerDetails::default()
            },
        );
        Ok(id)
    }

    async fn remove_container(&self, id: &str, _force: bool) -> EngineResult<()> {
        self.check_fail()?;
        self.containers
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NoSuchContainer(id.to_string()))
    }

    async fn list_images(&self) -> EngineResult<Vec<Image>> {
        self.check_fail()?;
        Ok(self.images.lock().await.clone())
    }

    async fn events(
        &self,
        tx: mpsc::Sender<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> EngineResult<()> {
        *self.event_tx.lock().await = Some(tx);
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            if shutdown.changed().await.is_err() {
                return Ok(());
            }
        }
    }
}
