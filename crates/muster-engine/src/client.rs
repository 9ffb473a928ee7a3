//! The opaque wire-protocol seam between a session and its remote engine.
//!
//! The manager never speaks a concrete protocol above this trait. The
//! bollard adapter in [`crate::docker`] implements it for real engines;
//! tests substitute an in-memory mock.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::config::ContainerConfig;
use crate::container::{ContainerHealth, ContainerState};
use crate::error::EngineResult;
use crate::image::Image;

/// Identity and capacity reported by an engine's info probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineInfo {
    pub id: String,
    pub name: String,
    /// Declared CPU units.
    pub cpus: i64,
    /// Declared memory in bytes.
    pub memory: i64,
    pub labels: HashMap<String, String>,
    pub storage_driver: String,
    pub execution_driver: String,
    pub kernel_version: String,
    pub operating_system: String,
    /// Remote API version, `major.minor`.
    pub api_version: String,
}

/// One row of a container listing.
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
}

/// Full container state from an inspect call.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub names: Vec<String>,
    pub state: ContainerState,
    pub health: ContainerHealth,
    pub config: ContainerConfig,
}

/// A single event from the engine's event stream.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub container_id: String,
    /// Engine-reported status: `create`, `start`, `die`, `destroy`, ...
    pub status: String,
}

/// Remote engine operations the session depends on.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Probe engine identity, resources, and labels.
    async fn info(&self) -> EngineResult<EngineInfo>;

    /// List containers. `filter_ids` restricts the listing to the given
    /// engine-assigned ids.
    async fn list_containers(
        &self,
        all: bool,
        filter_ids: Option<&[String]>,
    ) -> EngineResult<Vec<ContainerSummary>>;

    /// Inspect one container.
    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails>;

    /// Create a container and return its engine-assigned id.
    async fn create_container(&self, name: &str, config: &ContainerConfig)
        -> EngineResult<String>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()>;

    /// List the engine's image inventory.
    async fn list_images(&self) -> EngineResult<Vec<Image>>;

    /// Relay the engine's event stream into `tx`, in source order, until
    /// the stream ends or `shutdown` flips. Returning `Ok` means the stream
    /// closed cleanly; the session reconnects with backoff either way.
    async fn events(
        &self,
        tx: mpsc::Sender<EngineEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> EngineResult<()>;
}
