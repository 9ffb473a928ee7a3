//! The per-engine session: connection lifecycle, inventory refresh, and
//! event relay.
//!
//! One `Engine` exists per discovered address. After [`Engine::connect`]
//! probes identity and resources, [`Engine::start`] spawns two background
//! tasks: a periodic refresh loop and an event pump that relays the remote
//! event stream in source order, reconnecting with capped backoff. The
//! session is the single writer of its own inventory; everything else reads
//! snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ContainerDetails, EngineClient, EngineEvent, EngineInfo};
use crate::config::ContainerConfig;
use crate::container::{Container, Containers};
use crate::error::{EngineError, EngineResult};
use crate::image::Image;

/// Oldest remote API the manager will talk to.
const MIN_API_VERSION: &str = "1.12";

/// Event statuses that drop a container from the inventory instead of
/// triggering a targeted refresh.
const REMOVAL_STATUSES: &[&str] = &["destroy", "delete"];

/// Global placement sequence, used as the "most recently engaged" tiebreak.
static ENGAGEMENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Disconnected,
    Connecting,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Operator-tunable session parameters.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Refresh loop interval; also paces the staleness check.
    pub heartbeat: Duration,
    /// Per-remote-call deadline.
    pub refresh_timeout: Duration,
    /// Consecutive refresh failures before the engine turns unhealthy.
    pub failure_threshold: u32,
    /// Extra capacity granted on top of declared resources.
    pub overcommit_ratio: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(25),
            refresh_timeout: Duration::from_secs(30),
            failure_threshold: 3,
            overcommit_ratio: 0.05,
        }
    }
}

/// An engine event enriched with the identity of the session that saw it.
#[derive(Debug, Clone)]
pub struct Event {
    pub engine_id: String,
    pub engine_name: String,
    pub engine_addr: String,
    pub container_id: String,
    pub status: String,
}

/// Read-only copy of an engine handed to the scheduler.
///
/// Built under one lock acquisition; filters and strategies never touch the
/// live session.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub id: String,
    pub name: String,
    pub addr: String,
    pub healthy: bool,
    pub labels: HashMap<String, String>,
    pub total_cpus: i64,
    pub total_memory: i64,
    pub used_cpus: i64,
    pub used_memory: i64,
    /// Placement sequence number of the last create on this engine.
    pub engaged_at: u64,
    pub containers: Containers,
    pub images: Vec<Image>,
}

struct EngineState {
    id: String,
    name: String,
    cpus: i64,
    memory: i64,
    labels: HashMap<String, String>,
    status: EngineStatus,
    failures: u32,
    last_heartbeat: Instant,
    engaged_at: u64,
    containers: HashMap<String, Container>,
    images: Vec<Image>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("addr", &self.addr).finish()
    }
}

/// Manager-side session for one remote container host.
pub struct Engine {
    addr: String,
    options: EngineOptions,
    client: OnceLock<Arc<dyn EngineClient>>,
    state: RwLock<EngineState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    pub fn new(addr: impl Into<String>, options: EngineOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            addr: addr.into(),
            options,
            client: OnceLock::new(),
            state: RwLock::new(EngineState {
                id: String::new(),
                name: String::new(),
                cpus: 0,
                memory: 0,
                labels: HashMap::new(),
                status: EngineStatus::Disconnected,
                failures: 0,
                last_heartbeat: Instant::now(),
                engaged_at: 0,
                containers: HashMap::new(),
                images: Vec::new(),
            }),
            shutdown_tx,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open the session: probe `info`, capture identity and resources, and
    /// pull the initial inventory. Fails on transport errors and on remote
    /// API versions older than the supported minimum.
    pub async fn connect(&self, client: Arc<dyn EngineClient>) -> EngineResult<()> {
        {
            let mut state = self.state.write().await;
            state.status = EngineStatus::Connecting;
        }
        let client = self.client.get_or_init(|| client).clone();

        let info = match self.with_timeout(client.info()).await {
            Ok(info) => info,
            Err(e) => {
                self.state.write().await.status = EngineStatus::Disconnected;
                return Err(e);
            }
        };
        if !version_supported(&info.api_version, MIN_API_VERSION) {
            self.state.write().await.status = EngineStatus::Disconnected;
            return Err(EngineError::VersionIncompatible {
                addr: self.addr.clone(),
                version: info.api_version,
                minimum: MIN_API_VERSION.to_string(),
            });
        }

        self.apply_info(info).await;
        self.refresh_all_containers().await?;
        self.refresh_images().await?;

        let id = self.id().await;
        info!(addr = %self.addr, id = %id, "engine connected");
        Ok(())
    }

    async fn apply_info(&self, info: EngineInfo) {
        let mut labels = info.labels;
        // Synthetic labels constraints can reference alongside operator ones.
        labels.insert("storagedriver".to_string(), info.storage_driver);
        labels.insert("executiondriver".to_string(), info.execution_driver);
        labels.insert("kernelversion".to_string(), info.kernel_version);
        labels.insert("operatingsystem".to_string(), info.operating_system);

        let mut state = self.state.write().await;
        state.id = info.id;
        state.name = if info.name.is_empty() {
            self.addr.clone()
        } else {
            info.name
        };
        state.cpus = info.cpus;
        state.memory = info.memory;
        state.labels = labels;
        state.status = EngineStatus::Healthy;
        state.failures = 0;
        state.last_heartbeat = Instant::now();
    }

    /// Spawn the refresh loop and the event pump. Events reach `event_tx`
    /// in the order the engine produced them.
    pub fn start(self: &Arc<Self>, event_tx: mpsc::Sender<Event>) {
        // Refresh loop.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = this.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(this.options.heartbeat) => {
                        this.check_staleness().await;
                        if let Err(e) = this.refresh_all_containers().await {
                            warn!(addr = %this.addr, error = %e, "container refresh failed");
                        }
                        if let Err(e) = this.refresh_images().await {
                            debug!(addr = %this.addr, error = %e, "image refresh failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        // Event stream with reconnect, relayed through a single pump task
        // so source order survives.
        let (raw_tx, mut raw_rx) = mpsc::channel::<EngineEvent>(64);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = this.shutdown_tx.subscribe();
            let mut attempt: u32 = 0;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let Some(client) = this.client.get().cloned() else {
                    break;
                };
                match client.events(raw_tx.clone(), shutdown.clone()).await {
                    Ok(()) => attempt = 0,
                    Err(e) => {
                        warn!(addr = %this.addr, error = %e, "event stream failed");
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                let delay = reconnect_backoff(attempt);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                this.handle_event(event, &event_tx).await;
            }
        });
    }

    /// Stop the background tasks. The inventory stays readable.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether [`Engine::stop`] has been called. A stopped session never
    /// refreshes again; reconnection means building a fresh `Engine`.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn handle_event(&self, event: EngineEvent, out: &mpsc::Sender<Event>) {
        {
            let mut state = self.state.write().await;
            state.last_heartbeat = Instant::now();
        }

        if REMOVAL_STATUSES.contains(&event.status.as_str()) {
            let mut state = self.state.write().await;
            state.containers.remove(&event.container_id);
        } else if let Err(e) = self.refresh_container(&event.container_id).await {
            debug!(addr = %self.addr, container = %event.container_id, error = %e,
                "post-event refresh failed");
        }

        let (engine_id, engine_name) = {
            let state = self.state.read().await;
            (state.id.clone(), state.name.clone())
        };
        let _ = out
            .send(Event {
                engine_id,
                engine_name,
                engine_addr: self.addr.clone(),
                container_id: event.container_id,
                status: event.status,
            })
            .await;
    }

    /// Re-list and re-inspect the full container inventory.
    pub async fn refresh_all_containers(&self) -> EngineResult<()> {
        let client = self.client()?;
        let summaries = match self.with_timeout(client.list_containers(true, None)).await {
            Ok(s) => s,
            Err(e) => {
                self.record_failure().await;
                return Err(e);
            }
        };

        let (engine_id, engine_name) = {
            let state = self.state.read().await;
            (state.id.clone(), state.name.clone())
        };

        let mut containers = HashMap::with_capacity(summaries.len());
        for summary in summaries {
            match self.with_timeout(client.inspect_container(&summary.id)).await {
                Ok(details) => {
                    let container =
                        self.materialize(details, &engine_id, &engine_name);
                    containers.insert(container.id.clone(), container);
                }
                // The container disappeared between list and inspect.
                Err(EngineError::NoSuchContainer(_)) => continue,
                Err(e) => {
                    self.record_failure().await;
                    return Err(e);
                }
            }
        }

        {
            let mut state = self.state.write().await;
            // Preserve registry-side swarm-id annotations across refreshes.
            for (id, container) in containers.iter_mut() {
                if container.swarm_id().is_empty() {
                    if let Some(previous) = state.containers.get(id) {
                        let previous_swarm_id = previous.swarm_id();
                        if !previous_swarm_id.is_empty() {
                            container.config.set_swarm_id(&previous_swarm_id);
                        }
                    }
                }
            }
            state.containers = containers;
        }
        self.record_success().await;
        Ok(())
    }

    /// Targeted refresh of a known-dirty subset of the inventory.
    pub async fn refresh_containers(&self, ids: &[String]) -> EngineResult<()> {
        let client = self.client()?;
        let summaries = match self
            .with_timeout(client.list_containers(true, Some(ids)))
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.record_failure().await;
                return Err(e);
            }
        };

        let listed: std::collections::HashSet<&str> =
            summaries.iter().map(|s| s.id.as_str()).collect();
        for id in ids {
            if listed.contains(id.as_str()) {
                self.refresh_container(id).await?;
            } else {
                // Dirty id the engine no longer reports.
                let mut state = self.state.write().await;
                state.containers.remove(id);
            }
        }
        Ok(())
    }

    /// Targeted refresh of one container. Returns the refreshed container,
    /// or `None` if the engine no longer knows it.
    pub async fn refresh_container(&self, id: &str) -> EngineResult<Option<Container>> {
        let client = self.client()?;
        match self.with_timeout(client.inspect_container(id)).await {
            Ok(details) => {
                let (engine_id, engine_name) = {
                    let state = self.state.read().await;
                    (state.id.clone(), state.name.clone())
                };
                let mut container = self.materialize(details, &engine_id, &engine_name);
                let mut state = self.state.write().await;
                if container.swarm_id().is_empty() {
                    if let Some(previous) = state.containers.get(&container.id) {
                        let previous_swarm_id = previous.swarm_id();
                        if !previous_swarm_id.is_empty() {
                            container.config.set_swarm_id(&previous_swarm_id);
                        }
                    }
                }
                state.containers
                    .insert(container.id.clone(), container.clone());
                drop(state);
                self.record_success().await;
                Ok(Some(container))
            }
            Err(EngineError::NoSuchContainer(_)) => {
                let mut state = self.state.write().await;
                state.containers.remove(id);
                Ok(None)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    /// Refresh the image inventory.
    pub async fn refresh_images(&self) -> EngineResult<()> {
        let client = self.client()?;
        let mut images = self.with_timeout(client.list_images()).await?;
        let mut state = self.state.write().await;
        for image in images.iter_mut() {
            image.engine_id = state.id.clone();
        }
        state.images = images;
        Ok(())
    }

    /// Create a container on this engine and return it after a targeted
    /// refresh.
    pub async fn create(
        &self,
        config: &ContainerConfig,
        name: Option<&str>,
    ) -> EngineResult<Container> {
        let client = self.client()?;
        let id = self
            .with_timeout(client.create_container(name.unwrap_or(""), config))
            .await
            .map_err(|e| self.wrap_remote(e))?;

        {
            let mut state = self.state.write().await;
            state.engaged_at = ENGAGEMENT_SEQ.fetch_add(1, Ordering::Relaxed);
        }

        match self.refresh_container(&id).await? {
            Some(container) => Ok(container),
            None => Err(EngineError::NoSuchContainer(id)),
        }
    }

    /// Remove a container remotely and purge it from the inventory.
    pub async fn destroy(&self, id: &str, force: bool) -> EngineResult<()> {
        let client = self.client()?;
        self.with_timeout(client.remove_container(id, force))
            .await
            .map_err(|e| self.wrap_remote(e))?;
        let mut state = self.state.write().await;
        state.containers.remove(id);
        Ok(())
    }

    /// Drop a container from the local inventory without touching the
    /// remote engine. Used when a container is re-placed away from an
    /// unreachable engine.
    pub async fn purge_container(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        state.containers.remove(id).is_some()
    }

    /// Annotate a registry-side container with its swarm id. Returns false
    /// when the container is not in the inventory.
    pub async fn set_container_swarm_id(&self, container_id: &str, swarm_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.containers.get_mut(container_id) {
            Some(container) => {
                container.config.set_swarm_id(swarm_id);
                true
            }
            None => false,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub async fn id(&self) -> String {
        self.state.read().await.id.clone()
    }

    pub async fn name(&self) -> String {
        self.state.read().await.name.clone()
    }

    pub async fn status(&self) -> EngineStatus {
        self.state.read().await.status
    }

    pub async fn is_healthy(&self) -> bool {
        self.state.read().await.status == EngineStatus::Healthy
    }

    /// Mark the engine unhealthy without waiting for refresh failures.
    pub async fn mark_unhealthy(&self) {
        let mut state = self.state.write().await;
        state.status = EngineStatus::Unhealthy;
    }

    pub async fn containers(&self) -> Containers {
        let state = self.state.read().await;
        state.containers.values().cloned().collect()
    }

    pub async fn container(&self, id: &str) -> Option<Container> {
        self.state.read().await.containers.get(id).cloned()
    }

    pub async fn images(&self) -> Vec<Image> {
        self.state.read().await.images.clone()
    }

    /// Build the read-only copy the scheduler filters over.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.read().await;
        let used_cpus = state.containers.values().map(|c| c.config.cpu_shares).sum();
        let used_memory = state.containers.values().map(|c| c.config.memory).sum();
        EngineSnapshot {
            id: state.id.clone(),
            name: state.name.clone(),
            addr: self.addr.clone(),
            healthy: state.status == EngineStatus::Healthy,
            labels: state.labels.clone(),
            total_cpus: state.cpus,
            total_memory: state.memory,
            used_cpus,
            used_memory,
            engaged_at: state.engaged_at,
            containers: state.containers.values().cloned().collect(),
            images: state.images.clone(),
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn client(&self) -> EngineResult<Arc<dyn EngineClient>> {
        self.client.get().cloned().ok_or(EngineError::NotConnected)
    }

    fn materialize(
        &self,
        details: ContainerDetails,
        engine_id: &str,
        engine_name: &str,
    ) -> Container {
        Container {
            id: details.id,
            names: details.names,
            state: details.state,
            health: details.health,
            config: details.config,
            engine_id: engine_id.to_string(),
            engine_name: engine_name.to_string(),
            engine_addr: self.addr.clone(),
        }
    }

    fn wrap_remote(&self, e: EngineError) -> EngineError {
        match e {
            EngineError::Transport(message) | EngineError::Remote { message, .. } => {
                EngineError::Remote {
                    engine: self.addr.clone(),
                    message,
                }
            }
            other => other,
        }
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        match tokio::time::timeout(self.options.refresh_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.options.refresh_timeout)),
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.failures = state.failures.saturating_add(1);
        if state.failures >= self.options.failure_threshold
            && state.status == EngineStatus::Healthy
        {
            warn!(addr = %self.addr, failures = state.failures, "engine marked unhealthy");
            state.status = EngineStatus::Unhealthy;
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.failures = 0;
        state.last_heartbeat = Instant::now();
        if state.status == EngineStatus::Unhealthy {
            info!(addr = %self.addr, "engine recovered");
        }
        if state.status != EngineStatus::Disconnected {
            state.status = EngineStatus::Healthy;
        }
    }

    async fn check_staleness(&self) {
        let mut state = self.state.write().await;
        if state.status == EngineStatus::Healthy
            && state.last_heartbeat.elapsed() > self.options.heartbeat * 2
        {
            warn!(addr = %self.addr, "no heartbeat within twice the interval, engine unhealthy");
            state.status = EngineStatus::Unhealthy;
        }
    }
}

/// `major.minor` comparison; unparsable versions are accepted.
fn version_supported(version: &str, minimum: &str) -> bool {
    fn parse(v: &str) -> Option<(u64, u64)> {
        let (major, minor) = v.split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }
    match (parse(version), parse(minimum)) {
        (Some(v), Some(m)) => v >= m,
        _ => true,
    }
}

fn reconnect_backoff(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX).min(30);
    Duration::from_secs(secs)
}
