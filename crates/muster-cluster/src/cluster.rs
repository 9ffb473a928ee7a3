//! The cluster coordinator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use muster_discovery::Entry;
use muster_engine::{
    Container, ContainerConfig, Containers, Engine, EngineClient, EngineOptions,
    EngineSnapshot, Event, Image,
};
use muster_scheduler::Scheduler;
use muster_store::{PlacedContainer, PlacementStore};

use crate::error::{ClusterError, ClusterResult};

/// Builds a wire client for an engine address. The concrete protocol stays
/// behind [`EngineClient`]; tests plug in mocks here.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, addr: &str) -> ClusterResult<Arc<dyn EngineClient>>;
}

/// Operator-tunable coordinator parameters.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub engine: EngineOptions,
    /// Deadline for the initial connect to a newly discovered engine.
    pub dial_timeout: Duration,
    /// Deadline for computing one placement decision.
    pub placement_timeout: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            dial_timeout: Duration::from_secs(10),
            placement_timeout: Duration::from_secs(30),
        }
    }
}

/// Coordinates engines, containers, placement, and events for one fleet.
pub struct Cluster {
    options: ClusterOptions,
    scheduler: Scheduler,
    store: PlacementStore,
    factory: Arc<dyn ClientFactory>,
    /// engine id → session.
    engines: RwLock<HashMap<String, Arc<Engine>>>,
    /// Placements whose container cannot currently be found on a healthy
    /// engine.
    orphaned: RwLock<HashSet<String>>,
    /// Orphans seen by the previous reconcile pass; rescheduled on the
    /// next pass so a slow startup does not trigger spurious re-placement.
    reschedule_candidates: Mutex<HashSet<String>>,
    handlers: RwLock<Vec<mpsc::Sender<Event>>>,
    event_tx: mpsc::Sender<Event>,
    event_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Cluster {
    pub fn new(
        options: ClusterOptions,
        scheduler: Scheduler,
        store: PlacementStore,
        factory: Arc<dyn ClientFactory>,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            options,
            scheduler,
            store,
            factory,
            engines: RwLock::new(HashMap::new()),
            orphaned: RwLock::new(HashSet::new()),
            reschedule_candidates: Mutex::new(HashSet::new()),
            handlers: RwLock::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown_tx,
        })
    }

    /// Spawn the background loops: membership consumption, the event pump,
    /// and the reconcile watchdog.
    pub async fn start(self: &Arc<Self>, mut membership: mpsc::Receiver<Vec<Entry>>) {
        // Event pump: single consumer keeps per-engine source order.
        if let Some(mut event_rx) = self.event_rx.lock().await.take() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    this.handle_event(event).await;
                }
            });
        }

        // Membership loop.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = this.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    entries = membership.recv() => match entries {
                        Some(entries) => this.apply_membership(entries).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });

        // Reconcile watchdog.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = this.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(this.options.engine.heartbeat) => {
                        this.reconcile_placements().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Stop background loops and every engine session.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let engines = self.engines.read().await;
        for engine in engines.values() {
            engine.stop();
        }
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Bring the registry in line with a full membership set.
    pub async fn apply_membership(&self, entries: Vec<Entry>) {
        let desired: HashSet<String> = entries.iter().map(|e| e.to_string()).collect();
        // A stopped session does not count as present: if discovery reports
        // its address again, a fresh session replaces it.
        let current: HashMap<String, String> = {
            let engines = self.engines.read().await;
            engines
                .iter()
                .filter(|(_, engine)| !engine.is_stopped())
                .map(|(id, engine)| (engine.addr().to_string(), id.clone()))
                .collect()
        };

        let mut work = Vec::new();
        for addr in desired.iter().filter(|a| !current.contains_key(*a)) {
            let addr = addr.clone();
            work.push(async move {
                if let Err(e) = self.add_engine(&addr).await {
                    warn!(%addr, error = %e, "failed to add engine");
                }
            });
        }
        join_all(work).await;

        for (addr, _) in current.iter().filter(|(a, _)| !desired.contains(*a)) {
            self.remove_engine(addr).await;
        }
    }

    /// Connect to a newly discovered address and register the session.
    pub async fn add_engine(&self, addr: &str) -> ClusterResult<Arc<Engine>> {
        let client = self.factory.client_for(addr)?;
        let engine = Arc::new(Engine::new(addr, self.options.engine.clone()));

        match tokio::time::timeout(self.options.dial_timeout, engine.connect(client)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(muster_engine::EngineError::Timeout(self.options.dial_timeout).into())
            }
        }

        self.register_engine(engine).await
    }

    /// Register an already-connected session.
    pub async fn register_engine(&self, engine: Arc<Engine>) -> ClusterResult<Arc<Engine>> {
        if !engine.is_healthy().await {
            return Err(ClusterError::NotConnected);
        }
        let id = engine.id().await;
        {
            let mut engines = self.engines.write().await;
            match engines.get(&id) {
                Some(existing) if !existing.is_stopped() => {
                    return Err(ClusterError::AlreadyRegistered)
                }
                // A stopped session under the same id is a comeback; the
                // fresh session supersedes its stale inventory.
                _ => {}
            }
            engines.insert(id.clone(), Arc::clone(&engine));
        }

        engine.start(self.event_tx.clone());
        self.reconcile_engine(&engine).await;
        info!(%id, addr = %engine.addr(), "engine registered");
        Ok(engine)
    }

    /// Handle discovery evicting an address. The engine is destroyed only
    /// when it hosts nothing; otherwise it stays, unhealthy, and its
    /// placements become reschedule candidates.
    async fn remove_engine(&self, addr: &str) {
        let found = {
            let engines = self.engines.read().await;
            engines
                .iter()
                .find(|(_, e)| e.addr() == addr)
                .map(|(id, e)| (id.clone(), Arc::clone(e)))
        };
        let Some((id, engine)) = found else {
            return;
        };

        engine.stop();
        let containers = engine.containers().await;
        if containers.is_empty() {
            self.engines.write().await.remove(&id);
            info!(%id, %addr, "engine removed");
            return;
        }

        engine.mark_unhealthy().await;
        let mut orphaned = self.orphaned.write().await;
        for container in containers.iter() {
            let swarm_id = container.swarm_id();
            if !swarm_id.is_empty() {
                orphaned.insert(swarm_id);
            }
        }
        warn!(%id, %addr, containers = containers.len(),
            "engine evicted while hosting containers, marked unhealthy");
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Register an event handler; every engine event fans out to it after
    /// the registry has been refreshed.
    pub async fn subscribe_events(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(64);
        self.handlers.write().await.push(tx);
        rx
    }

    async fn handle_event(&self, event: Event) {
        // The session already did the targeted refresh; pick up swarm-id
        // assignment for containers that appeared outside the manager.
        let engine = {
            let engines = self.engines.read().await;
            engines.get(&event.engine_id).cloned()
        };
        if let Some(engine) = engine {
            self.reconcile_engine(&engine).await;
        }

        let mut handlers = self.handlers.write().await;
        handlers.retain(|handler| match handler.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(container = %event.container_id, "event handler lagging, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    // ── Placement ───────────────────────────────────────────────────

    /// Place a container request on the best engine, persist the mapping,
    /// and return the created container.
    pub async fn deploy(
        &self,
        config: ContainerConfig,
        name: Option<&str>,
    ) -> ClusterResult<Container> {
        let mut config = ContainerConfig::build(config);
        config.validate()?;

        let swarm_id = generate_swarm_id();
        config.set_swarm_id(&swarm_id);
        if let Some(name) = name {
            config.set_original_name(name);
        }

        let (chosen, engine) = self.place(&config).await?;
        let container = engine.create(&config, name).await?;
        self.store.put(&PlacedContainer {
            swarm_id: swarm_id.clone(),
            engine_id: chosen.id,
            container_id: container.id.clone(),
            name: name.map(str::to_string),
            config,
        })?;
        debug!(%swarm_id, container = %container.id, engine = %container.engine_name,
            "container deployed");
        Ok(container)
    }

    /// Destroy a container wherever it lives and forget its placement.
    pub async fn destroy(&self, container: &Container, force: bool) -> ClusterResult<()> {
        let engine = {
            let engines = self.engines.read().await;
            engines.get(&container.engine_id).cloned()
        }
        .ok_or_else(|| ClusterError::EngineNotFound(container.engine_id.clone()))?;

        engine.destroy(&container.id, force).await?;
        let swarm_id = container.swarm_id();
        if !swarm_id.is_empty() {
            self.store.remove(&swarm_id)?;
            self.orphaned.write().await.remove(&swarm_id);
        }
        Ok(())
    }

    // ── Lookups ─────────────────────────────────────────────────────

    /// All containers known to the registry.
    pub async fn containers(&self) -> Containers {
        let engines: Vec<Arc<Engine>> = {
            let engines = self.engines.read().await;
            engines.values().cloned().collect()
        };
        let mut all = Containers::default();
        for engine in engines {
            for container in engine.containers().await {
                all.push(container);
            }
        }
        all
    }

    /// Resolve one container by id, swarm id, name, or prefix. Ambiguity
    /// resolves to `None`.
    pub async fn container(&self, id_or_name: &str) -> Option<Container> {
        self.containers().await.get(id_or_name).cloned()
    }

    /// All images known to the registry.
    pub async fn images(&self) -> Vec<Image> {
        let engines: Vec<Arc<Engine>> = {
            let engines = self.engines.read().await;
            engines.values().cloned().collect()
        };
        let mut all = Vec::new();
        for engine in engines {
            all.extend(engine.images().await);
        }
        all
    }

    /// Resolve an image reference anywhere in the fleet.
    pub async fn image(&self, reference: &str) -> Option<Image> {
        self.images()
            .await
            .into_iter()
            .find(|img| img.match_ref(reference, true))
    }

    /// All engine sessions.
    pub async fn engines(&self) -> Vec<Arc<Engine>> {
        self.engines.read().await.values().cloned().collect()
    }

    /// Find an engine session by address.
    pub async fn engine(&self, addr: &str) -> Option<Arc<Engine>> {
        let engines = self.engines.read().await;
        engines.values().find(|e| e.addr() == addr).cloned()
    }

    /// Number of currently healthy engines.
    pub async fn healthy_engine_count(&self) -> usize {
        let engines: Vec<Arc<Engine>> = {
            let engines = self.engines.read().await;
            engines.values().cloned().collect()
        };
        let mut healthy = 0;
        for engine in engines {
            if engine.is_healthy().await {
                healthy += 1;
            }
        }
        healthy
    }

    /// Swarm ids currently known to be orphaned.
    pub async fn orphaned_placements(&self) -> Vec<String> {
        let orphaned = self.orphaned.read().await;
        let mut ids: Vec<String> = orphaned.iter().cloned().collect();
        ids.sort();
        ids
    }

    // ── Reconciliation ──────────────────────────────────────────────

    /// Assign swarm ids to containers that appeared outside the manager
    /// and keep the store's engine mapping current.
    async fn reconcile_engine(&self, engine: &Arc<Engine>) {
        let engine_id = engine.id().await;
        for container in engine.containers().await {
            let swarm_id = container.swarm_id();
            if !swarm_id.is_empty() {
                continue;
            }

            match self.store.find_by_container(&container.id) {
                Ok(Some(mut placed)) => {
                    // Known container resurfacing, possibly on a new engine.
                    debug!(swarm_id = %placed.swarm_id, container = %container.id,
                        "restored placement mapping");
                    engine
                        .set_container_swarm_id(&container.id, &placed.swarm_id)
                        .await;
                    if placed.engine_id != engine_id {
                        placed.engine_id = engine_id.clone();
                        if let Err(e) = self.store.put(&placed) {
                            warn!(error = %e, "failed to update placement");
                        }
                    }
                    self.orphaned.write().await.remove(&placed.swarm_id);
                }
                Ok(None) => {
                    let swarm_id = generate_swarm_id();
                    debug!(%swarm_id, container = %container.id, "assigned swarm id");
                    engine.set_container_swarm_id(&container.id, &swarm_id).await;
                    let mut config = container.config.clone();
                    config.set_swarm_id(&swarm_id);
                    let placed = PlacedContainer {
                        swarm_id,
                        engine_id: engine_id.clone(),
                        container_id: container.id.clone(),
                        name: container
                            .names
                            .first()
                            .map(|n| n.trim_start_matches('/').to_string()),
                        config,
                    };
                    if let Err(e) = self.store.put(&placed) {
                        warn!(error = %e, "failed to persist placement");
                    }
                }
                Err(e) => warn!(error = %e, "placement lookup failed"),
            }
        }
    }

    /// Mark placements without a live container as orphaned; re-place the
    /// ones carrying an `on-node-failure` policy once they have been
    /// orphaned for a full pass.
    pub async fn reconcile_placements(&self) {
        let placements = match self.store.all() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "placement scan failed");
                return;
            }
        };

        let engines: Vec<Arc<Engine>> = {
            let engines = self.engines.read().await;
            engines.values().cloned().collect()
        };
        let mut live = HashSet::new();
        for engine in &engines {
            if !engine.is_healthy().await {
                continue;
            }
            for container in engine.containers().await {
                live.insert(container.id.clone());
            }
        }

        {
            let mut orphaned = self.orphaned.write().await;
            for placement in &placements {
                if live.contains(&placement.container_id) {
                    orphaned.remove(&placement.swarm_id);
                } else if orphaned.insert(placement.swarm_id.clone()) {
                    info!(swarm_id = %placement.swarm_id, "placement orphaned");
                }
            }
        }

        // Reschedule orphans seen by the previous pass too; fresh orphans
        // wait one pass so transient startup gaps settle first.
        let due: Vec<PlacedContainer> = {
            let mut candidates = self.reschedule_candidates.lock().await;
            let orphaned = self.orphaned.read().await;
            let due = placements
                .iter()
                .filter(|p| {
                    orphaned.contains(&p.swarm_id)
                        && candidates.contains(&p.swarm_id)
                        && p.config.has_reschedule_policy("on-node-failure")
                })
                .cloned()
                .collect();
            *candidates = orphaned.clone();
            due
        };

        for placement in due {
            if let Err(e) = self.reschedule(&placement).await {
                warn!(swarm_id = %placement.swarm_id, error = %e, "reschedule failed");
            }
        }
    }

    /// Re-place one orphaned container, preserving its swarm id and
    /// original name.
    async fn reschedule(&self, placement: &PlacedContainer) -> ClusterResult<()> {
        let config = placement.config.clone();
        let name = config.original_name().or_else(|| placement.name.clone());

        let (chosen, engine) = self.place(&config).await?;
        let container = engine.create(&config, name.as_deref()).await?;

        // The stale copy on the failed engine must not shadow the new one.
        let old_engine = {
            let engines = self.engines.read().await;
            engines.get(&placement.engine_id).cloned()
        };
        if let Some(old_engine) = old_engine {
            old_engine.purge_container(&placement.container_id).await;
        }

        self.store.put(&PlacedContainer {
            swarm_id: placement.swarm_id.clone(),
            engine_id: chosen.id,
            container_id: container.id.clone(),
            name,
            config,
        })?;
        self.orphaned.write().await.remove(&placement.swarm_id);
        info!(swarm_id = %placement.swarm_id, container = %container.id,
            engine = %container.engine_name, "container rescheduled");
        Ok(())
    }

    /// Compute one placement decision under the placement deadline.
    async fn place(
        &self,
        config: &ContainerConfig,
    ) -> ClusterResult<(EngineSnapshot, Arc<Engine>)> {
        let decide = async {
            let (snapshot, engines) = self.snapshot().await;
            let chosen = self.scheduler.select_engine(config, snapshot)?;
            let engine = engines
                .get(&chosen.id)
                .cloned()
                .ok_or_else(|| ClusterError::EngineNotFound(chosen.id.clone()))?;
            Ok::<_, ClusterError>((chosen, engine))
        };
        match tokio::time::timeout(self.options.placement_timeout, decide).await {
            Ok(result) => result,
            Err(_) => Err(muster_scheduler::SchedulerError::Timeout(
                self.options.placement_timeout,
            )
            .into()),
        }
    }

    /// Snapshot every engine for the scheduler, plus an id → session map to
    /// dispatch the decision. No registry lock is held while filters run.
    async fn snapshot(&self) -> (Vec<EngineSnapshot>, HashMap<String, Arc<Engine>>) {
        let engines: Vec<Arc<Engine>> = {
            let engines = self.engines.read().await;
            engines.values().cloned().collect()
        };
        let mut snapshots = Vec::with_capacity(engines.len());
        let mut by_id = HashMap::with_capacity(engines.len());
        for engine in engines {
            let snapshot = engine.snapshot().await;
            by_id.insert(snapshot.id.clone(), engine);
            snapshots.push(snapshot);
        }
        (snapshots, by_id)
    }
}

/// Swarm ids are uuid-v4 hex, truncatable like engine ids.
fn generate_swarm_id() -> String {
    Uuid::new_v4().simple().to_string()
}
