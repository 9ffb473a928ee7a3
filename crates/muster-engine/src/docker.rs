//! bollard-backed [`EngineClient`] for engines speaking the Docker API.
//!
//! This is the edge adapter: everything above the [`EngineClient`] trait is
//! protocol-agnostic, and nothing in here leaks bollard types upward.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
};
use bollard::image::ListImagesOptions;
use bollard::models::{ContainerStateStatusEnum, HealthStatusEnum, HostConfig, PortBinding};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::client::{
    ContainerDetails, ContainerSummary, EngineClient, EngineEvent, EngineInfo,
};
use crate::config::{ContainerConfig, PortSpec};
use crate::container::{ContainerHealth, ContainerState};
use crate::error::{EngineError, EngineResult};
use crate::image::Image;

/// A Docker-protocol engine reached over TCP.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Dial `host:port` over plain HTTP.
    pub fn connect(addr: &str, timeout_secs: u64) -> EngineResult<Self> {
        let docker = Docker::connect_with_http(
            &format!("tcp://{addr}"),
            timeout_secs,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(map_err)?;
        Ok(Self { docker })
    }

    /// Use the local engine socket; useful for single-host setups.
    pub fn connect_local() -> EngineResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(map_err)?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    async fn info(&self) -> EngineResult<EngineInfo> {
        let info = self.docker.info().await.map_err(map_err)?;
        let version = self.docker.version().await.map_err(map_err)?;

        // Engine labels arrive as `key=value` strings.
        let labels = info
            .labels
            .unwrap_or_default()
            .iter()
            .filter_map(|raw| raw.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok(EngineInfo {
            id: info.id.unwrap_or_default(),
            name: info.name.unwrap_or_default(),
            cpus: info.ncpu.unwrap_or_default(),
            memory: info.mem_total.unwrap_or_default(),
            labels,
            storage_driver: info.driver.unwrap_or_default(),
            execution_driver: info.default_runtime.unwrap_or_default(),
            kernel_version: info.kernel_version.unwrap_or_default(),
            operating_system: info.operating_system.unwrap_or_default(),
            api_version: version.api_version.unwrap_or_default(),
        })
    }

    async fn list_containers(
        &self,
        all: bool,
        filter_ids: Option<&[String]>,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(ids) = filter_ids {
            filters.insert("id".to_string(), ids.to_vec());
        }
        let options = ListContainersOptions::<String> {
            all,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_err)?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(map_err)?;

        let wire_config = inspect.config.unwrap_or_default();
        let host_config = inspect.host_config.unwrap_or_default();
        let state = inspect.state.unwrap_or_default();

        let config = ContainerConfig {
            image: wire_config.image.unwrap_or_default(),
            cmd: wire_config.cmd.unwrap_or_default(),
            env: wire_config.env.unwrap_or_default(),
            labels: wire_config.labels.unwrap_or_default(),
            cpu_shares: host_config.cpu_shares.unwrap_or_default(),
            memory: host_config.memory.unwrap_or_default(),
            published_ports: ports_from_bindings(host_config.port_bindings.as_ref()),
            volumes_from: host_config.volumes_from.unwrap_or_default(),
            links: host_config.links.unwrap_or_default(),
            network_mode: host_config.network_mode.unwrap_or_default(),
        };

        let health = state
            .health
            .as_ref()
            .and_then(|h| h.status)
            .map(|status| match status {
                HealthStatusEnum::STARTING => ContainerHealth::Starting,
                HealthStatusEnum::HEALTHY => ContainerHealth::Healthy,
                HealthStatusEnum::UNHEALTHY => ContainerHealth::Unhealthy,
                _ => ContainerHealth::None,
            })
            .unwrap_or(ContainerHealth::None);

        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            names: inspect.name.into_iter().collect(),
            state: map_state(&state),
            health,
            config,
        })
    }

    async fn create_container(
        &self,
        name: &str,
        config: &ContainerConfig,
    ) -> EngineResult<String> {
        let host_config = HostConfig {
            cpu_shares: (config.cpu_shares != 0).then_some(config.cpu_shares),
            memory: (config.memory != 0).then_some(config.memory),
            port_bindings: bindings_from_ports(&config.published_ports),
            volumes_from: non_empty(&config.volumes_from),
            links: non_empty(&config.links),
            network_mode: (!config.network_mode.is_empty())
                .then(|| config.network_mode.clone()),
            ..Default::default()
        };

        let wire_config = Config {
            image: Some(config.image.clone()),
            cmd: non_empty(&config.cmd),
            env: non_empty(&config.env),
            labels: Some(config.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = (!name.is_empty()).then(|| CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        });

        let response = self
            .docker
            .create_container(options, wire_config)
            .await
            .map_err(map_err)?;
        Ok(response.id)
    }

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn list_images(&self) -> EngineResult<Vec<Image>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;

        Ok(images
            .into_iter()
            .map(|img| Image {
                id: img.id,
                repo_tags: img.repo_tags,
                repo_digests: img.repo_digests,
                engine_id: String::new(),
            })
            .collect())
    }

    async fn events(
        &self,
        tx: mpsc::Sender<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> EngineResult<()> {
        let options = EventsOptions::<String> {
            filters: HashMap::from([(
                "type".to_string(),
                vec!["container".to_string()],
            )]),
            ..Default::default()
        };
        let mut stream = self.docker.events(Some(options));

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(event)) => {
                        let container_id = event
                            .actor
                            .and_then(|actor| actor.id)
                            .unwrap_or_default();
                        let status = event.action.unwrap_or_default();
                        if container_id.is_empty() || status.is_empty() {
                            continue;
                        }
                        debug!(%container_id, %status, "engine event");
                        if tx.send(EngineEvent { container_id, status }).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(map_err(e)),
                    None => return Ok(()),
                },
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}

fn non_empty(list: &[String]) -> Option<Vec<String>> {
    (!list.is_empty()).then(|| list.to_vec())
}

fn map_err(e: bollard::errors::Error) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NoSuchContainer(message),
        other => EngineError::Transport(other.to_string()),
    }
}

fn map_state(state: &bollard::models::ContainerState) -> ContainerState {
    if let Some(status) = state.status {
        return match status {
            ContainerStateStatusEnum::CREATED => ContainerState::Created,
            ContainerStateStatusEnum::RUNNING => ContainerState::Running,
            ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
            ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
            ContainerStateStatusEnum::DEAD => ContainerState::Dead,
            _ => ContainerState::Exited,
        };
    }
    // Older engines: derive from the state booleans.
    if state.running.unwrap_or(false) {
        if state.paused.unwrap_or(false) {
            ContainerState::Paused
        } else if state.restarting.unwrap_or(false) {
            ContainerState::Restarting
        } else {
            ContainerState::Running
        }
    } else if state.dead.unwrap_or(false) {
        ContainerState::Dead
    } else if state.started_at.as_deref().unwrap_or("").is_empty() {
        ContainerState::Created
    } else {
        ContainerState::Exited
    }
}

fn ports_from_bindings(
    bindings: Option<&HashMap<String, Option<Vec<PortBinding>>>>,
) -> Vec<PortSpec> {
    let mut ports = Vec::new();
    let Some(bindings) = bindings else {
        return ports;
    };
    for (key, slots) in bindings {
        let protocol = key.rsplit_once('/').map(|(_, p)| p).unwrap_or("tcp");
        for binding in slots.iter().flatten() {
            if let Some(host_port) = binding
                .host_port
                .as_deref()
                .and_then(|p| p.parse::<u16>().ok())
            {
                ports.push(PortSpec {
                    host_port,
                    protocol: protocol.to_string(),
                });
            }
        }
    }
    ports
}

fn bindings_from_ports(
    ports: &[PortSpec],
) -> Option<HashMap<String, Option<Vec<PortBinding>>>> {
    if ports.is_empty() {
        return None;
    }
    let mut bindings = HashMap::new();
    for port in ports {
        bindings.insert(
            format!("{}/{}", port.host_port, port.protocol),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(port.host_port.to_string()),
            }]),
        );
    }
    Some(bindings)
}
