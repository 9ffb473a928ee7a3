//! Drops engines whose published ports collide with the request.

use muster_engine::{ContainerConfig, EngineSnapshot, PortSpec};

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::Filter;

pub struct PortFilter;

fn collides(node: &EngineSnapshot, wanted: &PortSpec) -> bool {
    node.containers.iter().any(|container| {
        container.state.is_running()
            && container.config.published_ports.iter().any(|p| {
                p.host_port == wanted.host_port && p.protocol == wanted.protocol
            })
    })
}

impl Filter for PortFilter {
    fn name(&self) -> &'static str {
        "port"
    }

    fn filter(
        &self,
        config: &ContainerConfig,
        mut nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        for wanted in &config.published_ports {
            let before = nodes.len();
            nodes.retain(|node| !collides(node, wanted));
            if nodes.is_empty() && before > 0 {
                return Err(SchedulerError::PortConflict(format!(
                    "{}/{}",
                    wanted.host_port, wanted.protocol
                )));
            }
        }
        Ok(nodes)
    }
}
