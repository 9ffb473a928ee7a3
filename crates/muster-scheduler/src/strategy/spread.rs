//! Spread: place on the engine running the fewest containers.
//!
//! Ties break on lowest reserved memory, spreading load across the fleet.

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::strategy::{weigh_nodes, Strategy};

pub struct SpreadStrategy {
    overcommit_ratio: f64,
}

impl SpreadStrategy {
    pub fn new(overcommit_ratio: f64) -> Self {
        Self { overcommit_ratio }
    }
}

impl Strategy for SpreadStrategy {
    fn name(&self) -> &'static str {
        "spread"
    }

    fn rank(
        &self,
        config: &ContainerConfig,
        nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        let mut weighted = weigh_nodes(config, nodes, self.overcommit_ratio);
        if weighted.is_empty() {
            return Err(SchedulerError::NoEngineAvailable);
        }
        weighted.sort_by_key(|(node, _)| (node.containers.len(), node.used_memory));
        Ok(weighted.into_iter().map(|(node, _)| node).collect())
    }
}
