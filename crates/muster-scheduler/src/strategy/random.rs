//! Random: uniform sample over the engines that can fit the request.

use muster_engine::{ContainerConfig, EngineSnapshot};
use rand::seq::SliceRandom;

use crate::error::{SchedulerError, SchedulerResult};
use crate::strategy::{weigh_nodes, Strategy};

pub struct RandomStrategy {
    overcommit_ratio: f64,
}

impl RandomStrategy {
    pub fn new(overcommit_ratio: f64) -> Self {
        Self { overcommit_ratio }
    }
}

impl Strategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn rank(
        &self,
        config: &ContainerConfig,
        nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        let weighted = weigh_nodes(config, nodes, self.overcommit_ratio);
        if weighted.is_empty() {
            return Err(SchedulerError::NoEngineAvailable);
        }
        let mut nodes: Vec<EngineSnapshot> =
            weighted.into_iter().map(|(node, _)| node).collect();
        nodes.shuffle(&mut rand::rng());
        Ok(nodes)
    }
}
