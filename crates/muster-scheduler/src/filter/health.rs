//! Drops engines that are not currently healthy.

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::Filter;

pub struct HealthFilter;

impl Filter for HealthFilter {
    fn name(&self) -> &'static str {
        "health"
    }

    fn filter(
        &self,
        _config: &ContainerConfig,
        nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        if nodes.is_empty() {
            return Ok(nodes);
        }
        let survivors: Vec<_> = nodes.into_iter().filter(|n| n.healthy).collect();
        if survivors.is_empty() {
            return Err(SchedulerError::NoHealthyEngine);
        }
        Ok(survivors)
    }
}
