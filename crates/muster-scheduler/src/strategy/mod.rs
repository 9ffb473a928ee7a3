//! Ranking strategies over filter survivors.
//!
//! A strategy orders the candidate snapshots; the scheduler takes the top
//! element. Resource accounting is shared: available = declared ×
//! (1 + overcommit) − reserved, where reserved sums the cpu shares and
//! memory requested by every container already placed on the engine.
//! Engines that cannot fit the request even with overcommit are ignored.

pub mod binpack;
pub mod random;
pub mod spread;

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};

pub use binpack::BinpackStrategy;
pub use random::RandomStrategy;
pub use spread::SpreadStrategy;

/// Strategy used when the operator does not pick one.
pub const DEFAULT_STRATEGY: &str = "spread";

/// A pure function ranking surviving candidates, best first.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn rank(
        &self,
        config: &ContainerConfig,
        nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>>;
}

/// Resolve a strategy by name.
pub fn strategy_by_name(name: &str, overcommit_ratio: f64) -> SchedulerResult<Box<dyn Strategy>> {
    match name {
        "spread" => Ok(Box::new(SpreadStrategy::new(overcommit_ratio))),
        "binpack" => Ok(Box::new(BinpackStrategy::new(overcommit_ratio))),
        "random" => Ok(Box::new(RandomStrategy::new(overcommit_ratio))),
        other => Err(SchedulerError::UnknownStrategy(other.to_string())),
    }
}

/// Resource weight of one eligible engine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Weight {
    /// 0..=200: cpu and memory utilization percentages after placement.
    pub score: i64,
}

/// Drop engines that cannot fit the request, computing the post-placement
/// utilization weight for those that can.
pub(crate) fn weigh_nodes(
    config: &ContainerConfig,
    nodes: Vec<EngineSnapshot>,
    overcommit_ratio: f64,
) -> Vec<(EngineSnapshot, Weight)> {
    let mut weighted = Vec::with_capacity(nodes.len());
    for node in nodes {
        let total_cpus = overcommitted(node.total_cpus, overcommit_ratio);
        let total_memory = overcommitted(node.total_memory, overcommit_ratio);

        if config.cpu_shares > 0
            && (total_cpus == 0 || node.used_cpus + config.cpu_shares > total_cpus)
        {
            continue;
        }
        if config.memory > 0
            && (total_memory == 0 || node.used_memory + config.memory > total_memory)
        {
            continue;
        }

        let cpu_score = if total_cpus > 0 {
            (node.used_cpus + config.cpu_shares) * 100 / total_cpus
        } else {
            0
        };
        let memory_score = if total_memory > 0 {
            (node.used_memory + config.memory) * 100 / total_memory
        } else {
            0
        };

        weighted.push((
            node,
            Weight {
                score: cpu_score + memory_score,
            },
        ));
    }
    weighted
}

fn overcommitted(total: i64, ratio: f64) -> i64 {
    total + (total as f64 * ratio) as i64
}

#[cfg(test)]
pub(crate) mod test_support {
    use muster_engine::{ContainerConfig, EngineSnapshot};

    use crate::filter::test_support::snapshot;

    pub fn sized(id: &str, cpus: i64, memory: i64, used_cpus: i64, used_memory: i64) -> EngineSnapshot {
        let mut node = snapshot(id, id);
        node.total_cpus = cpus;
        node.total_memory = memory;
        node.used_cpus = used_cpus;
        node.used_memory = used_memory;
        node
    }

    pub fn request(cpu_shares: i64, memory: i64) -> ContainerConfig {
        ContainerConfig {
            cpu_shares,
            memory,
            ..ContainerConfig::default()
        }
    }
}
