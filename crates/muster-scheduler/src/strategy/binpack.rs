//! Binpack: fill the most-utilized engine first.
//!
//! Maximizes used/total on the chosen engine so the fleet drains onto as
//! few hosts as possible; ties break on the most recently engaged engine.

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::strategy::{weigh_nodes, Strategy};

pub struct BinpackStrategy {
    overcommit_ratio: f64,
}

impl BinpackStrategy {
    pub fn new(overcommit_ratio: f64) -> Self {
        Self { overcommit_ratio }
    }
}

impl Strategy for BinpackStrategy {
    fn name(&self) -> &'static str {
        "binpack"
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
        weighted.sort_by(|(a, wa), (b, wb)| {
            wb.score
                .cmp(&wa.score)
                .then(b.engaged_at.cmp(&a.engaged_at))
        });
        Ok(weighted.into_iter().map(|(node, _)| node).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::{request, sized};

    #[test]
    fn prefers_the_fullest_engine() {
        let packed = sized("packed", 4, 4096, 3, 3072);
        let empty = sized("empty", 4, 4096, 0, 0);

        let ranked = BinpackStrategy::new(0.0)
            .rank(&request(1, 512), vec![empty, packed])
            .unwrap();
        assert_eq!(ranked[0].id, "packed");
    }

    #[test]
    fn ties_break_on_most_recent_engagement() {
        let mut older = sized("older", 4, 4096, 1, 1024);
        older.engaged_at = 10;
        let mut newer = sized("newer", 4, 4096, 1, 1024);
        newer.engaged_at = 20;

        let ranked = BinpackStrategy::new(0.0)
            .rank(&request(0, 0), vec![older, newer])
            .unwrap();
        assert_eq!(ranked[0].id, "newer");
    }

    #[test]
    fn skips_engines_that_cannot_fit() {
        let packed = sized("packed", 4, 1024, 0, 1000);
        let empty = sized("empty", 4, 1024, 0, 0);

        let ranked = BinpackStrategy::new(0.0)
            .rank(&request(0, 512), vec![packed, empty])
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "empty");
    }
}
