//! Honors the `container-slots` engine label.
//!
//! An engine labeled `container-slots=N` accepts at most N running
//! containers; engines at or over their limit are dropped. Engines without
//! the label (or with an unparsable value) are unlimited.

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::Filter;

const SLOTS_LABEL: &str = "container-slots";

pub struct SlotsFilter;

fn has_free_slot(node: &EngineSnapshot) -> bool {
    let Some(limit) = node.labels.get(SLOTS_LABEL).and_then(|v| v.parse::<usize>().ok())
    else {
        return true;
    };
    let running = node
        .containers
        .iter()
        .filter(|c| c.state.is_running())
        .count();
    running < limit
}

impl Filter for SlotsFilter {
    fn name(&self) -> &'static str {
        "slots"
    }

    fn filter(
        &self,
        _config: &ContainerConfig,
        nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        if nodes.is_empty() {
            return Ok(nodes);
        }
        let survivors: Vec<_> = nodes.into_iter().filter(has_free_slot).collect();
        if survivors.is_empty() {
            return Err(SchedulerError::NoSlotsAvailable);
        }
        Ok(survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_support::{hosted, ids, snapshot, with_container, with_labels};
    use muster_engine::ContainerState;

    fn full_node(id: &str, name: &str, slots: &str) -> EngineSnapshot {
        let node = with_labels(snapshot(id, name), &[(SLOTS_LABEL, slots)]);
        let mut container = hosted(&node, &format!("{id}-c"), "web");
        container.state = ContainerState::Running;
        with_container(node, container)
    }

    #[test]
    fn drops_engines_at_their_limit() {
        let nodes = vec![full_node("e1", "node-1", "1"), snapshot("e2", "node-2")];
        let survivors = SlotsFilter
            .filter(&ContainerConfig::default(), nodes)
            .unwrap();
        assert_eq!(ids(&survivors), vec!["e2"]);
    }

    #[test]
    fn engines_below_the_limit_survive() {
        let nodes = vec![full_node("e1", "node-1", "5")];
        let survivors = SlotsFilter
            .filter(&ContainerConfig::default(), nodes)
            .unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn unparsable_label_means_unlimited() {
        let nodes = vec![full_node("e1", "node-1", "lots")];
        let survivors = SlotsFilter
            .filter(&ContainerConfig::default(), nodes)
            .unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn stopped_containers_do_not_consume_slots() {
        let node = with_labels(snapshot("e1", "node-1"), &[(SLOTS_LABEL, "1")]);
        let mut container = hosted(&node, "e1-c", "web");
        container.state = ContainerState::Exited;
        let nodes = vec![with_container(node, container)];

        let survivors = SlotsFilter
            .filter(&ContainerConfig::default(), nodes)
            .unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn everyone_full_is_an_error() {
        let nodes = vec![full_node("e1", "node-1", "1")];
        let err = SlotsFilter
            .filter(&ContainerConfig::default(), nodes)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoSlotsAvailable));
    }
}
