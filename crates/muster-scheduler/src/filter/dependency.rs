//! Forces co-location with containers the request depends on.
//!
//! `volumes-from`, `links`, and `network=container:X` all require the new
//! container to land on the engine hosting the referenced one. A reference
//! no candidate engine can satisfy fails the placement.

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::Filter;

pub struct DependencyFilter;

/// Extract every container reference the config depends on.
fn dependencies(config: &ContainerConfig) -> Vec<String> {
    let mut refs = Vec::new();
    for volume in &config.volumes_from {
        // `container[:ro|rw]`
        let name = volume.split(':').next().unwrap_or(volume);
        refs.push(name.to_string());
    }
    for link in &config.links {
        // `container[:alias]`
        let name = link.split(':').next().unwrap_or(link);
        refs.push(name.to_string());
    }
    if let Some(target) = config.network_mode.strip_prefix("container:") {
        refs.push(target.to_string());
    }
    refs.retain(|r| !r.is_empty());
    refs
}

impl Filter for DependencyFilter {
    fn name(&self) -> &'static str {
        "dependency"
    }

    fn filter(
        &self,
        config: &ContainerConfig,
        mut nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        for reference in dependencies(config) {
            let before = nodes.len();
            nodes.retain(|node| node.containers.get(&reference).is_some());
            if nodes.is_empty() && before > 0 {
                return Err(SchedulerError::DependencyUnresolved(reference));
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_support::{hosted, ids, snapshot, with_container};

    fn fleet() -> Vec<EngineSnapshot> {
        let a = snapshot("e1", "node-1");
        let db = hosted(&a, "dddd4444", "db");
        let a = with_container(a, db);
        let b = snapshot("e2", "node-2");
        vec![a, b]
    }

    #[test]
    fn volumes_from_pins_to_hosting_engine() {
        let config = ContainerConfig {
            volumes_from: vec!["db:ro".to_string()],
            ..ContainerConfig::default()
        };
        let survivors = DependencyFilter.filter(&config, fleet()).unwrap();
        assert_eq!(ids(&survivors), vec!["e1"]);
    }

    #[test]
    fn links_pin_to_hosting_engine() {
        let config = ContainerConfig {
            links: vec!["db:database".to_string()],
            ..ContainerConfig::default()
        };
        let survivors = DependencyFilter.filter(&config, fleet()).unwrap();
        assert_eq!(ids(&survivors), vec!["e1"]);
    }

    #[test]
    fn network_container_mode_pins() {
        let config = ContainerConfig {
            network_mode: "container:db".to_string(),
            ..ContainerConfig::default()
        };
        let survivors = DependencyFilter.filter(&config, fleet()).unwrap();
        assert_eq!(ids(&survivors), vec!["e1"]);
    }

    #[test]
    fn unresolved_reference_fails() {
        let config = ContainerConfig {
            volumes_from: vec!["ghost".to_string()],
            ..ContainerConfig::default()
        };
        let err = DependencyFilter.filter(&config, fleet()).unwrap_err();
        match err {
            SchedulerError::DependencyUnresolved(name) => assert_eq!(name, "ghost"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn plain_network_modes_are_ignored() {
        let config = ContainerConfig {
            network_mode: "bridge".to_string(),
            ..ContainerConfig::default()
        };
        let survivors = DependencyFilter.filter(&config, fleet()).unwrap();
        assert_eq!(survivors.len(), 2);
    }

    #[test]
    fn dependency_resolution_uses_lookup_rules() {
        // Reference by id prefix works through the container index.
        let config = ContainerConfig {
            volumes_from: vec!["dddd".to_string()],
            ..ContainerConfig::default()
        };
        let survivors = DependencyFilter.filter(&config, fleet()).unwrap();
        assert_eq!(ids(&survivors), vec!["e1"]);
    }
}
