//! Candidate-narrowing filters.
//!
//! A filter turns a list of engine snapshots plus a container config into a
//! (possibly smaller) list. Implementations register in the name→factory
//! table below; behavior composes via lists, never inheritance.

pub mod affinity;
pub mod constraint;
pub mod dependency;
pub mod expr;
pub mod health;
pub mod port;
pub mod slots;

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};

pub use affinity::AffinityFilter;
pub use constraint::ConstraintFilter;
pub use dependency::DependencyFilter;
pub use health::HealthFilter;
pub use port::PortFilter;
pub use slots::SlotsFilter;

/// Filter chain applied when the operator does not override it. Order
/// matters: cheap rejections first, expression evaluation afterwards.
pub const DEFAULT_FILTERS: &[&str] = &[
    "health",
    "port",
    "dependency",
    "constraint",
    "affinity",
    "slots",
];

/// A pure function narrowing candidate engines.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Narrow `nodes`. Emptying the set is an error carrying the reason;
    /// receiving an already-empty set passes through untouched.
    fn filter(
        &self,
        config: &ContainerConfig,
        nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>>;
}

/// Resolve one filter by name.
pub fn filter_by_name(name: &str) -> SchedulerResult<Box<dyn Filter>> {
    match name {
        "health" => Ok(Box::new(HealthFilter)),
        "port" => Ok(Box::new(PortFilter)),
        "dependency" => Ok(Box::new(DependencyFilter)),
        "constraint" => Ok(Box::new(ConstraintFilter)),
        "affinity" => Ok(Box::new(AffinityFilter)),
        "slots" => Ok(Box::new(SlotsFilter)),
        other => Err(SchedulerError::UnknownFilter(other.to_string())),
    }
}

/// Resolve a whole chain, preserving order.
pub fn filters_by_name<S: AsRef<str>>(names: &[S]) -> SchedulerResult<Vec<Box<dyn Filter>>> {
    names.iter().map(|n| filter_by_name(n.as_ref())).collect()
}

/// Run a chain over the candidates.
pub fn apply_filters(
    filters: &[Box<dyn Filter>],
    config: &ContainerConfig,
    mut nodes: Vec<EngineSnapshot>,
) -> SchedulerResult<Vec<EngineSnapshot>> {
    for filter in filters {
        nodes = filter.filter(config, nodes)?;
    }
    Ok(nodes)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use muster_engine::{Container, Containers, EngineSnapshot};

    /// A bare healthy snapshot for filter tests.
    pub fn snapshot(id: &str, name: &str) -> EngineSnapshot {
        EngineSnapshot {
            id: id.to_string(),
            name: name.to_string(),
            addr: format!("{name}:2375"),
            healthy: true,
            labels: HashMap::new(),
            total_cpus: 4,
            total_memory: 8 * 1024 * 1024 * 1024,
            used_cpus: 0,
            used_memory: 0,
            engaged_at: 0,
            containers: Containers::default(),
            images: Vec::new(),
        }
    }

    pub fn with_labels(mut node: EngineSnapshot, labels: &[(&str, &str)]) -> EngineSnapshot {
        for (k, v) in labels {
            node.labels.insert(k.to_string(), v.to_string());
        }
        node
    }

    pub fn hosted(node: &EngineSnapshot, id: &str, name: &str) -> Container {
        Container {
            id: id.to_string(),
            names: vec![format!("/{name}")],
            engine_id: node.id.clone(),
            engine_name: node.name.clone(),
            engine_addr: node.addr.clone(),
            ..Container::default()
        }
    }

    pub fn with_container(mut node: EngineSnapshot, container: Container) -> EngineSnapshot {
        node.containers.push(container);
        node
    }

    pub fn ids(nodes: &[EngineSnapshot]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_default_chain() {
        let filters = filters_by_name(DEFAULT_FILTERS).unwrap();
        let names: Vec<&str> = filters.iter().map(|f| f.name()).collect();
        assert_eq!(names, DEFAULT_FILTERS);
    }

    #[test]
    fn registry_rejects_unknown_name() {
        assert!(matches!(
            filter_by_name("turbo"),
            Err(SchedulerError::UnknownFilter(_))
        ));
    }
}
