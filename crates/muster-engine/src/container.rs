//! Containers and the identifier-resolution rules over them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ContainerConfig;

/// Length of a shortened engine or swarm id.
pub const SHORT_ID_LEN: usize = 12;

/// Minimum prefix length accepted by prefix lookups. Shorter prefixes
/// never resolve.
pub const MIN_PREFIX_LEN: usize = 3;

/// Truncate an id to its short form.
pub fn truncate_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Remote container run state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    #[default]
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
}

impl ContainerState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Restarting)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Health as reported by the engine's healthcheck, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHealth {
    #[default]
    None,
    Starting,
    Healthy,
    Unhealthy,
}

/// A remotely hosted workload tracked by the registry.
///
/// The engine reference is non-owning: id, name, and address of the owning
/// engine are carried as plain strings and invalidated when the engine is
/// removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Engine-assigned id.
    pub id: String,
    /// Names as the engine reports them, each `/`-prefixed.
    pub names: Vec<String>,
    pub state: ContainerState,
    pub health: ContainerHealth,
    pub config: ContainerConfig,
    pub engine_id: String,
    pub engine_name: String,
    pub engine_addr: String,
}

impl Container {
    /// The manager-assigned swarm id, empty when none.
    pub fn swarm_id(&self) -> String {
        self.config.swarm_id()
    }
}

/// An indexable list of containers with the manager's resolution rules.
#[derive(Debug, Clone, Default)]
pub struct Containers(Vec<Container>);

impl Containers {
    pub fn new(containers: Vec<Container>) -> Self {
        Self(containers)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Container> {
        self.0.iter()
    }

    pub fn push(&mut self, container: Container) {
        self.0.push(container);
    }

    /// Resolve an identifier to a container.
    ///
    /// Candidates are evaluated in strict order, stopping at a unique
    /// match: exact id, short id, exact swarm id, short swarm id; then
    /// name forms (`name`, `/name`, `<engine-id>/name`, `<engine-name>/name`);
    /// then id prefix, then swarm-id prefix. An ambiguous name or prefix
    /// resolves to nothing rather than guessing, and prefixes shorter than
    /// [`MIN_PREFIX_LEN`] never resolve.
    pub fn get(&self, id_or_name: &str) -> Option<&Container> {
        if id_or_name.is_empty() {
            return None;
        }

        // Exact or short engine-assigned id.
        for container in &self.0 {
            if container.id == id_or_name || truncate_id(&container.id) == id_or_name {
                return Some(container);
            }
        }

        // Exact or short swarm id.
        for container in &self.0 {
            let swarm_id = container.swarm_id();
            if !swarm_id.is_empty()
                && (swarm_id == id_or_name || truncate_id(&swarm_id) == id_or_name)
            {
                return Some(container);
            }
        }

        // Name, /name, engine-id/name, engine-name/name.
        let named: Vec<&Container> = self
            .0
            .iter()
            .filter(|container| {
                container.names.iter().any(|name| {
                    name == id_or_name
                        || format!("/{id_or_name}") == *name
                        || format!("{}{}", container.engine_id, name) == id_or_name
                        || format!("{}{}", container.engine_name, name) == id_or_name
                })
            })
            .collect();
        match named.len() {
            1 => return Some(named[0]),
            0 => {}
            _ => return None,
        }

        if id_or_name.len() < MIN_PREFIX_LEN {
            return None;
        }

        // Id prefix, then swarm-id prefix, pooled: a unique match across
        // both steps resolves, anything else does not.
        let mut candidates: Vec<&Container> = self
            .0
            .iter()
            .filter(|container| container.id.starts_with(id_or_name))
            .collect();
        candidates.extend(self.0.iter().filter(|container| {
            let swarm_id = container.swarm_id();
            !swarm_id.is_empty() && swarm_id.starts_with(id_or_name)
        }));
        candidates.dedup_by(|a, b| a.id == b.id && a.engine_id == b.engine_id);

        match candidates.len() {
            1 => Some(candidates[0]),
            _ => None,
        }
    }
}

impl FromIterator<Container> for Containers {
    fn from_iter<I: IntoIterator<Item = Container>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Containers {
    type Item = Container;
    type IntoIter = std::vec::IntoIter<Container>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Containers {
    type Item = &'a Container;
    type IntoIter = std::slice::Iter<'a, Container>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, name: &str, engine: &str) -> Container {
        Container {
            id: id.to_string(),
            names: vec![format!("/{name}")],
            engine_id: format!("{engine}-id"),
            engine_name: engine.to_string(),
            engine_addr: format!("{engine}:2375"),
            ..Container::default()
        }
    }

    fn with_swarm_id(mut c: Container, swarm_id: &str) -> Container {
        c.config.set_swarm_id(swarm_id);
        c
    }

    #[test]
    fn empty_lookup_resolves_nothing() {
        let containers = Containers::new(vec![container("aaaa1111", "web", "e1")]);
        assert!(containers.get("").is_none());
    }

    #[test]
    fn exact_and_short_id() {
        let long = "0123456789abcdef0123456789abcdef";
        let containers = Containers::new(vec![container(long, "web", "e1")]);

        assert!(containers.get(long).is_some());
        assert!(containers.get("0123456789ab").is_some());
        assert!(containers.get("ffff").is_none());
    }

    #[test]
    fn swarm_id_exact_and_short() {
        let swarm_id = "fedcba9876543210fedcba9876543210";
        let containers = Containers::new(vec![with_swarm_id(
            container("aaaa1111", "web", "e1"),
            swarm_id,
        )]);

        assert!(containers.get(swarm_id).is_some());
        assert!(containers.get("fedcba987654").is_some());
    }

    #[test]
    fn name_forms() {
        let containers = Containers::new(vec![container("aaaa1111", "web", "engine1")]);

        assert!(containers.get("web").is_some());
        assert!(containers.get("/web").is_some());
        assert!(containers.get("engine1/web").is_some());
        assert!(containers.get("engine1-id/web").is_some());
        assert!(containers.get("engine2/web").is_none());
    }

    #[test]
    fn ambiguous_name_resolves_nothing() {
        let containers = Containers::new(vec![
            container("aaaa1111", "web", "engine1"),
            container("bbbb2222", "web", "engine2"),
        ]);

        assert!(containers.get("web").is_none());
        let scoped = containers.get("engine1/web").unwrap();
        assert_eq!(scoped.engine_name, "engine1");
    }

    #[test]
    fn id_prefix_requires_three_chars() {
        let containers = Containers::new(vec![container("abcdef1234567890", "web", "e1")]);

        assert!(containers.get("abc").is_some());
        assert!(containers.get("ab").is_none());
        assert!(containers.get("a").is_none());
    }

    #[test]
    fn ambiguous_prefix_resolves_nothing() {
        let containers = Containers::new(vec![
            container("abc1111111111111", "web1", "e1"),
            container("abc2222222222222", "web2", "e2"),
        ]);

        assert!(containers.get("abc").is_none());
        assert!(containers.get("abc1").is_some());
    }

    #[test]
    fn swarm_prefix_pool_dedups_same_container() {
        // Engine id and swarm id share a prefix on the same container: the
        // pooled candidates must still resolve uniquely.
        let containers = Containers::new(vec![with_swarm_id(
            container("abc1111111111111", "web", "e1"),
            "abc9999999999999",
        )]);

        assert!(containers.get("abc").is_some());
    }

    #[test]
    fn state_display_and_running() {
        assert_eq!(ContainerState::Running.to_string(), "running");
        assert_eq!(ContainerState::Exited.to_string(), "exited");
        assert!(ContainerState::Paused.is_running());
        assert!(!ContainerState::Dead.is_running());
    }

    #[test]
    fn truncate_handles_short_ids() {
        assert_eq!(truncate_id("abc"), "abc");
        assert_eq!(truncate_id("0123456789abcdef"), "0123456789ab");
    }
}
