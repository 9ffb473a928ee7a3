//! Evaluates `affinity:` expressions against what an engine already hosts.
//!
//! `container==X` keeps engines hosting a container matching X by name, id,
//! short id, or swarm id; `image==Y` keeps engines whose image inventory
//! matches Y; any other key matches against the labels of hosted
//! containers. `!=` inverts; soft (`~`) affinities feed ranking only.

use muster_engine::{parse_repository_tag, truncate_id, ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::expr::parse_exprs;
use crate::filter::Filter;

pub struct AffinityFilter;

/// Candidate values an affinity key resolves to on one engine.
pub(crate) fn affinity_candidates(node: &EngineSnapshot, key: &str) -> Vec<String> {
    match key {
        "container" => {
            let mut candidates = Vec::new();
            for container in node.containers.iter() {
                candidates.push(container.id.clone());
                candidates.push(truncate_id(&container.id).to_string());
                let swarm_id = container.swarm_id();
                if !swarm_id.is_empty() {
                    candidates.push(swarm_id);
                }
                for name in &container.names {
                    candidates.push(name.clone());
                    candidates.push(name.trim_start_matches('/').to_string());
                }
            }
            candidates
        }
        "image" => {
            let mut candidates = Vec::new();
            for image in &node.images {
                candidates.push(image.id.clone());
                for tag in &image.repo_tags {
                    candidates.push(tag.clone());
                    let (name, _) = parse_repository_tag(tag);
                    candidates.push(name.to_string());
                }
            }
            candidates
        }
        label => node
            .containers
            .iter()
            .filter_map(|container| container.config.labels.get(label))
            .cloned()
            .collect(),
    }
}

impl Filter for AffinityFilter {
    fn name(&self) -> &'static str {
        "affinity"
    }

    fn filter(
        &self,
        config: &ContainerConfig,
        mut nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        let exprs = parse_exprs(&config.affinities())?;
        for expr in exprs.iter().filter(|e| !e.is_soft()) {
            let before = nodes.len();
            nodes.retain(|node| {
                let candidates = affinity_candidates(node, &expr.key);
                let refs: Vec<&str> = candidates.iter().map(String::as_str).collect();
                expr.match_values(&refs)
            });
            if nodes.is_empty() && before > 0 {
                return Err(SchedulerError::AffinityFailed(expr.render()));
            }
        }
        Ok(nodes)
    }
}
