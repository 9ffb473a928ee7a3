//! Container configuration and the reserved label namespace.
//!
//! Placement intent (affinities, constraints, reschedule policies,
//! checkpoint time) reaches the manager either as labels or as env entries
//! of the form `affinity:EXPR`. [`ContainerConfig::build`] migrates the env
//! form into the reserved labels so every downstream consumer reads a
//! single canonical representation.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Key prefix of every manager-controlled label.
pub const LABEL_NAMESPACE: &str = "com.muster";

/// Reschedule policies a container may carry (at most one).
const VALID_RESCHEDULE_POLICIES: &[&str] = &["off", "on-node-failure"];

/// Env prefixes consumed into reserved labels, paired with the label key
/// suffix they migrate to.
const ENV_MIGRATIONS: &[(&str, &str)] = &[
    ("affinity", "affinities"),
    ("constraint", "constraints"),
    ("reschedule", "reschedule-policies"),
    ("checkpoint-time", "checkpoint-time"),
];

/// A published port declared by a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub host_port: u16,
    /// `tcp` or `udp`.
    pub protocol: String,
}

impl PortSpec {
    pub fn tcp(host_port: u16) -> Self {
        Self {
            host_port,
            protocol: "tcp".to_string(),
        }
    }
}

/// User intent for one container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Requested CPU shares; 0 when unspecified.
    #[serde(default)]
    pub cpu_shares: i64,
    /// Requested memory in bytes; 0 when unspecified.
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub published_ports: Vec<PortSpec>,
    #[serde(default)]
    pub volumes_from: Vec<String>,
    /// `container[:alias]` links.
    #[serde(default)]
    pub links: Vec<String>,
    /// Networking mode; `container:<ref>` forces co-location.
    #[serde(default)]
    pub network_mode: String,
}

impl ContainerConfig {
    /// Canonicalize a raw config: env entries carrying placement intent are
    /// stripped from env and merged into the reserved labels.
    pub fn build(mut raw: ContainerConfig) -> Self {
        let mut collected: HashMap<&str, Vec<String>> = HashMap::new();

        // Start from whatever the label form already carries.
        for &(_, label_key) in ENV_MIGRATIONS {
            let existing = raw.extract_list(label_key);
            if !existing.is_empty() {
                collected.insert(label_key, existing);
            }
        }

        // Consume recognized env entries; everything else passes through.
        let mut env = Vec::with_capacity(raw.env.len());
        for entry in raw.env.drain(..) {
            match entry.split_once(':') {
                Some((prefix, payload))
                    if ENV_MIGRATIONS.iter().any(|(p, _)| *p == prefix) =>
                {
                    let label_key = ENV_MIGRATIONS
                        .iter()
                        .find(|(p, _)| *p == prefix)
                        .map(|(_, k)| *k)
                        .unwrap_or_default();
                    collected
                        .entry(label_key)
                        .or_default()
                        .push(payload.to_string());
                }
                _ => env.push(entry),
            }
        }
        raw.env = env;

        for (label_key, values) in collected {
            if let Ok(json) = serde_json::to_string(&values) {
                raw.labels
                    .insert(format!("{LABEL_NAMESPACE}.{label_key}"), json);
            }
        }

        raw
    }

    fn reserved_label(&self, suffix: &str) -> Option<&String> {
        self.labels.get(&format!("{LABEL_NAMESPACE}.{suffix}"))
    }

    fn extract_list(&self, suffix: &str) -> Vec<String> {
        self.reserved_label(suffix)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    fn store_list(&mut self, suffix: &str, values: &[String]) -> EngineResult<()> {
        let json = serde_json::to_string(values)?;
        self.labels
            .insert(format!("{LABEL_NAMESPACE}.{suffix}"), json);
        Ok(())
    }

    /// The swarm id, empty when not yet assigned.
    pub fn swarm_id(&self) -> String {
        self.reserved_label("id").cloned().unwrap_or_default()
    }

    /// Set or override the swarm id.
    pub fn set_swarm_id(&mut self, id: &str) {
        self.labels
            .insert(format!("{LABEL_NAMESPACE}.id"), id.to_string());
    }

    /// The client-supplied name before the manager mangled it.
    pub fn original_name(&self) -> Option<String> {
        self.reserved_label("original-name").cloned()
    }

    pub fn set_original_name(&mut self, name: &str) {
        self.labels
            .insert(format!("{LABEL_NAMESPACE}.original-name"), name.to_string());
    }

    /// All affinity expression strings.
    pub fn affinities(&self) -> Vec<String> {
        self.extract_list("affinities")
    }

    /// All constraint expression strings.
    pub fn constraints(&self) -> Vec<String> {
        self.extract_list("constraints")
    }

    pub fn add_affinity(&mut self, affinity: &str) -> EngineResult<()> {
        let mut affinities = self.affinities();
        affinities.push(affinity.to_string());
        self.store_list("affinities", &affinities)
    }

    pub fn remove_affinity(&mut self, affinity: &str) -> EngineResult<()> {
        let affinities: Vec<String> = self
            .affinities()
            .into_iter()
            .filter(|a| a != affinity)
            .collect();
        self.store_list("affinities", &affinities)
    }

    pub fn add_constraint(&mut self, constraint: &str) -> EngineResult<()> {
        let mut constraints = self.constraints();
        constraints.push(constraint.to_string());
        self.store_list("constraints", &constraints)
    }

    /// Whether a hard `node==` constraint pins this container to an engine.
    pub fn has_node_constraint(&self) -> bool {
        self.constraints()
            .iter()
            .any(|c| c.starts_with("node==") && !c.starts_with("node==~"))
    }

    /// Whether the given reschedule policy is set.
    pub fn has_reschedule_policy(&self, policy: &str) -> bool {
        self.extract_list("reschedule-policies")
            .iter()
            .any(|p| p == policy)
    }

    /// The checkpoint interval, `Duration::ZERO` when unset.
    pub fn checkpoint_time(&self) -> EngineResult<Duration> {
        match self.extract_list("checkpoint-time").first() {
            Some(raw) => parse_duration(raw)
                .ok_or_else(|| EngineError::InvalidConfig(format!("bad checkpoint-time {raw:?}"))),
            None => Ok(Duration::ZERO),
        }
    }

    /// Reject configs the manager cannot honor.
    pub fn validate(&self) -> EngineResult<()> {
        let policies = self.extract_list("reschedule-policies");
        if policies.len() > 1 {
            return Err(EngineError::InvalidConfig(
                "too many reschedule policies".to_string(),
            ));
        }
        if let Some(policy) = policies.first() {
            if !VALID_RESCHEDULE_POLICIES.contains(&policy.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "invalid reschedule policy: {policy}"
                )));
            }
        }
        if let Some(raw) = self.extract_list("checkpoint-time").first() {
            if parse_duration(raw).is_none() {
                return Err(EngineError::InvalidConfig(format!(
                    "bad checkpoint-time {raw:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Parse `300ms`, `10s`, `5m`, `2h` duration strings.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (value, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit())?);
    let value: u64 = value.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}
