//! Evaluates `constraint:` expressions against engine labels.
//!
//! Engines expose their operator labels plus the synthetic ones captured at
//! connect time (`storagedriver`, `executiondriver`, `kernelversion`,
//! `operatingsystem`); the `node` key matches the engine id or name. Soft
//! constraints (`~`) are ignored here — they feed ranking, not candidacy.

use muster_engine::{ContainerConfig, EngineSnapshot};

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::expr::parse_exprs;
use crate::filter::Filter;

pub struct ConstraintFilter;

/// Candidate values a constraint key resolves to on one engine.
pub(crate) fn constraint_candidates<'a>(node: &'a EngineSnapshot, key: &str) -> Vec<&'a str> {
    if key == "node" {
        return vec![node.id.as_str(), node.name.as_str()];
    }
    node.labels
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
        .collect()
}

impl Filter for ConstraintFilter {
    fn name(&self) -> &'static str {
        "constraint"
    }

    fn filter(
        &self,
        config: &ContainerConfig,
        mut nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<Vec<EngineSnapshot>> {
        let exprs = parse_exprs(&config.constraints())?;
        for expr in exprs.iter().filter(|e| !e.is_soft()) {
            let before = nodes.len();
            nodes.retain(|node| expr.match_values(&constraint_candidates(node, &expr.key)));
            if nodes.is_empty() && before > 0 {
                return Err(SchedulerError::ConstraintFailed(expr.render()));
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_support::{ids, snapshot, with_labels};

    fn config(constraints: &[&str]) -> ContainerConfig {
        ContainerConfig::build(ContainerConfig {
            env: constraints
                .iter()
                .map(|c| format!("constraint:{c}"))
                .collect(),
            ..ContainerConfig::default()
        })
    }

    fn fleet() -> Vec<EngineSnapshot> {
        vec![
            with_labels(snapshot("e1", "node-1"), &[("region", "us-east")]),
            with_labels(snapshot("e2", "node-2"), &[("region", "eu-west")]),
        ]
    }

    #[test]
    fn keeps_engines_matching_every_expression() {
        let survivors = ConstraintFilter
            .filter(&config(&["region==us-east"]), fleet())
            .unwrap();
        assert_eq!(ids(&survivors), vec!["e1"]);
    }

    #[test]
    fn reports_the_offending_expression() {
        let err = ConstraintFilter
            .filter(&config(&["region==ap-south"]), fleet())
            .unwrap_err();
        match err {
            SchedulerError::ConstraintFailed(expr) => assert_eq!(expr, "region==ap-south"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn not_equal_retains_engines_without_the_label() {
        let mut nodes = fleet();
        nodes.push(snapshot("e3", "node-3")); // no region label at all

        let survivors = ConstraintFilter
            .filter(&config(&["region!=us-east"]), nodes)
            .unwrap();
        assert_eq!(ids(&survivors), vec!["e2", "e3"]);
    }

    #[test]
    fn node_key_matches_id_or_name() {
        let by_name = ConstraintFilter
            .filter(&config(&["node==node-2"]), fleet())
            .unwrap();
        assert_eq!(ids(&by_name), vec!["e2"]);

        let by_id = ConstraintFilter
            .filter(&config(&["node==e1"]), fleet())
            .unwrap();
        assert_eq!(ids(&by_id), vec!["e1"]);
    }

    #[test]
    fn synthetic_labels_are_visible() {
        let nodes = vec![with_labels(
            snapshot("e1", "node-1"),
            &[("storagedriver", "overlay2"), ("operatingsystem", "linux")],
        )];
        let survivors = ConstraintFilter
            .filter(&config(&["storagedriver==overlay2"]), nodes)
            .unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn soft_constraints_do_not_filter() {
        let survivors = ConstraintFilter
            .filter(&config(&["region==~ap-south"]), fleet())
            .unwrap();
        assert_eq!(survivors.len(), 2);
    }

    #[test]
    fn glob_and_regex_values() {
        let survivors = ConstraintFilter
            .filter(&config(&["region==us-*"]), fleet())
            .unwrap();
        assert_eq!(ids(&survivors), vec!["e1"]);

        let survivors = ConstraintFilter
            .filter(&config(&["region==/^eu-.*$"]), fleet())
            .unwrap();
        assert_eq!(ids(&survivors), vec!["e2"]);
    }

    #[test]
    fn invalid_expression_is_a_parse_error() {
        let err = ConstraintFilter
            .filter(&config(&["1bad==x"]), fleet())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Expr(_)));
    }
}
