//! Filter → strategy → selection.

use muster_engine::{ContainerConfig, EngineSnapshot};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::affinity::affinity_candidates;
use crate::filter::constraint::constraint_candidates;
use crate::filter::expr::{parse_exprs, Expr};
use crate::filter::{apply_filters, filters_by_name, Filter, DEFAULT_FILTERS};
use crate::strategy::{strategy_by_name, Strategy, DEFAULT_STRATEGY};

/// The stateless placement pipeline. Safe to share and call concurrently;
/// every call works on the snapshot it is given.
pub struct Scheduler {
    strategy: Box<dyn Strategy>,
    filters: Vec<Box<dyn Filter>>,
}

impl Scheduler {
    pub fn new(strategy: Box<dyn Strategy>, filters: Vec<Box<dyn Filter>>) -> Self {
        Self { strategy, filters }
    }

    /// Build from operator-supplied names. Unknown names are config errors.
    pub fn with_names<S: AsRef<str>>(
        strategy: &str,
        filters: &[S],
        overcommit_ratio: f64,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            strategy: strategy_by_name(strategy, overcommit_ratio)?,
            filters: filters_by_name(filters)?,
        })
    }

    /// The default pipeline: every filter, spread strategy.
    pub fn default_pipeline(overcommit_ratio: f64) -> Self {
        Self::with_names(DEFAULT_STRATEGY, DEFAULT_FILTERS, overcommit_ratio)
            .expect("default pipeline must resolve")
    }

    /// Choose an engine for the request.
    ///
    /// Applies the filter chain, partitions survivors by soft-expression
    /// preference, and ranks the preferred partition first, falling back to
    /// the rest when nothing preferred fits.
    pub fn select_engine(
        &self,
        config: &ContainerConfig,
        nodes: Vec<EngineSnapshot>,
    ) -> SchedulerResult<EngineSnapshot> {
        if nodes.is_empty() {
            return Err(SchedulerError::NoEngineAvailable);
        }

        let survivors = apply_filters(&self.filters, config, nodes)?;
        if survivors.is_empty() {
            return Err(SchedulerError::NoEngineAvailable);
        }

        let soft = soft_exprs(config)?;
        if !soft.is_empty() {
            let (preferred, rest): (Vec<_>, Vec<_>) = survivors
                .into_iter()
                .partition(|node| satisfies_all(node, &soft));
            debug!(
                preferred = preferred.len(),
                rest = rest.len(),
                "soft partition"
            );

            if !preferred.is_empty() {
                match self.strategy.rank(config, preferred) {
                    Ok(ranked) => {
                        if let Some(top) = ranked.into_iter().next() {
                            return Ok(top);
                        }
                    }
                    Err(SchedulerError::NoEngineAvailable) => {}
                    Err(e) => return Err(e),
                }
            }
            let ranked = self.strategy.rank(config, rest)?;
            return ranked
                .into_iter()
                .next()
                .ok_or(SchedulerError::NoEngineAvailable);
        }

        let ranked = self.strategy.rank(config, survivors)?;
        ranked
            .into_iter()
            .next()
            .ok_or(SchedulerError::NoEngineAvailable)
    }
}

/// All soft constraint and affinity expressions of a request.
fn soft_exprs(config: &ContainerConfig) -> SchedulerResult<Vec<SoftExpr>> {
    let mut soft = Vec::new();
    for expr in parse_exprs(&config.constraints())? {
        if expr.is_soft() {
            soft.push(SoftExpr {
                expr,
                kind: SoftKind::Constraint,
            });
        }
    }
    for expr in parse_exprs(&config.affinities())? {
        if expr.is_soft() {
            soft.push(SoftExpr {
                expr,
                kind: SoftKind::Affinity,
            });
        }
    }
    Ok(soft)
}

enum SoftKind {
    Constraint,
    Affinity,
}

struct SoftExpr {
    expr: Expr,
    kind: SoftKind,
}

fn satisfies_all(node: &EngineSnapshot, soft: &[SoftExpr]) -> bool {
    soft.iter().all(|s| match s.kind {
        SoftKind::Constraint => s
            .expr
            .match_values(&constraint_candidates(node, &s.expr.key)),
        SoftKind::Affinity => {
            let candidates = affinity_candidates(node, &s.expr.key);
            let refs: Vec<&str> = candidates.iter().map(String::as_str).collect();
            s.expr.match_values(&refs)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_support::{hosted, snapshot, with_container, with_labels};

    fn request(env: &[&str]) -> ContainerConfig {
        ContainerConfig::build(ContainerConfig {
            image: "nginx:latest".to_string(),
            env: env.iter().map(|s| s.to_string()).collect(),
            ..ContainerConfig::default()
        })
    }

    fn fleet() -> Vec<EngineSnapshot> {
        let a = with_labels(snapshot("engine-a", "node-a"), &[("region", "us")]);
        let redis = hosted(&a, "aaaa1111bbbb2222", "redis");
        let a = with_container(a, redis);
        let b = with_labels(snapshot("engine-b", "node-b"), &[("region", "eu")]);
        vec![a, b]
    }

    fn scheduler() -> Scheduler {
        Scheduler::default_pipeline(0.05)
    }

    #[test]
    fn constraint_steers_placement() {
        let chosen = scheduler()
            .select_engine(&request(&["constraint:region==us"]), fleet())
            .unwrap();
        assert_eq!(chosen.id, "engine-a");

        let chosen = scheduler()
            .select_engine(&request(&["constraint:region==eu"]), fleet())
            .unwrap();
        assert_eq!(chosen.id, "engine-b");
    }

    #[test]
    fn removing_the_matching_engine_fails_with_the_expression() {
        let survivors_without_a: Vec<EngineSnapshot> = fleet()
            .into_iter()
            .filter(|n| n.id != "engine-a")
            .collect();
        let err = scheduler()
            .select_engine(&request(&["constraint:region==us"]), survivors_without_a)
            .unwrap_err();
        match err {
            SchedulerError::ConstraintFailed(expr) => assert_eq!(expr, "region==us"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn affinity_colocates_and_inverts() {
        let chosen = scheduler()
            .select_engine(&request(&["affinity:container==redis"]), fleet())
            .unwrap();
        assert_eq!(chosen.id, "engine-a");

        let chosen = scheduler()
            .select_engine(&request(&["affinity:container!=redis"]), fleet())
            .unwrap();
        assert_eq!(chosen.id, "engine-b");
    }

    #[test]
    fn empty_snapshot_reports_no_engine() {
        let err = scheduler()
            .select_engine(&request(&[]), Vec::new())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoEngineAvailable));
    }

    #[test]
    fn soft_affinity_prefers_but_does_not_require() {
        // Soft preference for the engine hosting redis.
        let chosen = scheduler()
            .select_engine(&request(&["affinity:container==~redis"]), fleet())
            .unwrap();
        assert_eq!(chosen.id, "engine-a");

        // Same soft preference with no redis anywhere: placement succeeds
        // on whatever is available instead of failing.
        let empty_fleet = vec![snapshot("engine-c", "node-c")];
        let chosen = scheduler()
            .select_engine(&request(&["affinity:container==~redis"]), empty_fleet)
            .unwrap();
        assert_eq!(chosen.id, "engine-c");
    }

    #[test]
    fn soft_constraint_deprioritizes() {
        // Spread alone would pick the emptier engine-b; the soft region
        // preference pulls the placement onto engine-a.
        let chosen = scheduler()
            .select_engine(&request(&["constraint:region==~us"]), fleet())
            .unwrap();
        assert_eq!(chosen.id, "engine-a");
    }

    #[test]
    fn unhealthy_engines_never_place() {
        let mut nodes = fleet();
        for node in &mut nodes {
            node.healthy = false;
        }
        let err = scheduler().select_engine(&request(&[]), nodes).unwrap_err();
        assert!(matches!(err, SchedulerError::NoHealthyEngine));
    }

    #[test]
    fn concurrent_calls_are_deterministic_on_the_same_snapshot() {
        let s = scheduler();
        let first = s
            .select_engine(&request(&["constraint:region==us"]), fleet())
            .unwrap();
        let second = s
            .select_engine(&request(&["constraint:region==us"]), fleet())
            .unwrap();
        assert_eq!(first.id, second.id);
    }
}
