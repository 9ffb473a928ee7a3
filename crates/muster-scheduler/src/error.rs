//! Placement error taxonomy.
//!
//! Placement errors are never retried silently — the caller always sees
//! which filter gave out and on which expression.

use thiserror::Error;

use crate::filter::expr::ExprError;

/// Result type alias for scheduling operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur while selecting an engine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no engine available")]
    NoEngineAvailable,

    #[error("no healthy engine available")]
    NoHealthyEngine,

    #[error("constraint failed: {0}")]
    ConstraintFailed(String),

    #[error("affinity failed: {0}")]
    AffinityFailed(String),

    #[error("unable to resolve dependency: {0}")]
    DependencyUnresolved(String),

    #[error("no engine with a free port for {0}")]
    PortConflict(String),

    #[error("no engine with free container slots")]
    NoSlotsAvailable,

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("placement deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Expr(#[from] ExprError),
}
