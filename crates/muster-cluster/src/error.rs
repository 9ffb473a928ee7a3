//! Coordinator error types.

use thiserror::Error;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors that can occur at the coordinator layer.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("engine is not connected")]
    NotConnected,

    #[error("engine was already added to the cluster")]
    AlreadyRegistered,

    #[error("no such engine: {0}")]
    EngineNotFound(String),

    #[error("no such container: {0}")]
    ContainerNotFound(String),

    #[error(transparent)]
    Engine(#[from] muster_engine::EngineError),

    #[error(transparent)]
    Scheduler(#[from] muster_scheduler::SchedulerError),

    #[error(transparent)]
    Store(#[from] muster_store::StoreError),
}
