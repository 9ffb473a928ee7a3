//! muster-scheduler — the placement pipeline.
//!
//! Turns a container request into a chosen engine in three steps:
//!
//! 1. **Filters** narrow the candidate snapshots (health, port,
//!    dependency, constraint, affinity, slots). The first filter to empty
//!    the set fails the placement and names the offending expression.
//! 2. **Soft partition** — survivors preferred by soft (`~`) expressions
//!    are ranked first, the rest serve as fallback.
//! 3. A **strategy** (spread, binpack, random) orders the survivors; the
//!    top element wins.
//!
//! Filters and strategies are pure functions over [`EngineSnapshot`]s; the
//! scheduler holds no state and is safe to call concurrently.

pub mod error;
pub mod filter;
pub mod scheduler;
pub mod strategy;

pub use error::{SchedulerError, SchedulerResult};
pub use filter::{filters_by_name, Filter, DEFAULT_FILTERS};
pub use scheduler::Scheduler;
pub use strategy::{strategy_by_name, Strategy, DEFAULT_STRATEGY};

pub use muster_engine::EngineSnapshot;
