//! Test execution engine
//!
//! Provides the stage wrapper, the per-scenario runner and the parallel
//! scheduler that ties them together.

mod runner;
mod scheduler;
mod stage;

pub use runner::ScenarioRunner;
pub use scheduler::{ParallelScheduler, RunPhase, SchedulerError};
pub use stage::{StageRecord, StageRunner, StageStatus};
