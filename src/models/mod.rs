//! Data models for scenario scheduling
//!
//! This module contains the scenario, assertion and result types used
//! throughout the application.

mod assertion;
mod scenario;
mod test_result;

pub use assertion::{as_integer, Expectation, Operator};
pub use scenario::{HookCall, Scenario, Tags, TestCase};
pub use test_result::{FailureReason, FailureResult, RunSummary, TestOutcome, TestStatus};
