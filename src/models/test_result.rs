//! Test result models
//!
//! Defines per-test outcomes, failure records and the run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    TimedOut,
    Disabled,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::TimedOut => "⏱",
            TestStatus::Disabled => "○",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::TimedOut)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::TimedOut => write!(f, "TIMEOUT"),
            TestStatus::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Why a test did not pass
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("AssertionError: expected {actual} {operator} {expected}")]
    Assertion {
        actual: Value,
        expected: Value,
        operator: String,
    },

    #[error("{message}")]
    Error { message: String },

    #[error("Timeout of {timeout_ms}ms exceeded")]
    Timeout { timeout_ms: u64 },
}

impl FailureReason {
    pub fn error(message: impl Into<String>) -> Self {
        FailureReason::Error {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureReason::Timeout { .. })
    }
}

impl From<anyhow::Error> for FailureReason {
    fn from(e: anyhow::Error) -> Self {
        FailureReason::error(format!("{e:#}"))
    }
}

impl From<crate::chain::ChainError> for FailureReason {
    fn from(e: crate::chain::ChainError) -> Self {
        FailureReason::error(e.to_string())
    }
}

/// A failed or timed-out test, as consumed by the reporter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureResult {
    pub describes: Vec<String>,
    pub test_case: String,
    pub reason: FailureReason,
}

/// Result of a single test execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestOutcome {
    pub scenario: String,
    pub describes: Vec<String>,
    pub description: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub reason: Option<FailureReason>,
}

impl TestOutcome {
    pub fn passed(describes: &[String], description: &str, duration_ms: u64) -> Self {
        Self::build(describes, description, TestStatus::Passed, duration_ms, None)
    }

    pub fn failed(
        describes: &[String],
        description: &str,
        duration_ms: u64,
        reason: FailureReason,
    ) -> Self {
        let status = if reason.is_timeout() {
            TestStatus::TimedOut
        } else {
            TestStatus::Failed
        };
        Self::build(describes, description, status, duration_ms, Some(reason))
    }

    pub fn disabled(describes: &[String], description: &str) -> Self {
        Self::build(describes, description, TestStatus::Disabled, 0, None)
    }

    fn build(
        describes: &[String],
        description: &str,
        status: TestStatus,
        duration_ms: u64,
        reason: Option<FailureReason>,
    ) -> Self {
        Self {
            scenario: describes.last().cloned().unwrap_or_default(),
            describes: describes.to_vec(),
            description: description.to_string(),
            status,
            duration_ms,
            reason,
        }
    }

    /// Failure record for failed and timed-out outcomes
    pub fn failure(&self) -> Option<FailureResult> {
        self.reason.as_ref().map(|reason| FailureResult {
            describes: self.describes.clone(),
            test_case: self.description.clone(),
            reason: reason.clone(),
        })
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} > {} [{}ms]",
            self.status.symbol(),
            self.scenario,
            self.description,
            self.duration_ms
        )?;
        if let Some(reason) = &self.reason {
            write!(f, " - {reason}")?;
        }
        Ok(())
    }
}

/// Summary of a complete scheduler run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scenarios: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub disabled: usize,
    pub duration_ms: u64,
    pub signers_used: usize,
    pub ignored: Vec<String>,
    pub outcomes: Vec<TestOutcome>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>, scenarios: usize, outcomes: Vec<TestOutcome>) -> Self {
        let count = |status: TestStatus| outcomes.iter().filter(|o| o.status == status).count();
        let finished_at = Utc::now();

        Self {
            started_at,
            finished_at,
            scenarios,
            total: outcomes.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            timed_out: count(TestStatus::TimedOut),
            disabled: count(TestStatus::Disabled),
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            signers_used: 0,
            ignored: Vec::new(),
            outcomes,
        }
    }

    pub fn with_ignored(mut self, ignored: Vec<String>) -> Self {
        self.ignored = ignored;
        self
    }

    pub fn with_signers_used(mut self, used: usize) -> Self {
        self.signers_used = used;
        self
    }

    /// Failure records in execution order
    pub fn failures(&self) -> Vec<FailureResult> {
        self.outcomes.iter().filter_map(|o| o.failure()).collect()
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        if self.is_all_passed() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Total: {} | Passed: {} | Failed: {} | Timed out: {} | Disabled: {}",
            self.total, self.passed, self.failed, self.timed_out, self.disabled
        )?;
        write!(
            f,
            "Scenarios: {} | Signers used: {} | Duration: {}ms",
            self.scenarios, self.signers_used, self.duration_ms
        )
    }
}
