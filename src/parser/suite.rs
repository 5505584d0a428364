//! Suite file format
//!
//! Test files describe a tree of suites, each with optional setup hooks,
//! tests and nested suites. YAML and JSON are both accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Expectation;
use crate::signer::LeaseRequest;

/// Root of a test file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteFile {
    #[serde(default)]
    pub suites: Vec<SuiteSpec>,
}

/// A `describe` block
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteSpec {
    pub describe: String,

    /// Signers leased by every scenario below, unless overridden
    #[serde(default)]
    pub signers: Option<LeaseRequest>,

    #[serde(default)]
    pub before: Vec<HookSpec>,

    #[serde(default)]
    pub tests: Vec<TestSpec>,

    #[serde(default)]
    pub suites: Vec<SuiteSpec>,
}

/// An `it` block
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    pub it: String,

    /// Registered test handler name
    pub run: String,

    #[serde(default)]
    pub args: Value,

    #[serde(default)]
    pub expect: Option<Expectation>,

    #[serde(default)]
    pub skip: bool,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A `before` hook
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    pub hook: String,

    #[serde(default)]
    pub args: Value,
}
