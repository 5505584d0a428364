//! Scenario models
//!
//! Defines scenarios, test cases and the tag conventions parsed from
//! suite and test descriptions.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::assertion::Expectation;
use crate::signer::LeaseRequest;

/// Marks every scenario below a suite as parallelizable
pub const PARALLEL_TAG: &str = "#parallel";

/// Marks a test as mutating chain state
pub const TRANSACTIONAL_TAG: &str = "@transactional";

/// Prefix of the block ordering tag (`@block-N`)
pub const BLOCK_TAG_PREFIX: &str = "@block-";

/// Tags recognised in a description string
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tags {
    pub block: Option<u64>,
    pub parallel: bool,
    pub transactional: bool,
}

impl Tags {
    /// Parse tags out of a whitespace-separated description
    pub fn parse(description: &str) -> Self {
        let mut tags = Tags::default();

        for token in description.split_whitespace() {
            if token == PARALLEL_TAG {
                tags.parallel = true;
            } else if token == TRANSACTIONAL_TAG {
                tags.transactional = true;
            } else if let Some(n) = token.strip_prefix(BLOCK_TAG_PREFIX) {
                // First well-formed tag wins
                if tags.block.is_none() {
                    tags.block = n.parse().ok();
                }
            }
        }

        tags
    }
}

/// A single test case inside a scenario
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub description: String,
    pub block_tag: Option<u64>,
    pub transactional: bool,
    pub disabled: bool,
    pub handler: String,
    #[serde(default)]
    pub args: Value,
    pub expect: Option<Expectation>,
    #[serde(with = "optional_millis")]
    pub timeout: Option<Duration>,
}

impl TestCase {
    pub fn new(description: impl Into<String>, handler: impl Into<String>) -> Self {
        let description = description.into();
        let tags = Tags::parse(&description);
        Self {
            description,
            block_tag: tags.block,
            transactional: tags.transactional,
            disabled: false,
            handler: handler.into(),
            args: Value::Null,
            expect: None,
            timeout: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_expect(mut self, expect: Expectation) -> Self {
        self.expect = Some(expect);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Ordering key; untagged tests sort as block 0
    pub fn block_key(&self) -> u64 {
        self.block_tag.unwrap_or(0)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

/// A named setup action attached to a scenario, resolved lazily by the scheduler
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HookCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl HookCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Value::Null,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

/// A group of ordered tests sharing setup state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    /// Description of the nearest enclosing suite
    pub name: String,
    /// Suite path from the file root down to this scenario
    pub describes: Vec<String>,
    pub file: PathBuf,
    /// Tests in declaration order
    pub tests: Vec<TestCase>,
    pub before_hooks: Vec<HookCall>,
    pub parallelizable: bool,
    pub signers: LeaseRequest,
}

impl Scenario {
    pub fn new(describes: Vec<String>, file: impl Into<PathBuf>) -> Self {
        let name = describes.last().cloned().unwrap_or_default();
        let parallelizable = describes.iter().any(|d| Tags::parse(d).parallel);
        Self {
            name,
            describes,
            file: file.into(),
            tests: Vec::new(),
            before_hooks: Vec::new(),
            parallelizable,
            signers: LeaseRequest::default(),
        }
    }

    pub fn with_test(mut self, test: TestCase) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_hook(mut self, hook: HookCall) -> Self {
        self.before_hooks.push(hook);
        self
    }

    pub fn with_signers(mut self, signers: LeaseRequest) -> Self {
        self.signers = signers;
        self
    }

    /// Tests in execution order: non-decreasing block tag, declaration
    /// order among equal tags.
    pub fn execution_order(&self) -> Vec<&TestCase> {
        let mut ordered: Vec<&TestCase> = self.tests.iter().collect();
        ordered.sort_by_key(|t| t.block_key());
        ordered
    }

    pub fn full_title(&self, test: &TestCase) -> String {
        let mut parts = self.describes.clone();
        parts.push(test.description.clone());
        parts.join(" ")
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describes.join(" > "))
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
