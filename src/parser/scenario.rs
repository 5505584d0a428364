//! Scenario parser
//!
//! Regroups the suites of one or more test files into scenarios: the
//! tests declared directly inside a suite form one scenario. Hooks are
//! attached, never invoked, so the scheduler can batch deployment.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::suite::{SuiteFile, SuiteSpec};
use super::ParseError;
use crate::models::{HookCall, Scenario, TestCase};
use crate::registry::Registry;
use crate::signer::LeaseRequest;

/// Scenarios to schedule plus the ones dropped by the grep filter
#[derive(Clone, Debug, Default)]
pub struct ParsedScenarios {
    pub scenarios: Vec<Scenario>,
    /// Display names of scenarios whose tests were all filtered out
    pub ignored: Vec<String>,
    pub files: usize,
}

impl ParsedScenarios {
    pub fn test_count(&self) -> usize {
        self.scenarios.iter().map(|s| s.tests.len()).sum()
    }
}

/// Builds scenarios from suite files
pub struct ScenarioParser<'a> {
    registry: &'a Registry,
    grep: Option<Regex>,
}

impl<'a> ScenarioParser<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            grep: None,
        }
    }

    /// Keep only tests whose full title matches `pattern`
    pub fn with_grep(mut self, pattern: Option<&str>) -> Result<Self, ParseError> {
        self.grep = match pattern {
            Some(p) => Some(Regex::new(p).map_err(|e| ParseError::InvalidGrep {
                pattern: p.to_string(),
                message: e.to_string(),
            })?),
            None => None,
        };
        Ok(self)
    }

    pub fn parse_files(&self, files: &[PathBuf]) -> Result<ParsedScenarios, ParseError> {
        let mut parsed = ParsedScenarios::default();

        for file in files {
            let content = std::fs::read_to_string(file).map_err(|e| ParseError::Io {
                path: file.clone(),
                message: e.to_string(),
            })?;
            let one = self.parse_str(&content, file)?;
            parsed.scenarios.extend(one.scenarios);
            parsed.ignored.extend(one.ignored);
            parsed.files += 1;
        }

        info!(
            "Parsed {} file(s): {} scenario(s), {} ignored",
            parsed.files,
            parsed.scenarios.len(),
            parsed.ignored.len()
        );
        Ok(parsed)
    }

    /// Parse one file's content; the path decides YAML or JSON
    pub fn parse_str(&self, content: &str, path: &Path) -> Result<ParsedScenarios, ParseError> {
        let syntax = |message: String| ParseError::Syntax {
            path: path.to_path_buf(),
            message,
        };

        let file: SuiteFile = if super::is_json_file(path) {
            serde_json::from_str(content).map_err(|e| syntax(e.to_string()))?
        } else {
            serde_yaml::from_str(content).map_err(|e| syntax(e.to_string()))?
        };

        let mut parsed = ParsedScenarios {
            files: 1,
            ..Default::default()
        };
        for suite in &file.suites {
            let mut describes = Vec::new();
            self.walk(suite, path, &mut describes, &[], LeaseRequest::default(), &mut parsed)?;
        }
        Ok(parsed)
    }

    fn walk(
        &self,
        suite: &SuiteSpec,
        path: &Path,
        describes: &mut Vec<String>,
        inherited_hooks: &[HookCall],
        inherited_signers: LeaseRequest,
        parsed: &mut ParsedScenarios,
    ) -> Result<(), ParseError> {
        if suite.describe.trim().is_empty() {
            return Err(ParseError::EmptyDescription {
                path: path.to_path_buf(),
            });
        }
        describes.push(suite.describe.clone());

        let mut hooks = inherited_hooks.to_vec();
        for hook in &suite.before {
            if !self.registry.has_hook(&hook.hook) {
                return Err(ParseError::UnknownHook {
                    path: path.to_path_buf(),
                    suite: suite.describe.clone(),
                    hook: hook.hook.clone(),
                });
            }
            hooks.push(HookCall::new(&hook.hook).with_args(hook.args.clone()));
        }
        let signers = suite.signers.unwrap_or(inherited_signers);

        if !suite.tests.is_empty() {
            let mut scenario = Scenario::new(describes.clone(), path).with_signers(signers);
            scenario.before_hooks = hooks.clone();

            for spec in &suite.tests {
                if !self.registry.has_test(&spec.run) {
                    return Err(ParseError::UnknownTest {
                        path: path.to_path_buf(),
                        test: spec.it.clone(),
                        handler: spec.run.clone(),
                    });
                }

                let mut test = TestCase::new(&spec.it, &spec.run).with_args(spec.args.clone());
                if let Some(expect) = &spec.expect {
                    test = test.with_expect(expect.clone());
                }
                if let Some(ms) = spec.timeout_ms {
                    test = test.with_timeout(Duration::from_millis(ms));
                }
                if spec.skip {
                    test = test.disabled();
                }

                if self.matches(&scenario, &test) {
                    scenario.tests.push(test);
                } else {
                    debug!("Filtered out \"{}\"", scenario.full_title(&test));
                }
            }

            if scenario.tests.is_empty() {
                debug!("Ignoring scenario {} (no matching tests)", scenario);
                parsed.ignored.push(scenario.to_string());
            } else {
                parsed.scenarios.push(scenario);
            }
        }

        for child in &suite.suites {
            self.walk(child, path, describes, &hooks, signers, parsed)?;
        }

        describes.pop();
        Ok(())
    }

    fn matches(&self, scenario: &Scenario, test: &TestCase) -> bool {
        self.grep
            .as_ref()
            .map_or(true, |re| re.is_match(&scenario.full_title(test)))
    }
}
