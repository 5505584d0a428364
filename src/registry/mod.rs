//! Handler registry
//!
//! Test files refer to test bodies and setup hooks by name. A `Registry`
//! maps those names to async handlers and is handed to the parser and the
//! scheduler explicitly.

mod builtin;
mod context;

pub use context::{HookContext, ScenarioState, TestContext};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::models::FailureReason;

/// Test body: returns the actual value checked against the test's expectation
pub type TestHandler =
    Arc<dyn Fn(TestContext) -> BoxFuture<'static, Result<Value, FailureReason>> + Send + Sync>;

/// Setup action run during the deployment stage
pub type HookHandler =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Named test and hook handlers
#[derive(Clone, Default)]
pub struct Registry {
    tests: HashMap<String, TestHandler>,
    hooks: HashMap<String, HookHandler>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn register_test<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FailureReason>> + Send + 'static,
    {
        let boxed: TestHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.tests.insert(name.into(), boxed);
        self
    }

    pub fn register_hook<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: HookHandler = Arc::new(move |ctx| handler(ctx).boxed());
        self.hooks.insert(name.into(), boxed);
        self
    }

    pub fn test(&self, name: &str) -> Option<TestHandler> {
        self.tests.get(name).cloned()
    }

    pub fn hook(&self, name: &str) -> Option<HookHandler> {
        self.hooks.get(name).cloned()
    }

    pub fn has_test(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn test_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tests.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn hook_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tests", &self.test_names())
            .field("hooks", &self.hook_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_present() {
        let registry = Registry::with_builtins();
        let tests = [
            "balance",
            "nonce",
            "block_number",
            "transfer",
            "wait_blocks",
            "echo",
            "sleep",
            "state",
        ];
        for name in tests {
            assert!(registry.has_test(name), "missing test handler {name}");
        }
        for name in ["ping", "deploy", "set", "require_funds"] {
            assert!(registry.has_hook(name), "missing hook handler {name}");
        }
    }

    #[tokio::test]
    async fn test_register_closure() {
        let mut registry = Registry::new();
        registry.register_test("answer", |_ctx| async { Ok::<_, FailureReason>(json!(42)) });

        let handler = registry.test("answer").unwrap();
        let value = handler(TestContext::detached()).await.unwrap();
        assert_eq!(value, json!(42));
        assert!(registry.test("missing").is_none());
    }

    #[test]
    fn test_debug_lists_names() {
        let mut registry = Registry::new();
        registry.register_hook("setup", |_ctx| async { Ok::<(), anyhow::Error>(()) });
        let debug = format!("{registry:?}");
        assert!(debug.contains("setup"));
    }
}
