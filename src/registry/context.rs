//! Explicit contexts passed to handlers
//!
//! Everything a hook or test may touch arrives through its context; there
//! is no ambient "current test" state.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::chain::SharedChain;
use crate::executor::RunPhase;
use crate::models::FailureReason;
use crate::signer::{Signer, SignerKind};

/// Keyed values shared by one scenario's hooks and tests
#[derive(Clone, Debug, Default)]
pub struct ScenarioState {
    values: Arc<RwLock<Map<String, Value>>>,
}

impl ScenarioState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.values.write().await.insert(key.into(), value);
    }

    pub async fn snapshot(&self) -> Map<String, Value> {
        self.values.read().await.clone()
    }
}

/// Read an optional named argument
fn read_arg<T: DeserializeOwned>(args: &Value, name: &str) -> Result<Option<T>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| format!("invalid argument '{name}': {e}")),
    }
}

/// Context handed to a test handler
#[derive(Clone)]
pub struct TestContext {
    pub chain: SharedChain,
    /// Signers leased by the enclosing scenario
    pub signers: Vec<Signer>,
    pub state: ScenarioState,
    pub args: Value,
    /// Time budget of this test
    pub timeout: Duration,
    pub confirmation_timeout: Duration,
    phase: watch::Receiver<RunPhase>,
}

impl TestContext {
    pub fn new(
        chain: SharedChain,
        signers: Vec<Signer>,
        state: ScenarioState,
        phase: watch::Receiver<RunPhase>,
    ) -> Self {
        Self {
            chain,
            signers,
            state,
            args: Value::Null,
            timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(30),
            phase,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeouts(mut self, timeout: Duration, confirmation_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.confirmation_timeout = confirmation_timeout;
        self
    }

    /// Scheduler phase at the time of the call
    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// First leased signer of a kind
    pub fn signer(&self, kind: SignerKind) -> Result<&Signer, FailureReason> {
        self.signers
            .iter()
            .find(|s| s.kind == kind)
            .ok_or_else(|| FailureReason::error(format!("scenario holds no {kind} signer")))
    }

    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, FailureReason> {
        read_arg(&self.args, name).map_err(FailureReason::error)
    }

    #[cfg(test)]
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(RunPhase::Executing);
        Self::new(
            Arc::new(crate::chain::MemoryChain::new()),
            Vec::new(),
            ScenarioState::new(),
            rx,
        )
    }
}

/// Context handed to a setup hook
#[derive(Clone)]
pub struct HookContext {
    pub chain: SharedChain,
    /// Signer leased for the duration of the scenario's hooks, if any
    pub signer: Option<Signer>,
    pub state: ScenarioState,
    pub args: Value,
    pub scenario: String,
    pub confirmation_timeout: Duration,
}

impl HookContext {
    pub fn new(chain: SharedChain, state: ScenarioState, scenario: impl Into<String>) -> Self {
        Self {
            chain,
            signer: None,
            state,
            args: Value::Null,
            scenario: scenario.into(),
            confirmation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_signer(mut self, signer: Option<Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn signer(&self) -> anyhow::Result<&Signer> {
        self.signer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("scenario '{}' leases no signer", self.scenario))
    }

    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        read_arg(&self.args, name).map_err(anyhow::Error::msg)
    }

    pub fn require_arg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        self.arg(name)?
            .ok_or_else(|| anyhow::anyhow!("missing argument '{name}'"))
    }
}
