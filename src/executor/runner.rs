//! Scenario runner
//!
//! Runs the tests of one scenario strictly in sequence. Every failure mode
//! of a test (error, panic, timeout, unmet expectation) is turned into an
//! outcome so the remaining tests still run.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::RunPhase;
use crate::chain::SharedChain;
use crate::models::{FailureReason, Scenario, TestCase, TestOutcome};
use crate::registry::{Registry, ScenarioState, TestContext};
use crate::signer::Signer;
use crate::utils::Timer;

/// Render a panic payload the way the default hook does
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Build a handler future and drive it, converting panics at either step
pub(crate) async fn guarded<T, Fut>(make: impl FnOnce() -> Fut) -> Result<T, String>
where
    Fut: Future<Output = T>,
{
    let fut = std::panic::catch_unwind(AssertUnwindSafe(make)).map_err(panic_message)?;
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_message)
}

/// Sequential executor for a single scenario
#[derive(Clone)]
pub struct ScenarioRunner {
    registry: Arc<Registry>,
    chain: SharedChain,
    phase: watch::Receiver<RunPhase>,
    test_timeout: Duration,
    confirmation_timeout: Duration,
}

impl ScenarioRunner {
    pub fn new(
        registry: Arc<Registry>,
        chain: SharedChain,
        phase: watch::Receiver<RunPhase>,
    ) -> Self {
        Self {
            registry,
            chain,
            phase,
            test_timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Run every test of `scenario` with the signers it leased
    pub async fn run(
        &self,
        scenario: &Scenario,
        signers: Vec<Signer>,
        state: ScenarioState,
    ) -> Vec<TestOutcome> {
        info!("Running scenario {} ({} tests)", scenario, scenario.tests.len());

        let mut outcomes = Vec::with_capacity(scenario.tests.len());
        for test in scenario.execution_order() {
            let outcome = self.run_test(scenario, test, &signers, &state).await;
            if outcome.status.is_failure() {
                let reason = outcome.reason.as_ref().map(ToString::to_string);
                warn!("  {} {}: {}", outcome.status.symbol(), test, reason.unwrap_or_default());
            } else {
                info!("  {}", outcome);
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn run_test(
        &self,
        scenario: &Scenario,
        test: &TestCase,
        signers: &[Signer],
        state: &ScenarioState,
    ) -> TestOutcome {
        let describes = &scenario.describes;

        if test.disabled {
            debug!("Skipping disabled test {}", test);
            return TestOutcome::disabled(describes, &test.description);
        }

        let Some(handler) = self.registry.test(&test.handler) else {
            let reason = FailureReason::error(format!("unknown test handler '{}'", test.handler));
            return TestOutcome::failed(describes, &test.description, 0, reason);
        };

        let budget = test.timeout.unwrap_or(self.test_timeout);
        let ctx = TestContext::new(
            self.chain.clone(),
            signers.to_vec(),
            state.clone(),
            self.phase.clone(),
        )
        .with_args(test.args.clone())
        .with_timeouts(budget, self.confirmation_timeout);

        let timer = Timer::start(test.description.as_str());
        let settled = tokio::time::timeout(budget, guarded(|| handler(ctx))).await;
        let elapsed = timer.elapsed_ms();

        let result = match settled {
            Err(_) => Err(FailureReason::Timeout {
                timeout_ms: budget.as_millis() as u64,
            }),
            Ok(Err(panic)) => Err(FailureReason::error(format!("panicked: {panic}"))),
            Ok(Ok(Err(reason))) => Err(reason),
            Ok(Ok(Ok(actual))) => match &test.expect {
                Some(expect) => expect.check(&actual),
                None => Ok(()),
            },
        };

        match result {
            Ok(()) => TestOutcome::passed(describes, &test.description, elapsed),
            Err(reason) => TestOutcome::failed(describes, &test.description, elapsed, reason),
        }
    }
}
