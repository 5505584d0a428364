//! Parallel scheduler
//!
//! Drives a full run: parse, deploy every scenario's hooks behind a global
//! barrier, execute scenarios concurrently on leased signers, then build
//! the run summary.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::runner::{guarded, ScenarioRunner};
use super::stage::{StageRecord, StageRunner};
use crate::chain::SharedChain;
use crate::models::{FailureReason, RunSummary, Scenario, TestOutcome};
use crate::parser::{ParseError, ParsedScenarios, ScenarioParser};
use crate::registry::{HookContext, Registry, ScenarioState};
use crate::signer::{PoolError, Signer, SignerKind, SignerPool};

/// `ScenarioState` key holding the address that ran the scenario's hooks
pub const DEPLOYER_KEY: &str = "deployer";

/// Phase of a run, published to every handler context
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Parsing,
    Deploying,
    Executing,
    Reporting,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Parsing => "parsing",
            RunPhase::Deploying => "deploying",
            RunPhase::Executing => "executing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// Errors that terminate a run
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Deployment failed for scenario \"{scenario}\" (hook '{hook}'): {reason}")]
    DeploymentFailure {
        scenario: String,
        hook: String,
        reason: String,
    },

    #[error("Scenario \"{scenario}\" cannot be scheduled: {source}")]
    PoolExhausted {
        scenario: String,
        #[source]
        source: PoolError,
    },

    #[error("Signer pool already initialized")]
    PoolAlreadyInitialized,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<PoolError> for SchedulerError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::AlreadyInitialized => SchedulerError::PoolAlreadyInitialized,
            other => SchedulerError::Config(other.to_string()),
        }
    }
}

/// Orchestrates parse, deploy, execute and aggregation
pub struct ParallelScheduler {
    registry: Arc<Registry>,
    chain: SharedChain,
    pool: Arc<SignerPool>,
    test_timeout: Duration,
    confirmation_timeout: Duration,
    phase: watch::Sender<RunPhase>,
    stages: StageRunner,
}

impl ParallelScheduler {
    pub fn new(registry: Arc<Registry>, chain: SharedChain, pool: Arc<SignerPool>) -> Self {
        let (phase, _) = watch::channel(RunPhase::Parsing);
        Self {
            registry,
            chain,
            pool,
            test_timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(30),
            phase,
            stages: StageRunner::new(),
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

    pub fn with_stages(mut self, stages: StageRunner) -> Self {
        self.stages = stages;
        self
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn stages(&self) -> &[StageRecord] {
        self.stages.records()
    }

    fn enter(&self, phase: RunPhase) {
        debug!("Entering phase {}", phase);
        self.phase.send_replace(phase);
    }

    /// Full run over `files`, keeping only tests matching `grep`
    pub async fn run(
        &mut self,
        files: &[PathBuf],
        grep: Option<&str>,
    ) -> Result<RunSummary, SchedulerError> {
        self.enter(RunPhase::Parsing);
        let registry = self.registry.clone();
        let parsed = self
            .stages
            .run(
                "Parsing test files",
                async {
                    ScenarioParser::new(&registry)
                        .with_grep(grep)?
                        .parse_files(files)
                },
                |p: &ParsedScenarios| format!("Found {} scenarios to run", p.scenarios.len()),
            )
            .await?;

        self.run_parsed(parsed).await
    }

    /// Run already-parsed scenarios from the deployment stage on
    pub async fn run_parsed(&mut self, parsed: ParsedScenarios) -> Result<RunSummary, SchedulerError> {
        let started_at = Utc::now();
        let ParsedScenarios {
            scenarios, ignored, ..
        } = parsed;

        for name in &ignored {
            info!("Ignoring scenario {} (no tests match)", name);
        }
        self.check_capacity(&scenarios).await?;

        self.enter(RunPhase::Deploying);
        let deployments = {
            let deploy = deploy_all(
                &scenarios,
                self.chain.clone(),
                self.pool.clone(),
                self.registry.clone(),
                self.confirmation_timeout,
            );
            self.stages
                .run("Deploying", deploy, |deployments: &Vec<Deployment>| {
                    format!("{} scenario(s) set up", deployments.len())
                })
                .await
        };
        let deployments = match deployments {
            Ok(deployments) => deployments,
            Err(e) => {
                self.enter(RunPhase::Done);
                return Err(e);
            }
        };

        self.enter(RunPhase::Executing);
        let runner = ScenarioRunner::new(self.registry.clone(), self.chain.clone(), self.subscribe())
            .with_test_timeout(self.test_timeout)
            .with_confirmation_timeout(self.confirmation_timeout);
        let scenario_count = scenarios.len();
        let execute = execute_all(scenarios, deployments, runner, self.pool.clone());
        let outcomes = self
            .stages
            .run("Executing", execute, |outcomes: &Vec<TestOutcome>| {
                format!("{} test(s) in {} scenario(s)", outcomes.len(), scenario_count)
            })
            .await?;

        self.enter(RunPhase::Reporting);
        let summary = RunSummary::new(started_at, scenario_count, outcomes)
            .with_ignored(ignored)
            .with_signers_used(self.pool.peak_leased().await);
        info!(
            "Run finished: {} passed, {} failed, {} timed out",
            summary.passed, summary.failed, summary.timed_out
        );

        self.enter(RunPhase::Done);
        Ok(summary)
    }

    /// Every lease request must fit in the pool, or waiting would never end
    async fn check_capacity(&self, scenarios: &[Scenario]) -> Result<(), SchedulerError> {
        let (evm, native) = self.pool.total().await;
        for scenario in scenarios {
            for kind in SignerKind::all() {
                let requested = scenario.signers.of(kind);
                let available = match kind {
                    SignerKind::Evm => evm,
                    SignerKind::Native => native,
                };
                if requested > available {
                    return Err(SchedulerError::PoolExhausted {
                        scenario: scenario.to_string(),
                        source: PoolError::Exhausted {
                            kind,
                            requested,
                            available,
                        },
                    });
                }
            }
        }
        Ok(())
    }
}

/// What a scenario's hooks left behind for its tests
#[derive(Clone, Debug, Default)]
struct Deployment {
    state: ScenarioState,
    /// Account the hooks ran as; the scenario's tests lease it again
    deployer: Option<Signer>,
}

/// Run every scenario's hooks concurrently; all must succeed
async fn deploy_all(
    scenarios: &[Scenario],
    chain: SharedChain,
    pool: Arc<SignerPool>,
    registry: Arc<Registry>,
    confirmation_timeout: Duration,
) -> Result<Vec<Deployment>, SchedulerError> {
    let deployments = scenarios.iter().map(|scenario| {
        deploy_scenario(
            scenario,
            chain.clone(),
            pool.clone(),
            registry.clone(),
            confirmation_timeout,
        )
    });

    // Wait for every deployment to settle before judging any of them
    join_all(deployments).await.into_iter().collect()
}

async fn deploy_scenario(
    scenario: &Scenario,
    chain: SharedChain,
    pool: Arc<SignerPool>,
    registry: Arc<Registry>,
    confirmation_timeout: Duration,
) -> Result<Deployment, SchedulerError> {
    let state = ScenarioState::new();
    if scenario.before_hooks.is_empty() {
        return Ok(Deployment::default());
    }

    let signer = match scenario.signers.primary_kind() {
        Some(kind) => Some(pool.lease(kind).await.map_err(|source| {
            SchedulerError::PoolExhausted {
                scenario: scenario.to_string(),
                source,
            }
        })?),
        None => None,
    };
    if let Some(signer) = &signer {
        state.set(DEPLOYER_KEY, Value::String(signer.address.clone())).await;
    }

    let mut result = Ok(());
    for hook in &scenario.before_hooks {
        let failure = |reason: String| SchedulerError::DeploymentFailure {
            scenario: scenario.to_string(),
            hook: hook.name.clone(),
            reason,
        };

        let Some(handler) = registry.hook(&hook.name) else {
            result = Err(failure("hook is not registered".to_string()));
            break;
        };

        let ctx = HookContext::new(chain.clone(), state.clone(), scenario.to_string())
            .with_signer(signer.clone())
            .with_args(hook.args.clone())
            .with_confirmation_timeout(confirmation_timeout);

        debug!("[{}] running hook {}", scenario, hook.name);
        match guarded(|| handler(ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                result = Err(failure(format!("{e:#}")));
                break;
            }
            Err(panic) => {
                result = Err(failure(format!("panicked: {panic}")));
                break;
            }
        }
    }

    if let Some(signer) = &signer {
        pool.release(signer).await;
    }
    result?;

    debug!("[{}] state after hooks: {:?}", scenario, state.snapshot().await);
    Ok(Deployment {
        state,
        deployer: signer,
    })
}

/// Parallel scenarios run concurrently; the rest follow one at a time
async fn execute_all(
    scenarios: Vec<Scenario>,
    deployments: Vec<Deployment>,
    runner: ScenarioRunner,
    pool: Arc<SignerPool>,
) -> Result<Vec<TestOutcome>, SchedulerError> {
    let (parallel, serial): (Vec<_>, Vec<_>) = scenarios
        .into_iter()
        .zip(deployments)
        .partition(|(scenario, _)| scenario.parallelizable);

    info!(
        "Executing {} parallel and {} serial scenario(s)",
        parallel.len(),
        serial.len()
    );

    let mut handles = Vec::new();
    for (scenario, deployment) in parallel {
        let runner = runner.clone();
        let pool = pool.clone();
        let name = scenario.to_string();
        let describes = scenario.describes.clone();
        let tests: Vec<String> = scenario.tests.iter().map(|t| t.description.clone()).collect();

        let handle = tokio::spawn(async move {
            execute_scenario(&scenario, deployment, &runner, &pool).await
        });
        handles.push((name, describes, tests, handle));
    }

    let mut outcomes = Vec::new();
    let joined = join_all(handles.into_iter().map(|(name, describes, tests, handle)| async move {
        (name, describes, tests, handle.await)
    }))
    .await;

    for (name, describes, tests, joined) in joined {
        match joined {
            Ok(result) => outcomes.extend(result?),
            Err(e) => {
                error!("Scenario {} aborted: {}", name, e);
                let reason = FailureReason::error(format!("scenario task aborted: {e}"));
                outcomes.extend(
                    tests
                        .iter()
                        .map(|t| TestOutcome::failed(&describes, t, 0, reason.clone())),
                );
            }
        }
    }

    for (scenario, deployment) in serial {
        outcomes.extend(execute_scenario(&scenario, deployment, &runner, &pool).await?);
    }

    Ok(outcomes)
}

async fn execute_scenario(
    scenario: &Scenario,
    deployment: Deployment,
    runner: &ScenarioRunner,
    pool: &SignerPool,
) -> Result<Vec<TestOutcome>, SchedulerError> {
    let Deployment { state, deployer } = deployment;
    let signers = pool
        .lease_with(&scenario.signers, deployer.as_slice())
        .await
        .map_err(|source| SchedulerError::PoolExhausted {
            scenario: scenario.to_string(),
            source,
        })?;
    debug!("[{}] leased {} signer(s)", scenario, signers.len());

    let outcomes = runner.run(scenario, signers.clone(), state).await;
    pool.release_all(&signers).await;
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChain;
    use crate::models::{HookCall, TestCase, TestStatus};
    use crate::registry::{HookContext, TestContext};
    use crate::signer::{LeaseRequest, PrivateKey, Signer};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn evm(n: u8) -> Signer {
        Signer::new(format!("0x{:040x}", n), SignerKind::Evm)
    }

    async fn pool_of(n: u8) -> Arc<SignerPool> {
        let pool = Arc::new(SignerPool::new());
        let signers: Vec<Signer> = (1..=n).map(evm).collect();
        let keys = signers.iter().map(|_| PrivateKey::new("0x01")).collect();
        pool.init_signers(signers, keys).await.unwrap();
        pool
    }

    async fn scheduler(registry: Registry, signers: u8) -> ParallelScheduler {
        ParallelScheduler::new(
            Arc::new(registry),
            Arc::new(MemoryChain::new()),
            pool_of(signers).await,
        )
        .with_test_timeout(Duration::from_millis(200))
        .with_stages(StageRunner::quiet())
    }

    fn parsed(scenarios: Vec<Scenario>) -> ParsedScenarios {
        ParsedScenarios {
            scenarios,
            ignored: Vec::new(),
            files: 1,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_grep() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("suite.yaml");
        std::fs::write(
            &file,
            r#"
suites:
  - describe: "A #parallel"
    tests:
      - it: "a1 @block-1"
        run: echo
        args: { value: 1 }
        expect: { value: 1 }
      - it: "a2 @block-2"
        run: echo
  - describe: "B"
    tests:
      - it: "b1"
        run: echo
"#,
        )
        .unwrap();

        let mut scheduler = scheduler(Registry::with_builtins(), 2).await;
        let summary = scheduler.run(&[file], Some("a1")).await.unwrap();

        assert_eq!(scheduler.stages()[0].detail, "Found 1 scenarios to run");
        assert_eq!(summary.scenarios, 1);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.ignored, vec!["B"]);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(scheduler.phase(), RunPhase::Done);
    }

    #[tokio::test]
    async fn test_deployment_barrier() {
        let settled = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(Mutex::new(Vec::new()));

        let mut registry = Registry::new();
        let counter = settled.clone();
        registry.register_hook("slow_setup", move |ctx: HookContext| {
            let counter = counter.clone();
            async move {
                let ms: u64 = ctx.arg("ms")?.unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });
        let (counter, seen) = (settled.clone(), observed.clone());
        registry.register_test("observe", move |ctx: TestContext| {
            let (counter, seen) = (counter.clone(), seen.clone());
            async move {
                let snapshot = (ctx.phase(), counter.load(Ordering::SeqCst));
                seen.lock().unwrap().push(snapshot);
                Ok::<_, FailureReason>(Value::Null)
            }
        });

        let scenarios = (0..3u64)
            .map(|i| {
                Scenario::new(vec![format!("S{i} #parallel")], "s.yaml")
                    .with_hook(HookCall::new("slow_setup").with_args(json!({"ms": 10 * (3 - i)})))
                    .with_test(TestCase::new("t", "observe"))
            })
            .collect();

        let mut scheduler = scheduler(registry, 3).await;
        let summary = scheduler.run_parsed(parsed(scenarios)).await.unwrap();

        assert_eq!(summary.passed, 3);
        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 3);
        for (phase, hooks_done) in observed.iter() {
            assert_eq!(*phase, RunPhase::Executing);
            assert_eq!(*hooks_done, 3);
        }
    }

    #[tokio::test]
    async fn test_deployment_failure_aborts_run() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::with_builtins();
        registry.register_hook("broken", |_ctx| async {
            Err::<(), anyhow::Error>(anyhow::anyhow!("contract reverted"))
        });
        let counter = ran.clone();
        registry.register_test("count", move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FailureReason>(Value::Null)
            }
        });

        let scenarios = vec![
            Scenario::new(vec!["Good #parallel".into()], "s.yaml")
                .with_hook(HookCall::new("ping"))
                .with_test(TestCase::new("t", "count")),
            Scenario::new(vec!["Bad #parallel".into()], "s.yaml")
                .with_hook(HookCall::new("broken"))
                .with_test(TestCase::new("t", "count")),
        ];

        let mut scheduler = scheduler(registry, 2).await;
        let err = scheduler.run_parsed(parsed(scenarios)).await.unwrap_err();

        match &err {
            SchedulerError::DeploymentFailure { scenario, hook, reason } => {
                assert_eq!(scenario, "Bad #parallel");
                assert_eq!(hook, "broken");
                assert!(reason.contains("contract reverted"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(scheduler.stages().last().unwrap().detail.contains("contract reverted"));
        // Hook signers are back in the pool
        assert_eq!(scheduler.pool.count().await, (2, 0));
    }

    #[tokio::test]
    async fn test_serial_scenario_never_interleaves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::with_builtins();
        let events = log.clone();
        registry.register_test("mark", move |ctx: TestContext| {
            let events = events.clone();
            async move {
                let label: String = ctx.arg("label")?.unwrap_or_default();
                let ms: u64 = ctx.arg("ms")?.unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                events.lock().unwrap().push(label);
                Ok::<_, FailureReason>(Value::Null)
            }
        });

        // B is declared first but must wait for the parallel batch
        let scenarios = vec![
            Scenario::new(vec!["B".into()], "s.yaml").with_test(
                TestCase::new("b1", "mark").with_args(json!({"label": "b"})),
            ),
            Scenario::new(vec!["A #parallel".into()], "s.yaml").with_test(
                TestCase::new("a1", "mark").with_args(json!({"label": "a", "ms": 40})),
            ),
            Scenario::new(vec!["C #parallel".into()], "s.yaml").with_test(
                TestCase::new("c1", "mark").with_args(json!({"label": "c", "ms": 20})),
            ),
        ];

        let mut scheduler = scheduler(registry, 3).await;
        let summary = scheduler.run_parsed(parsed(scenarios)).await.unwrap();

        assert_eq!(summary.passed, 3);
        assert_eq!(*log.lock().unwrap(), vec!["c", "a", "b"]);
        assert_eq!(summary.signers_used, 2);
        assert_eq!(scheduler.pool.count().await, (3, 0));
    }

    #[tokio::test]
    async fn test_tests_run_as_the_hook_signer() {
        let mut registry = Registry::with_builtins();
        registry.register_hook("remember_signer", |ctx: HookContext| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let address = ctx.signer()?.address.clone();
            ctx.state.set("hook_signer", json!(address)).await;
            Ok::<(), anyhow::Error>(())
        });
        registry.register_test("same_signer", |ctx: TestContext| async move {
            let current = ctx.signer(SignerKind::Evm)?.address.clone();
            let hook = ctx.state.get("hook_signer").await;
            let deployer = ctx.state.get(DEPLOYER_KEY).await;
            if hook != Some(json!(current)) || deployer != hook {
                return Err(FailureReason::error(format!(
                    "hook signer {hook:?} != test signer {current}"
                )));
            }
            Ok(Value::Null)
        });

        // B deploys first but executes last, after A has run
        let scenarios = vec![
            Scenario::new(vec!["B".into()], "s.yaml")
                .with_signers(LeaseRequest::new(1, 0))
                .with_hook(HookCall::new("remember_signer"))
                .with_test(TestCase::new("b1", "same_signer")),
            Scenario::new(vec!["A #parallel".into()], "s.yaml")
                .with_signers(LeaseRequest::new(1, 0))
                .with_hook(HookCall::new("remember_signer"))
                .with_test(TestCase::new("a1", "same_signer")),
        ];

        let mut scheduler = scheduler(registry, 2).await;
        let summary = scheduler.run_parsed(parsed(scenarios)).await.unwrap();

        assert_eq!(summary.failures(), Vec::new());
        assert_eq!(summary.passed, 2);
        assert_eq!(scheduler.pool.count().await, (2, 0));
    }

    #[tokio::test]
    async fn test_failures_and_timeouts_are_counted() {
        let mut registry = Registry::with_builtins();
        registry.register_test("reject", |_ctx| async {
            Err::<Value, _>(FailureReason::error("boom"))
        });

        let scenarios = vec![Scenario::new(vec!["Mixed #parallel".into()], "s.yaml")
            .with_test(TestCase::new("ok", "echo"))
            .with_test(TestCase::new("rejects", "reject"))
            .with_test(TestCase::new("hangs", "sleep").with_args(json!({"ms": 5_000})))
            .with_test(TestCase::new("after", "echo"))
            .with_test(TestCase::new("todo", "echo").disabled())];

        let mut scheduler = scheduler(registry, 1).await;
        let summary = scheduler.run_parsed(parsed(scenarios)).await.unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.disabled, 1);
        assert_eq!(summary.exit_code(), 1);

        let failures = summary.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].test_case, "hangs");
        assert!(failures[1].reason.is_timeout());
        let statuses: Vec<TestStatus> = summary.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(statuses[3], TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_oversized_request_is_pool_exhausted() {
        let scenarios = vec![Scenario::new(vec!["Greedy #parallel".into()], "s.yaml")
            .with_signers(LeaseRequest::new(0, 1))
            .with_test(TestCase::new("t", "echo"))];

        let mut scheduler = scheduler(Registry::with_builtins(), 2).await;
        let err = scheduler.run_parsed(parsed(scenarios)).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::PoolExhausted {
                source: PoolError::Exhausted {
                    kind: SignerKind::Native,
                    ..
                },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_scenarios_share_state_from_hooks() {
        let scenarios = vec![Scenario::new(vec!["Stateful #parallel".into()], "s.yaml")
            .with_hook(HookCall::new("set").with_args(json!({"key": "greeting", "value": "hi"})))
            .with_test(
                TestCase::new("reads hook state", "state")
                    .with_args(json!({"key": "greeting"}))
                    .with_expect(crate::models::Expectation::equal(json!("hi"))),
            )];

        let mut scheduler = scheduler(Registry::with_builtins(), 1).await;
        let summary = scheduler.run_parsed(parsed(scenarios)).await.unwrap();
        assert_eq!(summary.passed, 1);
    }
}
