//! paratest - Parallel acceptance-test scheduler for blockchain networks
//!
//! Runs suites of acceptance tests against a shared, stateful chain while
//! keeping concurrently running scenarios on disjoint signers.
//!
//! ## Features
//!
//! - Suites described in YAML or JSON, tests bound to registered handlers
//! - `#parallel` suites run concurrently, the rest one at a time
//! - `@block-N` ordering tags inside a scenario
//! - Global deployment barrier before any test runs
//! - Per-test timeouts, reported apart from assertion failures
//! - Table, summary and JSON reports
//!
//! ## Usage
//!
//! ```bash
//! # Run every suite under the configured tests directory
//! paratest run
//!
//! # Run only matching tests from one file
//! paratest run --file tests/parallel/token.yaml --grep "transfer"
//!
//! # Run against a configured network
//! paratest run --network testnet --format json --output report.json
//!
//! # Inspect how suites are grouped into scenarios
//! paratest list --detailed
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

mod chain;
mod cli;
mod config;
mod executor;
mod models;
mod output;
mod parser;
mod registry;
mod signer;
mod utils;

use chain::{MemoryChain, RpcClient, SharedChain};
use cli::Args;
use config::{AppConfig, ConfigFile, EnvConfig};
use executor::{ParallelScheduler, StageRunner};
use output::{OutputFormat, ResultReporter};
use parser::{discover_test_files, ScenarioParser};
use registry::Registry;
use signer::SignerPool;
use utils::{init_logger, LogLevel, Timer};

// Scenarios interleave cooperatively on one thread, so a handler never
// races another handler's state mid-step
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let args = Args::parse();
    let env = EnvConfig::load();
    let config_file = load_config_file(args.config.as_deref(), &env)?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        env.log_level
            .as_deref()
            .or(Some(config_file.app.log_level.as_str()))
            .and_then(LogLevel::from_str)
            .unwrap_or(LogLevel::Info)
    };
    init_logger(level);

    match args.command {
        cli::Command::Run(run_args) => run_scenarios(run_args, &config_file, &env).await,
        cli::Command::List(list_args) => {
            list_scenarios(list_args, &config_file, &env)?;
            Ok(0)
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, &config_file, &env)?;
            Ok(0)
        }
    }
}

/// Explicit `--config`, then PARATEST_CONFIG, then the standard locations
fn load_config_file(explicit: Option<&Path>, env: &EnvConfig) -> Result<ConfigFile> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    match path {
        Some(path) => ConfigFile::load(&path),
        None => ConfigFile::load_default(),
    }
}

/// Defaults, file, network and environment layered in that order
fn effective_config(
    file: &ConfigFile,
    env: &EnvConfig,
    network: Option<&str>,
) -> Result<AppConfig> {
    let network = network.or(env.network.as_deref());
    let mut config = file.resolve(network)?;
    config.apply_env(env);
    Ok(config)
}

fn suite_files(explicit: Vec<PathBuf>, config: &AppConfig) -> Result<Vec<PathBuf>> {
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    let files = discover_test_files(&config.tests_dir)?;
    if files.is_empty() {
        anyhow::bail!("No suite files found in {}", config.tests_dir.display());
    }
    Ok(files)
}

async fn build_chain(config: &AppConfig) -> Result<SharedChain> {
    if config.is_memory() {
        let balance = config.initial_balance()?;
        let mut chain = MemoryChain::new().with_latency(config.memory_latency());
        if let Some(block_time) = config.memory_block_time() {
            chain = chain.with_block_time(block_time);
        }
        for signer in &config.signers {
            chain.fund(&signer.address, balance).await;
        }
        info!(
            "Using in-memory chain with {} funded signer(s)",
            config.signers.len()
        );
        return Ok(Arc::new(chain));
    }

    let client = RpcClient::new(&config.rpc_url, config.request_timeout())?
        .with_poll_interval(config.poll_interval());
    info!("Using JSON-RPC endpoint {}", client.url());
    Ok(Arc::new(client))
}

async fn run_scenarios(args: cli::RunArgs, file: &ConfigFile, env: &EnvConfig) -> Result<i32> {
    let mut config = effective_config(file, env, args.network.as_deref())?;
    if let Some(timeout) = args.timeout_ms {
        config.test_timeout_ms = timeout;
    }
    if let Some(format) = &args.format {
        config.format = format.clone();
    }
    config.validate().context("Invalid run settings")?;

    let format = OutputFormat::from_str(&config.format)
        .with_context(|| format!("Unknown output format: {}", config.format))?;
    let no_color = args.no_color || env.no_color.unwrap_or(false);

    let files = suite_files(args.files, &config)?;
    debug!("Suite files: {:?}", files);

    let pool = Arc::new(SignerPool::new());
    let (signers, keys) = config.pool_parts();
    pool.init_signers(signers, keys)
        .await
        .context("Failed to initialize signer pool")?;

    let chain = build_chain(&config).await?;
    let registry = Arc::new(Registry::with_builtins());

    let mut stages = StageRunner::new();
    if no_color {
        stages = stages.no_color();
    }

    let timer = Timer::start("run");
    let mut scheduler = ParallelScheduler::new(registry, chain, pool)
        .with_test_timeout(config.test_timeout())
        .with_confirmation_timeout(config.confirmation_timeout())
        .with_stages(stages);

    let summary = match scheduler.run(&files, args.grep.as_deref()).await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("✗ {e}");
            return Ok(1);
        }
    };
    debug!("Wall time: {}ms", timer.stop().as_millis());

    let mut reporter = ResultReporter::new(format);
    if no_color {
        reporter = reporter.no_color();
    }
    println!("{}", reporter.render(&summary));

    if let Some(path) = &args.output {
        output::write_report_to_file(path, &summary, format)?;
        if format.is_json() {
            eprintln!("Report saved to {}", path.display());
        } else {
            println!("Report saved to {}", path.display());
        }
    }

    Ok(summary.exit_code())
}

fn list_scenarios(args: cli::ListArgs, file: &ConfigFile, env: &EnvConfig) -> Result<()> {
    let config = effective_config(file, env, None)?;
    let files = suite_files(args.files, &config)?;
    let registry = Registry::with_builtins();

    let parsed = ScenarioParser::new(&registry)
        .with_grep(args.grep.as_deref())?
        .parse_files(&files)?;

    println!(
        "\nFound {} scenarios ({} tests) in {} file(s)\n",
        parsed.scenarios.len(),
        parsed.test_count(),
        parsed.files
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for scenario in &parsed.scenarios {
        let mode = if scenario.parallelizable {
            "parallel"
        } else {
            "serial"
        };
        println!(
            "  {:50} [{}, {} tests, {}]",
            scenario.to_string(),
            mode,
            scenario.tests.len(),
            scenario.signers
        );

        if args.detailed {
            println!("    file: {}", scenario.file.display());
            for hook in &scenario.before_hooks {
                println!("    before: {}", hook.name);
            }
            for test in scenario.execution_order() {
                let mut tags = Vec::new();
                if let Some(block) = test.block_tag {
                    tags.push(format!("block {block}"));
                }
                if test.transactional {
                    tags.push("transactional".to_string());
                }
                if test.disabled {
                    tags.push("disabled".to_string());
                }
                println!("      - {} -> {} {:?}", test.description, test.handler, tags);
            }
            println!();
        }
    }

    if !parsed.ignored.is_empty() {
        println!("\nIgnored scenarios (no matching tests):");
        for name in &parsed.ignored {
            println!("  - {name}");
        }
    }

    if args.detailed {
        println!("\nRegistered tests: {}", registry.test_names().join(", "));
        println!("Registered hooks: {}", registry.hook_names().join(", "));
    }
    println!();

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, file: &ConfigFile, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            let config = ConfigFile::example();
            config.save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { network } => {
            let config = effective_config(file, env, network.as_deref())?;
            println!("{}", serde_yaml::to_string(&config.redacted())?);
            if env.has_any() {
                env.print_summary();
            }
        }

        cli::ConfigAction::Validate { path } => {
            let path = path
                .or_else(ConfigFile::find)
                .unwrap_or_else(|| PathBuf::from("./paratest.yaml"));

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => config::print_env_help(),
    }

    Ok(())
}
