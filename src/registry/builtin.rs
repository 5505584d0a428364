//! Built-in handlers
//!
//! Chain queries, transfers, bounded block waits and scenario-state helpers
//! usable straight from test files.

use anyhow::{bail, Context};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{HookContext, Registry, TestContext};
use crate::chain::{deploy_contract, TransactionRequest};
use crate::models::{as_integer, FailureReason};
use crate::signer::SignerKind;

pub fn register(registry: &mut Registry) {
    registry
        .register_test("balance", balance)
        .register_test("nonce", nonce)
        .register_test("block_number", block_number)
        .register_test("transfer", transfer)
        .register_test("wait_blocks", wait_blocks)
        .register_test("state", state)
        .register_test("echo", echo)
        .register_test("sleep", sleep);

    registry
        .register_hook("ping", ping)
        .register_hook("deploy", deploy)
        .register_hook("set", set)
        .register_hook("require_funds", require_funds);
}

fn kind_arg(ctx: &TestContext) -> Result<SignerKind, FailureReason> {
    match ctx.arg::<String>("kind")? {
        None => Ok(SignerKind::Evm),
        Some(kind) => SignerKind::from_str(&kind)
            .ok_or_else(|| FailureReason::error(format!("unknown signer kind '{kind}'"))),
    }
}

/// Explicit `address` argument, else the scenario's leased signer
fn target_address(ctx: &TestContext) -> Result<String, FailureReason> {
    match ctx.arg::<String>("address")? {
        Some(address) => Ok(address),
        None => Ok(ctx.signer(kind_arg(ctx)?)?.address.clone()),
    }
}

async fn balance(ctx: TestContext) -> Result<Value, FailureReason> {
    let address = target_address(&ctx)?;
    let balance = ctx.chain.get_balance(&address).await?;
    debug!("Balance of {}: {}", address, balance);
    Ok(json!(balance.to_string()))
}

async fn nonce(ctx: TestContext) -> Result<Value, FailureReason> {
    let address = target_address(&ctx)?;
    Ok(json!(ctx.chain.get_transaction_count(&address).await?))
}

async fn block_number(ctx: TestContext) -> Result<Value, FailureReason> {
    Ok(json!(ctx.chain.block_number().await?))
}

async fn transfer(ctx: TestContext) -> Result<Value, FailureReason> {
    let signer = ctx.signer(kind_arg(&ctx)?)?;
    let to = ctx
        .arg::<String>("to")?
        .ok_or_else(|| FailureReason::error("transfer requires 'to'"))?;
    let value = match ctx.arg::<Value>("value")? {
        None => 0,
        Some(v) => as_integer(&v)
            .ok_or_else(|| FailureReason::error(format!("invalid transfer value {v}")))?,
    };

    let tx_hash = ctx
        .chain
        .send_transaction(&TransactionRequest::transfer(signer, to, value))
        .await?;
    let receipt = ctx
        .chain
        .wait_for_confirmation(&tx_hash, ctx.confirmation_timeout)
        .await?;

    if !receipt.success {
        return Err(FailureReason::error(format!("transaction {tx_hash} reverted")));
    }

    Ok(json!({
        "transaction_hash": receipt.transaction_hash,
        "block_number": receipt.block_number,
        "success": receipt.success,
    }))
}

/// Wait for `count` new blocks, bounded by `timeout_ms` (default: the test budget)
async fn wait_blocks(ctx: TestContext) -> Result<Value, FailureReason> {
    let count = ctx.arg::<u64>("count")?.unwrap_or(1);
    let limit = ctx
        .arg::<u64>("timeout_ms")?
        .map(Duration::from_millis)
        .unwrap_or(ctx.timeout);
    let every = match ctx.arg::<u64>("interval_ms")?.unwrap_or(250) {
        0 => return Err(FailureReason::error("interval_ms must be greater than zero")),
        ms => Duration::from_millis(ms),
    };

    let start = ctx.chain.block_number().await?;
    let target = start + count;

    let watch = async {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let current = ctx.chain.block_number().await?;
            if current >= target {
                return Ok::<u64, FailureReason>(current);
            }
        }
    };

    // Dropping the poller on either branch ends the subscription
    match tokio::time::timeout(limit, watch).await {
        Ok(reached) => Ok(json!(reached?)),
        Err(_) => Err(FailureReason::error(format!(
            "block {target} not reached within {}ms",
            limit.as_millis()
        ))),
    }
}

async fn state(ctx: TestContext) -> Result<Value, FailureReason> {
    let key = ctx
        .arg::<String>("key")?
        .ok_or_else(|| FailureReason::error("state requires 'key'"))?;
    Ok(ctx.state.get(&key).await.unwrap_or(Value::Null))
}

async fn echo(ctx: TestContext) -> Result<Value, FailureReason> {
    Ok(ctx.arg::<Value>("value")?.unwrap_or(Value::Null))
}

async fn sleep(ctx: TestContext) -> Result<Value, FailureReason> {
    let ms = ctx.arg::<u64>("ms")?.unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(Value::Null)
}

async fn ping(ctx: HookContext) -> anyhow::Result<()> {
    let block = ctx
        .chain
        .block_number()
        .await
        .context("chain is not reachable")?;
    debug!("Chain reachable at block {}", block);
    Ok(())
}

async fn deploy(ctx: HookContext) -> anyhow::Result<()> {
    let name: String = ctx.require_arg("contract")?;
    let bytecode: String = ctx.require_arg("bytecode")?;
    let signer = ctx.signer()?;

    let handle = deploy_contract(
        ctx.chain.as_ref(),
        signer,
        &name,
        &bytecode,
        ctx.confirmation_timeout,
    )
    .await
    .with_context(|| format!("failed to deploy {name}"))?;

    info!("[{}] {} deployed at {}", ctx.scenario, name, handle.address);
    ctx.state
        .set(format!("contracts.{name}"), json!(handle.address))
        .await;
    Ok(())
}

async fn set(ctx: HookContext) -> anyhow::Result<()> {
    let key: String = ctx.require_arg("key")?;
    let value: Value = ctx.arg("value")?.unwrap_or(Value::Null);
    ctx.state.set(key, value).await;
    Ok(())
}

async fn require_funds(ctx: HookContext) -> anyhow::Result<()> {
    let min: Value = ctx.require_arg("min")?;
    let Some(min) = as_integer(&min) else {
        bail!("invalid minimum balance {min}");
    };
    let signer = ctx.signer()?;
    let balance = ctx.chain.get_balance(&signer.address).await?;
    if balance < min {
        bail!("{} holds {} but {} is required", signer.address, balance, min);
    }
    Ok(())
}
