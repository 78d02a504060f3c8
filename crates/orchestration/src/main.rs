use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchestration::transfer::{encode_route_memo, MemoOptions};
use orchestration::{
    BatchEntryOutcome, Brand, ChainAddress, ChainAmount, DenomArg, OrchestrationError, Orchestrator,
    OrchestratorConfig,
};

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Accounts and multi-hop transfers across remote chains")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/orchestrator.toml")]
    pub config: String,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured chains and their transfer channels
    Chains,
    /// List accounts in the account store
    Accounts,
    /// Compose a route and print the memo its first hop would carry
    Plan {
        /// Hops as <chain_id>:<address>, in order
        #[arg(long = "hop", required = true)]
        hops: Vec<String>,
    },
    /// Unbond, transfer and liquid stake against in-memory chains
    Simulate {
        /// Amount bonded to each of two validators
        #[arg(long, default_value_t = 1_000_000)]
        amount: u128,
        /// Make the second undelegation fail
        #[arg(long)]
        fail_second: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("orchestration={},orchestrator={}", cli.log_level, cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Chains => show_chains(&config),
        Commands::Accounts => show_accounts(config).await?,
        Commands::Plan { hops } => plan_route(config, &hops)?,
        Commands::Simulate { amount, fail_second } => simulate(config, amount, fail_second).await?,
    }

    Ok(())
}

fn load_config(path: &str) -> anyhow::Result<OrchestratorConfig> {
    if Path::new(path).exists() {
        let config = OrchestratorConfig::load(path).with_context(|| format!("loading {}", path))?;
        info!("Loaded configuration from: {}", path);
        Ok(config)
    } else {
        warn!("{} not found, using built-in configuration", path);
        Ok(OrchestratorConfig::default())
    }
}

fn show_chains(config: &OrchestratorConfig) {
    let mut names: Vec<_> = config.chains.keys().collect();
    names.sort();
    for name in names {
        let chain = &config.chains[name];
        println!(
            "{} ({}) prefix={} staking={} batch={} ica={} icq={} pfm={} hooks={}",
            name,
            chain.chain_id,
            chain.address_prefix,
            chain.staking_denom.as_deref().unwrap_or("-"),
            chain.batch_messages,
            chain.ica_enabled,
            chain.icq_enabled,
            chain.pfm_enabled,
            chain.ibc_hooks_enabled,
        );
        let mut counterparties: Vec<_> = chain.connections.keys().collect();
        counterparties.sort();
        for counterparty in counterparties {
            match chain.transfer_channel(counterparty) {
                Some(channel) => println!("  -> {} via {}", counterparty, channel),
                None => println!("  -> {} (connection not open)", counterparty),
            }
        }
    }
}

async fn show_accounts(config: OrchestratorConfig) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::with_file_store(config)?;
    let records = orchestrator.stored_accounts().await?;
    if records.is_empty() {
        println!("No accounts");
    }
    for record in records {
        let status = if record.closed { "closed" } else { "open" };
        println!("{}/{} {} [{}]", record.chain, record.pet_name, record.address, status);
    }
    Ok(())
}

fn parse_hop(text: &str) -> anyhow::Result<ChainAddress> {
    let (chain_id, address) = text
        .split_once(':')
        .with_context(|| format!("hop {} is not <chain_id>:<address>", text))?;
    Ok(ChainAddress::new(chain_id, address)?)
}

fn plan_route(config: OrchestratorConfig, hops: &[String]) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::with_memory_store(config)?;
    let composer = orchestrator.composer();
    let steps = hops
        .iter()
        .map(|h| parse_hop(h).map(|to| composer.make_transfer_msg(to)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let route = composer.make_sequence(steps)?;

    let chains = &orchestrator.config().chains;
    let memo = encode_route_memo(&route, &MemoOptions::from_config(&orchestrator.config().transfer), |from, to| {
        chains
            .values()
            .find(|c| c.chain_id == from)
            .and_then(|c| c.transfer_channel(to))
            .map(str::to_string)
            .ok_or_else(|| OrchestrationError::validation(format!("no open transfer channel from {} to {}", from, to)))
    })?;

    for (i, hop) in route.hops().enumerate() {
        println!("{}. {}", i + 1, hop.to_account());
    }
    if memo.is_empty() {
        println!("memo: (none)");
    } else {
        println!("memo: {}", memo);
    }
    Ok(())
}

async fn simulate(config: OrchestratorConfig, amount: u128, fail_second: bool) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::with_memory_store(config)?;
    let ledgers = orchestrator.register_in_memory_chains().await?;
    let celestia = ledgers.get("celestia").context("celestia is not configured")?;
    let stride = ledgers.get("stride").context("stride is not configured")?;

    let staker = orchestrator.provide_account("celestia", "sim-staker").await?;
    let liquid = orchestrator.provide_account("stride", "sim-liquid").await?;

    let validators = [celestia.validator(1)?, celestia.validator(2)?];
    for validator in &validators {
        celestia.seed_delegation(staker.address(), validator, amount);
    }
    // Stands in for unbondings that have already matured
    celestia.fund(staker.address(), "utia", amount * 2);
    if fail_second {
        let failing = validators[1].address().to_string();
        celestia.fail_when(
            move |msg| msg.field("validator_address") == Some(failing.as_str()),
            orchestration::Fault::Reject {
                code: 18,
                log: "simulated failure".to_string(),
            },
        );
    }

    let delegations = staker.get_delegations().await?;
    info!("{} holds {} delegations", staker.key(), delegations.len());
    let report = match staker.undelegate_all(&delegations).await {
        Ok(report) => report,
        Err(OrchestrationError::PartialBatchFailure(report)) => report,
        Err(e) => return Err(e.into()),
    };
    for entry in &report.entries {
        match &entry.outcome {
            BatchEntryOutcome::Succeeded(ack) => println!("undelegate {}: ok at height {}", entry.target, ack.height),
            BatchEntryOutcome::Failed(reason) => println!("undelegate {}: failed: {}", entry.target, reason),
            BatchEntryOutcome::Ambiguous(reason) => println!("undelegate {}: unknown: {}", entry.target, reason),
        }
    }

    let unbonded = staker.get_balance("utia").await?;
    staker.transfer(unbonded.clone(), liquid.address(), None).await?;
    for transfer in celestia.outbound_transfers() {
        println!("transfer {}{} over {} to {}", transfer.amount, transfer.denom, transfer.source_channel, transfer.receiver);
    }

    // Deliver the packet by hand; there is no relayer between in-memory chains
    let voucher = orchestrator
        .denoms()
        .resolve(&DenomArg::from(Brand::new("TIA")), liquid.address().chain_id())?;
    if let Some(trace) = orchestrator.denoms().trace(&voucher) {
        stride.register_denom_trace(trace.clone());
    }
    stride.fund(liquid.address(), voucher.as_str(), unbonded.value);

    let staked = liquid.liquid_stake(ChainAmount::new(voucher, unbonded.value)).await?;
    println!("liquid staked: {}", staked);
    for balance in liquid.get_balances().await? {
        println!("{} balance: {}", liquid.key(), balance);
    }

    staker.close().await?;
    liquid.close().await?;
    info!(
        "Simulation done: {} operations submitted",
        orchestrator.metrics().operations_submitted.get()
    );
    Ok(())
}
