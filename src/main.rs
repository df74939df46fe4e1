//! stakeflow keeper — drives the fund-flow controller on a fixed cadence
//! against a simulated staking backend.
//!
//! The binary wires the strategy, controller, and in-memory pool plumbing
//! together from a config file and then ticks the controller: deploy queued
//! capital, unbond when withdrawal demand outruns liquidity, harvest matured
//! unbonds and validator exits, and periodically reconcile reported deposits.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use stakeflow::backend::SimulatedBackend;
use stakeflow::pool::{InMemoryQueue, RecordingPool};
use stakeflow::types::VaultId;
use stakeflow::{Config, FundFlowController, StakeStrategy};

/// Liquid-staking fund-flow keeper
#[derive(Parser)]
#[command(name = "stakeflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the keeper loop against a simulated backend
    Run {
        /// Stop after this many ticks (default: run until interrupted)
        #[arg(long)]
        ticks: Option<u64>,

        /// Queue a deposit of this amount at startup
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stakeflow=info".into()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Run { ticks, seed } => run(config, ticks, seed).await,
        Commands::Config => {
            println!("{config:#?}");
            Ok(())
        }
    }
}

async fn run(config: Config, ticks: Option<u64>, seed: u64) -> Result<()> {
    if config.strategy.validators.is_empty() {
        warn!("No validators configured; the keeper will have nothing to deploy into");
    }

    let backend = Arc::new(SimulatedBackend::new());
    let pool = Arc::new(RecordingPool::new());
    let queue = Arc::new(InMemoryQueue::new());

    let strategy = Arc::new(RwLock::new(StakeStrategy::new(backend, pool, &config)?));
    let mut controller = FundFlowController::new(strategy.clone(), queue, &config);

    if seed > 0 {
        strategy
            .write()
            .await
            .deposit(&config.identities.pool, seed)?;
        info!(seed, "seeded queued deposit");
    }

    info!(
        vaults = config.strategy.validators.len(),
        poll_interval_secs = config.controller.poll_interval_secs,
        "keeper started"
    );

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        config.controller.poll_interval_secs,
    ));
    let mut tick_no: u64 = 0;

    loop {
        interval.tick().await;
        tick_no += 1;

        if let Err(e) = tick(&mut controller, &strategy, &config, tick_no).await {
            // Policy gates fire routinely on a cadence loop; real failures don't.
            match e.downcast_ref::<stakeflow::Error>() {
                Some(err) if err.is_policy_gate() => debug!(tick_no, %err, "gated"),
                _ => error!(tick_no, %e, "tick failed"),
            }
        }

        if let Some(limit) = ticks {
            if tick_no >= limit {
                info!(tick_no, "tick limit reached, stopping");
                break;
            }
        }
    }

    let snapshot = serde_json::to_string_pretty(strategy.read().await.vaults())?;
    println!("{snapshot}");

    Ok(())
}

/// One keeper pass: each should/act pair in turn, then a periodic
/// accounting sync.
async fn tick(
    controller: &mut FundFlowController,
    strategy: &Arc<RwLock<StakeStrategy>>,
    config: &Config,
    tick_no: u64,
) -> Result<()> {
    let keeper = &config.identities.deposit_controller;

    let deactivated = controller.sync_vault_status(keeper).await?;
    if !deactivated.is_empty() {
        warn!(?deactivated, "validators marked inactive");
    }

    let (ready, amount) = controller.should_deposit_queued_tokens().await;
    if ready {
        let (vault_ids, amounts) = plan_deployment(strategy, amount).await;
        if vault_ids.is_empty() {
            debug!(amount, "queued capital waiting but no vault capacity");
        } else {
            controller
                .deposit_queued_tokens(keeper, &vault_ids, &amounts)
                .await?;
            info!(deployed = amounts.iter().sum::<u64>(), ?vault_ids, "deployed queued capital");
        }
    }

    if controller.should_unbond_vaults().await {
        let unbonded = controller.unbond_vaults(keeper).await?;
        info!(unbonded, "started unbonding cycle");
    }

    let (ready, vault_ids) = controller.should_withdraw_vaults().await;
    if ready {
        let claimed = controller.withdraw_vaults(keeper, &vault_ids).await?;
        info!(claimed, "claimed matured unbonds");
    }

    let exited = controller.get_inactive_withdrawable_vaults().await;
    if !exited.is_empty() {
        let recovered = controller.claim_validator_exits(keeper, &exited).await?;
        info!(recovered, ?exited, "recovered validator exits");
    }

    if tick_no % config.controller.sync_every_ticks == 0 {
        let delta = strategy
            .write()
            .await
            .update_deposits(&config.identities.pool)
            .await?;
        info!(delta, "accounting sync");
    }

    Ok(())
}

/// Fill active vaults in registry order, up to each one's remaining
/// capacity.
async fn plan_deployment(
    strategy: &Arc<RwLock<StakeStrategy>>,
    amount: u64,
) -> (Vec<VaultId>, Vec<u64>) {
    let strategy = strategy.read().await;
    let mut vault_ids = Vec::new();
    let mut amounts = Vec::new();
    let mut remaining = amount;

    for (id, vault) in strategy.vaults().iter().enumerate() {
        if remaining == 0 {
            break;
        }
        if !vault.is_active {
            continue;
        }
        let capacity = vault.max_deposits.saturating_sub(vault.principal);
        let take = remaining.min(capacity);
        if take > 0 {
            vault_ids.push(id);
            amounts.push(take);
            remaining -= take;
        }
    }

    (vault_ids, amounts)
}
