use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

mod bridge_pair;
mod elements;
mod errors;
mod governor;
mod messenger;
mod orchestrator;
mod sequencer;
#[cfg(test)]
mod testing;
mod utils;

use bridge_pair::BridgeArtifacts;
use elements::{
    cross_chain_message::{DeliveryOutcome, MessageDirection},
    roles::Role,
    timelock_action::TimelockAction,
    OrchestratorConfig,
};
use governor::BridgingGovernor;
use messenger::CrossChainMessenger;
use orchestrator::{DirectSubmitter, MultiChainOrchestrator};
use utils::{
    network::{connect, ChainClient},
    poll::{cancellation, CancelSignal},
};

const DEFAULT_CONFIG: &str = "bridge.yaml";

#[derive(Debug, Parser)]
#[clap(about = "Deploys and administers a linked L1/L2 token bridge")]
struct Args {
    // Deployment/governance config (.yaml, or .toml)
    #[clap(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    #[clap(long)]
    l1_rpc: String,

    #[clap(long)]
    l2_rpc: String,

    // Same key signs on both chains
    #[clap(long)]
    private_key: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChainSide {
    L1,
    L2,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    L1ToL2,
    L2ToL1,
}

impl From<Direction> for MessageDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::L1ToL2 => MessageDirection::L1ToL2,
            Direction::L2ToL1 => MessageDirection::L2ToL1,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the addresses the bridge pair would be deployed at.
    Predict,
    /// Deploy the linked bridge pair.
    Deploy {
        #[clap(long)]
        dry_run: bool,
        // Also apply the configured roles and flags to both bridges.
        #[clap(long)]
        setup: bool,
    },
    /// Converge one bridge's roles and flags to the config.
    SetupBridge {
        #[clap(long, value_enum)]
        chain: ChainSide,
        #[clap(long)]
        bridge: Address,
    },
    /// List the holders of a role on one bridge.
    Admins {
        #[clap(long, value_enum)]
        chain: ChainSide,
        #[clap(long)]
        bridge: Address,
        #[clap(long, default_value = "ADMIN")]
        role: Role,
    },
    /// Queue a call on the L2 executor from L1 and execute it once its delay passed.
    PushAction {
        #[clap(long)]
        target: Address,
        #[clap(long, default_value = "0x")]
        calldata: Bytes,
        // When set, calldata holds only the encoded arguments.
        #[clap(long)]
        signature: Option<String>,
        #[clap(long, default_value = "0")]
        value: U256,
    },
    /// Wait until a message sent in the given transaction is delivered.
    Wait {
        #[clap(long)]
        tx: B256,
        #[clap(long, value_enum, default_value = "l1-to-l2")]
        direction: Direction,
    },
    /// Show the state of a queued timelock action.
    ActionState {
        #[clap(long)]
        id: U256,
    },
    /// Execute an already queued timelock action once it is executable.
    Execute {
        #[clap(long)]
        id: U256,
    },
}

/// Ctrl-C stops any wait in progress.
fn cancel_on_ctrl_c() -> CancelSignal {
    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, stopping");
            handle.cancel();
        }
    });
    signal
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::init();

    let config = OrchestratorConfig::load(&args.config)?;
    let l1: Arc<dyn ChainClient> = Arc::new(connect("L1", &args.l1_rpc, &args.private_key)?);
    let l2: Arc<dyn ChainClient> = Arc::new(connect("L2", &args.l2_rpc, &args.private_key)?);
    let cancel = cancel_on_ctrl_c();

    let orchestrator = MultiChainOrchestrator::from_config(&config, l1.clone(), l2.clone());
    let side = |chain: ChainSide| match chain {
        ChainSide::L1 => (l1.clone(), &config.l1_bridge),
        ChainSide::L2 => (l2.clone(), &config.l2_bridge),
    };

    match args.command {
        Command::Predict => {
            let predicted = orchestrator.predict_pair().await?;
            println!("{predicted}");
        }
        Command::Deploy { dry_run, setup } => {
            let artifacts = BridgeArtifacts::load(&config.artifacts).await?;
            if dry_run {
                let plan = orchestrator.plan_pair(&config.bridge, &artifacts).await?;
                println!("{}", plan.describe());
                return Ok(());
            }

            let pair = orchestrator.deploy_pair(&config.bridge, &artifacts).await?;
            println!("{}", "Bridge pair deployed".green().bold());
            println!("{pair}");

            if setup {
                let (l1_report, l2_report) = orchestrator
                    .setup_bridges(&pair, &config.l1_bridge, &config.l2_bridge)
                    .await?;
                println!("{l1_report}\n{l2_report}");
            }
        }
        Command::SetupBridge { chain, bridge } => {
            let (client, bridge_config) = side(chain);
            let report = BridgingGovernor::new(client, bridge).setup(bridge_config).await?;
            println!("{report}");
        }
        Command::Admins { chain, bridge, role } => {
            let (client, _) = side(chain);
            let governor = BridgingGovernor::new(client, bridge);
            let holders = match role {
                Role::Admin => governor.get_admins().await?,
                other => governor.role_holders(other).await?,
            };
            println!("{} holders of {bridge}:", role.to_string().bold());
            for holder in holders {
                println!("  {holder}");
            }
        }
        Command::PushAction {
            target,
            calldata,
            signature,
            value,
        } => {
            let action = match signature {
                Some(signature) => TimelockAction::new().add_signed_call(target, value, &signature, calldata),
                None => TimelockAction::new().add_call(target, value, calldata),
            };
            let submitter = DirectSubmitter::new(l1.clone());
            let outcome = orchestrator
                .push_governed_action(action, &submitter, &cancel)
                .await
                .context("pushing governed action")?;

            println!("source transaction: {}", outcome.source_tx);
            println!("delivery: {}", outcome.delivery.to_string().green());
            println!("actions set: {}", outcome.action_id);
            match outcome.execution_tx {
                Some(tx) => println!("executed in {tx}"),
                None => println!("{}", "already executed by someone else".yellow()),
            }
        }
        Command::Wait { tx, direction } => {
            let messenger = CrossChainMessenger::for_direction(
                &config.messaging,
                l1.clone(),
                l2.clone(),
                config.polling.backoff(),
                direction.into(),
            )?;
            let outcome = messenger
                .wait_for_delivery(tx, config.polling.delivery_timeout(), &cancel)
                .await?;
            match outcome {
                DeliveryOutcome::Settled(status) if status.is_delivered() => {
                    println!("{}", status.to_string().green())
                }
                DeliveryOutcome::Settled(status) => println!("{}", status.to_string().red()),
                DeliveryOutcome::TimedOut(status) => {
                    println!("{} still {status}", "timed out,".yellow())
                }
            }
        }
        Command::ActionState { id } => {
            let state = orchestrator.action_state(id).await?;
            println!("actions set {id}: {state}");
        }
        Command::Execute { id } => match orchestrator.execute_when_ready(id, &cancel).await? {
            Some(tx) => println!("actions set {id} executed in {tx}"),
            None => println!("actions set {id} was already executed"),
        },
    }

    Ok(())
}
