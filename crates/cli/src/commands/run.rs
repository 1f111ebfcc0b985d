//! Run a signing node.

use super::keys::load_keypair;
use super::load_config;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use slotchain_chain::Node;
use slotchain_consensus::poa::{BlockProposer, SlotMiner};
use slotchain_consensus::{SystemTimeSource, TimeSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Directory to store chain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Key file of the local federation member
    #[arg(short, long)]
    key: PathBuf,

    /// Stop after producing this many blocks
    #[arg(long)]
    blocks: Option<u64>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args.data_dir)?;
    let keypair = load_keypair(&args.key)?;
    let federation = Arc::new(
        config
            .federation
            .to_federation()
            .context("Invalid federation in config")?,
    );
    let mut miner = SlotMiner::new(Arc::clone(&federation), keypair.public_key)
        .context("Key is not a federation member")?;
    let proposer = BlockProposer::new(keypair, federation, config.consensus.clone());

    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let node = Arc::new(Node::open(&config, Arc::clone(&time)).context("Failed to open node")?);
    let cancel = node.engine().cancellation_token();

    let tip = node.tip().await;
    println!("{}", "Signing node started".bold().cyan());
    println!("  Signer: {}", proposer.public_key().to_hex().bright_yellow());
    println!("  Height: {}", tip.height.to_string().bright_cyan());
    println!();

    let shutdown = Arc::clone(&node);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown.shutdown();
        }
    });

    let mut produced = 0;
    while let Some(slot) = miner.wait_for_turn(time.as_ref(), &cancel).await {
        miner.mark_signed(slot);
        let block = match node.propose_block(&proposer, slot).await {
            Ok(block) => block,
            Err(err) => {
                warn!(slot, "could not propose: {err}");
                continue;
            }
        };
        match node.try_validate_block(block).await {
            Ok(update) => {
                println!(
                    "{}  Block #{} {} {}",
                    "✓".green().bold(),
                    update.height,
                    update.hash.to_hex()[..16].bright_yellow(),
                    format!("({} txs, {} fees)", update.transactions, update.fees).bright_black()
                );
                produced += 1;
            }
            Err(err) => warn!(slot, code = err.code(), "own block rejected: {err}"),
        }
        if args.blocks.is_some_and(|limit| produced >= limit) {
            break;
        }
    }

    let stats = node.mempool_stats().await;
    println!();
    println!(
        "Stopped at height {} with {} pooled transactions",
        node.tip().await.height.to_string().bright_cyan(),
        stats.count
    );
    Ok(())
}
