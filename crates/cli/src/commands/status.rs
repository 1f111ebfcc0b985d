//! Chain status command.

use super::{format_time, load_config};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use slotchain_chain::Node;
use slotchain_consensus::{SystemTimeSource, TimeSource};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct StatusArgs {
    /// Directory to store chain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let config = load_config(&args.data_dir)?;
    let node = Node::open(&config, Arc::new(SystemTimeSource)).context("Failed to open node")?;
    let federation = config.federation.to_federation()?;
    let tip = node.tip().await;

    println!();
    println!("{}", "Chain Status:".bold().cyan());
    println!();
    println!("  Height:      {}", tip.height.to_string().bright_cyan());
    println!("  Tip:         {}", tip.hash.to_hex().bright_yellow());
    println!("  Time:        {}", format_time(tip.header.timestamp).bright_black());
    println!(
        "  Median time: {}",
        format_time(tip.median_time_past()).bright_black()
    );
    println!("  Chain work:  {}", tip.chain_work);
    println!(
        "  Coin root:   {}",
        node.engine().coin_store().state_root()?.to_hex().bright_black()
    );

    let now = SystemTimeSource.now();
    let next = now.div_ceil(federation.slot_spacing()) * federation.slot_spacing();
    println!(
        "  Next slot:   {} by {}",
        format_time(next).bright_black(),
        federation.slot_owner(next).to_hex()[..16].bright_yellow()
    );
    println!();
    Ok(())
}
