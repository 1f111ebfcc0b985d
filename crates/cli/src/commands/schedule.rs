//! Slot schedule command.

use super::{format_time, load_config};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use slotchain_consensus::poa::Federation;
use slotchain_consensus::{SystemTimeSource, TimeSource};
use std::path::PathBuf;

#[derive(Args)]
pub struct ScheduleArgs {
    /// Directory to store chain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of slots to show
    #[arg(short, long, default_value = "10")]
    count: usize,
}

pub fn run(args: ScheduleArgs) -> Result<()> {
    let config = load_config(&args.data_dir)?;
    let federation = config
        .federation
        .to_federation()
        .context("Invalid federation in config")?;

    println!();
    println!("{}", "Upcoming slots:".bold().cyan());
    println!();
    for (timestamp, member) in upcoming_slots(&federation, SystemTimeSource.now(), args.count) {
        println!(
            "  {} {} {}",
            format_time(timestamp).bright_black(),
            format!("#{}", member).bright_cyan(),
            federation.members()[member].to_hex()[..16].bright_yellow()
        );
    }
    println!();
    Ok(())
}

/// The next `count` slot timestamps at or after `now`, with the index of
/// the member owning each.
fn upcoming_slots(federation: &Federation, now: u64, count: usize) -> Vec<(u64, usize)> {
    let spacing = federation.slot_spacing();
    let first = now.div_ceil(spacing) * spacing;
    (0..count as u64)
        .map(|i| {
            let timestamp = first + i * spacing;
            (timestamp, federation.slot_index(timestamp))
        })
        .collect()
}
