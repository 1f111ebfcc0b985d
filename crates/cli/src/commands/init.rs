//! Initialize chain command.

use super::keys::save_keypair;
use super::{format_time, CONFIG_FILE};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use slotchain_chain::{GenesisConfig, NodeConfig};
use slotchain_consensus::poa::FederationConfig;
use slotchain_consensus::{ConsensusParams, SystemTimeSource, TimeSource};
use slotchain_core::Keypair;
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct InitArgs {
    /// Directory to store chain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of federation members to generate
    #[arg(short, long, default_value = "1")]
    members: usize,

    /// Seconds between slots
    #[arg(short, long, default_value = "16")]
    slot_spacing: u64,
}

pub fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing slotchain...".bold().cyan());
    println!();

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    let config_path = args.data_dir.join(CONFIG_FILE);
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    println!("{}", "Generating federation...".bold());
    let keys_dir = args.data_dir.join("keys");
    let mut members = Vec::with_capacity(args.members);
    for i in 0..args.members {
        let keypair = Keypair::generate();
        let key_file = keys_dir.join(format!("member_{}.json", i));
        save_keypair(&key_file, &keypair)?;
        println!(
            "  Member {}: {} {}",
            i + 1,
            keypair.public_key.to_hex().bright_yellow(),
            format!("({})", key_file.display()).bright_black()
        );
        members.push(keypair.public_key.to_hex());
    }

    let federation = FederationConfig {
        members,
        slot_spacing_seconds: args.slot_spacing,
    };
    let round_start = federation
        .to_federation()
        .context("Invalid federation")?
        .round_start(SystemTimeSource.now());

    let config = NodeConfig {
        data_dir: Some(args.data_dir.join("db")),
        consensus: ConsensusParams::default(),
        federation,
        genesis: GenesisConfig {
            timestamp: round_start,
            ..GenesisConfig::default()
        },
        ..NodeConfig::default()
    };
    let genesis = config.genesis_block()?;
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

    println!();
    println!("{}  Created genesis block", "✓".green().bold());
    println!("    Hash: {}", genesis.hash().to_hex().bright_yellow());
    println!("    Time: {}", format_time(round_start).bright_black());
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        config_path.display().to_string().bright_black()
    );

    println!();
    println!("{}", "Chain initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  • Use {} to see who signs next",
        "slotchain schedule".bright_cyan()
    );
    println!(
        "  • Use {} to start signing",
        "slotchain run --key <member file>".bright_cyan()
    );

    Ok(())
}
