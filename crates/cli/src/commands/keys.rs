//! Signing key files.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use slotchain_core::Keypair;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct KeygenArgs {
    /// Write the key to this file instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// On-disk form of a keypair.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    public_key: String,
    private_key: String,
}

pub fn run(args: KeygenArgs) -> Result<()> {
    let keypair = Keypair::generate();
    match args.output {
        Some(path) => {
            save_keypair(&path, &keypair)?;
            println!(
                "{}  Saved key {} to: {}",
                "✓".green().bold(),
                keypair.public_key.to_hex().bright_yellow(),
                path.display().to_string().bright_black()
            );
        }
        None => {
            println!("  Public key:  {}", keypair.public_key.to_hex().bright_yellow());
            println!("  Private key: {}", hex::encode(keypair.private_key()));
        }
    }
    Ok(())
}

pub(crate) fn save_keypair(path: &Path, keypair: &Keypair) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = KeyFile {
        public_key: keypair.public_key.to_hex(),
        private_key: hex::encode(keypair.private_key()),
    };
    fs::write(path, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("Failed to write key file: {}", path.display()))
}

pub(crate) fn load_keypair(path: &Path) -> Result<Keypair> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Keypair file not found: {}", path.display()))?;
    let file: KeyFile = serde_json::from_str(&contents).context("Malformed keypair file")?;
    let keypair = Keypair::from_hex(&file.private_key).context("Invalid private key")?;
    if keypair.public_key.to_hex() != file.public_key {
        anyhow::bail!("Public key in {} does not match its private key", path.display());
    }
    Ok(keypair)
}
