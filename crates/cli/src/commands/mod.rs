//! CLI commands module.

use anyhow::{Context, Result};
use clap::Subcommand;
use slotchain_chain::NodeConfig;
use std::path::Path;

mod init;
mod keys;
mod run;
mod schedule;
mod status;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new federation and its genesis
    Init(init::InitArgs),
    /// Generate a signing key
    Keygen(keys::KeygenArgs),
    /// Show upcoming signing slots
    Schedule(schedule::ScheduleArgs),
    /// Run a signing node
    Run(run::RunArgs),
    /// Show the chain tip
    Status(status::StatusArgs),
}

pub async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args),
        Commands::Keygen(args) => keys::run(args),
        Commands::Schedule(args) => schedule::run(args),
        Commands::Run(args) => run::run(args).await,
        Commands::Status(args) => status::run(args).await,
    }
}

/// Name of the configuration file inside a data directory.
pub(crate) const CONFIG_FILE: &str = "config.json";

pub(crate) fn load_config(data_dir: &Path) -> Result<NodeConfig> {
    let path = data_dir.join(CONFIG_FILE);
    NodeConfig::from_json_file(&path).with_context(|| {
        format!(
            "Failed to read {}. Did you run 'slotchain init'?",
            path.display()
        )
    })
}

/// Render a unix timestamp for humans.
pub(crate) fn format_time(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_time(1_700_000_000), "2023-11-14 22:13:20 UTC");
    }
}
