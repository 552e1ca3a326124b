//! `vaultline`: run backups, manage rules and read the event log.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use vaultline_crypto::MasterKey;
use vaultline_daemon::{VaultlineConfig, telemetry};

/// Scheduled, encrypted file backups.
#[derive(Parser, Debug)]
#[command(name = "vaultline", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "VAULTLINE_CONFIG", default_value = "vaultline.toml", global = true)]
    config: PathBuf,

    /// Override `engine.max_concurrent_jobs`.
    #[arg(long, global = true)]
    max_concurrent_jobs: Option<usize>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine and scheduler until interrupted.
    Run,
    /// Print a new base64 master key.
    Keygen,
    /// Manage backup rules.
    Rule(commands::rule::RuleArgs),
    /// Query the event log.
    Logs(commands::logs::LogsArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (mut config, found) = VaultlineConfig::load(&cli.config)?;
    if let Some(cap) = cli.max_concurrent_jobs {
        config.engine.max_concurrent_jobs = cap;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    config.validate()?;

    telemetry::init(&config.logging);
    if !found {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match cli.command {
        Command::Run => commands::run::run(config).await,
        Command::Keygen => {
            println!("{}", MasterKey::generate()?.to_base64());
            Ok(())
        }
        Command::Rule(args) => commands::rule::run(&config, &args).await,
        Command::Logs(args) => commands::logs::run(&config, &args).await,
    }
}
