//! # DART Supervisor
//!
//! Entry point for the DART flight stack. Launches the edge tier (the
//! onboard real-time core against the simulation backend) or the cloud
//! tier (heartbeat + plan publisher), and provides configuration
//! tooling.
//!
//! Exit codes: 0 success, 2 invalid configuration, 3 fatal runtime
//! safety condition, 1 other error.

mod cloud;
mod edge;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use dart_common::config::{ConfigError, DartConfig};

const EXIT_CONFIG: u8 = 2;
const EXIT_SAFETY: u8 = 3;
const EXIT_OTHER: u8 = 1;

#[derive(Debug, Parser)]
#[command(name = "dart", about = "DART autonomous flight stack", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Onboard real-time core.
    Edge,
    /// Heartbeat and plan publisher.
    Cloud,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch a tier.
    Run {
        #[arg(long, value_enum)]
        mode: Mode,
        /// Configuration file.
        #[arg(long, default_value = "dart.toml")]
        config: PathBuf,
        /// Peer address for the cloud tier (defaults to the configured
        /// bind address).
        #[arg(long)]
        peer: Option<String>,
    },
    /// Configuration tooling.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Load and validate a configuration; exit 0 on success.
    Validate { path: PathBuf },
    /// Print the resolved configuration.
    Show { path: PathBuf },
}

fn init_tracing(cfg: &DartConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.as_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &PathBuf) -> Result<DartConfig, u8> {
    match DartConfig::load_validated(path) {
        Ok(cfg) => Ok(cfg),
        Err(e) => {
            eprintln!("configuration error: {e}");
            Err(EXIT_CONFIG)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Config {
            action: ConfigAction::Validate { path },
        } => match DartConfig::load_validated(&path) {
            Ok(_) => {
                println!("{}: configuration valid", path.display());
                0
            }
            Err(e) => {
                eprintln!("configuration error: {e}");
                EXIT_CONFIG
            }
        },
        Command::Config {
            action: ConfigAction::Show { path },
        } => match show_config(&path) {
            Ok(()) => 0,
            Err(ConfigError::FileNotFound) => {
                eprintln!("configuration error: file not found: {}", path.display());
                EXIT_CONFIG
            }
            Err(e) => {
                eprintln!("configuration error: {e}");
                EXIT_CONFIG
            }
        },
        Command::Run { mode, config, peer } => match load_config(&config) {
            Err(code) => code,
            Ok(cfg) => {
                init_tracing(&cfg);
                let result = match mode {
                    Mode::Edge => edge::run(cfg),
                    Mode::Cloud => cloud::run(cfg, peer),
                };
                match result {
                    Ok(edge::Outcome::Clean) => 0,
                    Ok(edge::Outcome::EmergencyLanded) => EXIT_SAFETY,
                    Err(e) => {
                        error!(error = %e, "tier terminated with an error");
                        EXIT_OTHER
                    }
                }
            }
        },
    };
    ExitCode::from(code)
}

fn show_config(path: &PathBuf) -> Result<(), ConfigError> {
    use dart_common::config::ConfigLoader;
    let cfg = DartConfig::load(path)?;
    cfg.validate()?;
    let rendered =
        toml::to_string_pretty(&cfg).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    print!("{rendered}");
    Ok(())
}
