use std::path::PathBuf;

use aurocare_core::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "aurocare-cli", version, about = "AuroCare alert and reminder CLI")]
struct Cli {
    /// Config file (default: ~/.config/aurocare/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emergency alert simulation
    Alert {
        #[command(subcommand)]
        action: commands::alert::AlertAction,
    },
    /// Reminder scheduler
    Reminders {
        #[command(subcommand)]
        action: commands::reminders::ReminderAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let (config, load_error) = match Config::load(&path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&config.logging.filter);
    if let Some(e) = load_error {
        tracing::warn!(path = %path.display(), error = %e, "using default configuration");
    }

    match cli.command {
        Commands::Alert { action } => commands::alert::run(action, &config).await,
        Commands::Reminders { action } => commands::reminders::run(action, &config).await,
        Commands::Config { action } => commands::config::run(action, &path, &config),
    }
}

/// Logs go to stderr so stdout carries only JSON.
fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
