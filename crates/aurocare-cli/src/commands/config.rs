use std::path::Path;

use aurocare_core::Config;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the config file location
    Path,
    /// Print the effective configuration as JSON
    Show,
    /// Get a config value
    Get {
        /// Dot-separated key (e.g. "escalation.tier_timeout_secs")
        key: String,
    },
    /// Set a config value and save
    Set {
        /// Dot-separated key
        key: String,
        /// New value
        value: String,
    },
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(action: ConfigAction, path: &Path, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            let json = serde_json::to_string_pretty(config)?;
            println!("{json}");
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{value}"),
            None => return Err(format!("unknown key: {key}").into()),
        },
        ConfigAction::Set { key, value } => {
            // Start from the file itself so a broken file is not silently replaced.
            let mut on_disk = Config::load(path)?;
            on_disk.set(&key, &value)?;
            on_disk.save(path)?;
            println!("ok");
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
            }
            Config::default().save(path)?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}
