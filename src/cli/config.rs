use anyhow::Result;
use clap::{Args, Subcommand};

use super::{privileged, security_context};
use crate::config::{Config, settable_keys};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., security.max_attempts)
        key: String,
    },

    /// Set a configuration value (requires the admin PIN when one is active)
    Set {
        /// Config key (e.g., security.max_attempts)
        key: String,

        /// Value to set; lists are comma-separated
        value: String,
    },

    /// List settable keys and the values they accept
    Keys,

    /// Show config file path
    Path,

    /// Initialize default config file
    Init {
        /// Overwrite existing config (requires the admin PIN when one is active)
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(args: ConfigArgs, config: Config) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(&config, &format),
        ConfigCommands::Get { key } => get_config(&config, &key),
        ConfigCommands::Set { key, value } => set_config(config, &key, &value),
        ConfigCommands::Keys => list_keys(),
        ConfigCommands::Path => show_path(&config),
        ConfigCommands::Init { force } => init_config(&config, force),
    }
}

fn show_config(config: &Config, format: &str) -> Result<()> {
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(config)?;
            println!("{}", json);
        }
        _ => {
            let toml = toml::to_string_pretty(config)?;
            println!("{}", toml);
        }
    }

    Ok(())
}

fn get_config(config: &Config, key: &str) -> Result<()> {
    let value = config.get_value(key)?;
    println!("{}", value);
    Ok(())
}

fn set_config(config: Config, key: &str, value: &str) -> Result<()> {
    // Validate before asking for a PIN; authorize under the current settings.
    let mut updated = config.clone();
    updated.set_value(key, value)?;

    let ctx = security_context(&config)?;
    let scope = ctx.enter();
    privileged(&scope, || updated.save())?;

    println!("Set {} = {}", key, updated.get_value(key)?);
    Ok(())
}

fn list_keys() -> Result<()> {
    for (key, accepts) in settable_keys() {
        println!("{:<32} {}", key, accepts);
    }
    Ok(())
}

fn show_path(config: &Config) -> Result<()> {
    println!("{}", config.paths.config_file().display());
    Ok(())
}

fn init_config(config: &Config, force: bool) -> Result<()> {
    let path = config.paths.config_file();

    if config.file_exists()? && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    let ctx = security_context(config)?;
    let scope = ctx.enter();
    privileged(&scope, || {
        let fresh = Config {
            paths: config.paths.clone(),
            ..Config::default()
        };
        fresh.save_with_template()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Paths;

    #[test]
    fn init_refuses_existing_file_without_force() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            paths: Paths {
                config_dir: tmp.path().join("config"),
                data_dir: tmp.path().join("data"),
                state_dir: tmp.path().join("state"),
            },
            ..Config::default()
        };
        config.save_with_template().unwrap();

        let err = init_config(&config, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
    }
}
