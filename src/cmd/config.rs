//! Configuration view and validation commands: `taskboard config`.

use std::path::Path;

use anyhow::{Context, Result};
use taskboard::config::{CONFIG_FILE_NAME, TaskboardConfig, TaskboardToml};

use super::super::ConfigCommands;

pub fn cmd_config(cwd: &Path, explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = TaskboardConfig::load(explicit, cwd)?;
            println!();
            println!("Taskboard Configuration");
            println!("=======================");
            println!();
            match &config.source {
                Some(path) => println!("Config file: {}", path.display()),
                None => {
                    println!("No {} found; using defaults.", CONFIG_FILE_NAME);
                    println!("Run 'taskboard config init' to create one.");
                }
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = TaskboardConfig::load(explicit, cwd)?;
            if config.source.is_none() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            let config_path = explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.join(CONFIG_FILE_NAME));
            if config_path.exists() && !force {
                println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Pass --force to overwrite it.");
                return Ok(());
            }

            TaskboardToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev");
            println!("  - [database] path");
            println!("  - [[defaults.phases]] for the columns of new projects");
            println!();
        }
    }

    Ok(())
}
