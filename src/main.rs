use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Project and task tracking board")]
pub struct Cli {
    /// Path to taskboard.toml (defaults to ./taskboard.toml, then the user config dir)
    #[arg(short, long, global = true, env = "TASKBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a locally served front-end)
        #[arg(long)]
        dev: bool,
    },
    /// Write a default taskboard.toml, create the database and the first administrator
    Init {
        /// Username of the first administrator
        #[arg(long, default_value = "admin")]
        admin_username: String,

        /// Password of the first administrator
        #[arg(long, env = "TASKBOARD_ADMIN_PASSWORD")]
        admin_password: String,

        /// Overwrite an existing taskboard.toml
        #[arg(long)]
        force: bool,
    },
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Create a user
    Add {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        email: String,
        /// Grant site-wide administrator rights
        #[arg(long)]
        admin: bool,
    },
    /// Reset a user's password
    Passwd {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// List users
    List,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default taskboard.toml file
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        Commands::Config { command } => {
            cmd::cmd_config(&cwd, cli.config.as_deref(), command.clone())?;
        }
        Commands::Init {
            admin_username,
            admin_password,
            force,
        } => {
            cmd::cmd_init(&cwd, cli.config.as_deref(), admin_username, admin_password, *force)?;
        }
        Commands::User { command } => {
            let config = cmd::load_config(&cwd, cli.config.as_deref())?;
            let _guard = taskboard::logging::init(&config.toml.logging)?;
            cmd::cmd_user(&config, command.clone())?;
        }
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            let config = cmd::load_config(&cwd, cli.config.as_deref())?.with_cli_overrides(
                host.clone(),
                *port,
                db_path.clone(),
                *dev,
            );
            let _guard = taskboard::logging::init(&config.toml.logging)?;
            cmd::cmd_serve(config).await?;
        }
    }

    Ok(())
}
