//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `init`   | `Init`           |
//! | `user`   | `User`           |
//! | `config` | `Config`         |

use std::path::Path;

use anyhow::{Context, Result};
use taskboard::config::TaskboardConfig;
use taskboard::db::TaskboardDb;

pub mod config;
pub mod init;
pub mod serve;
pub mod user;

pub use config::cmd_config;
pub use init::cmd_init;
pub use serve::cmd_serve;
pub use user::cmd_user;

pub fn load_config(cwd: &Path, explicit: Option<&Path>) -> Result<TaskboardConfig> {
    TaskboardConfig::load(explicit, cwd)
}

/// Open (and migrate) the configured database, creating its directory.
pub fn open_db(config: &TaskboardConfig) -> Result<TaskboardDb> {
    let path = config.db_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    TaskboardDb::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}
