//! `taskboard init`: config file, database and first administrator.

use std::path::Path;

use anyhow::Result;
use taskboard::config::{CONFIG_FILE_NAME, TaskboardConfig, TaskboardToml};
use taskboard::models::{NewUser, ObjectKind, ObjectRef};
use taskboard::services::history;

pub fn cmd_init(
    cwd: &Path,
    explicit: Option<&Path>,
    admin_username: &str,
    admin_password: &str,
    force: bool,
) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.join(CONFIG_FILE_NAME));

    if config_path.exists() && !force {
        println!("Using existing {}", config_path.display());
    } else {
        TaskboardToml::default().save(&config_path)?;
        println!("Created {}", config_path.display());
    }

    let config = TaskboardConfig::load(Some(&config_path), cwd)?;
    let db = super::open_db(&config)?;
    println!("Database ready at {}", config.db_path().display());

    if db.count_users()? > 0 {
        println!("Users already exist; no administrator created.");
        return Ok(());
    }

    let admin = db.transaction(|db| {
        let user = db.create_user(&NewUser {
            username: admin_username.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            admin: true,
            password: admin_password.to_string(),
        })?;
        history::record(db, ObjectRef::new(ObjectKind::User, user.id), &user, None, None)?;
        Ok(user)
    })?;
    tracing::info!(user_id = admin.id, username = %admin.username, "Created first administrator");
    println!("Created administrator '{}'", admin.username);
    println!();
    println!("Next steps:");
    println!("  1. Review {}", config_path.display());
    println!("  2. Run `taskboard serve` and sign in as '{}'", admin.username);
    Ok(())
}
