//! User administration from the command line: `taskboard user`.

use anyhow::{Result, bail};
use taskboard::config::TaskboardConfig;
use taskboard::models::{NewUser, ObjectKind, ObjectRef};
use taskboard::services::history;

use super::super::UserCommands;

pub fn cmd_user(config: &TaskboardConfig, command: UserCommands) -> Result<()> {
    let db = super::open_db(config)?;

    match command {
        UserCommands::Add {
            username,
            password,
            first_name,
            last_name,
            email,
            admin,
        } => {
            let user = db.transaction(|db| {
                let user = db.create_user(&NewUser {
                    username,
                    first_name,
                    last_name,
                    email,
                    admin,
                    password,
                })?;
                history::record(db, ObjectRef::new(ObjectKind::User, user.id), &user, None, None)?;
                Ok(user)
            })?;
            tracing::info!(user_id = user.id, admin = user.admin, "Created user");
            println!(
                "Created {} '{}' (id {})",
                if user.admin { "administrator" } else { "user" },
                user.username,
                user.id
            );
        }
        UserCommands::Passwd { username, password } => {
            let Some(user) = db.get_user_by_username(&username)? else {
                bail!("No user named '{}'", username);
            };
            db.set_password(user.id, &password)?;
            tracing::info!(user_id = user.id, "Password reset from CLI");
            println!("Password updated for '{}'", user.username);
        }
        UserCommands::List => {
            let users = db.list_users()?;
            if users.is_empty() {
                println!("No users. Run `taskboard init` or `taskboard user add`.");
                return Ok(());
            }
            println!("{:>4}  {:<20} {:<30} admin", "id", "username", "name");
            for user in users {
                println!(
                    "{:>4}  {:<20} {:<30} {}",
                    user.id,
                    user.username,
                    user.full_name(),
                    if user.admin { "yes" } else { "" }
                );
            }
        }
    }

    Ok(())
}
