use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::TaskboardDb;
use crate::errors::BoardError;
use crate::models::*;
use crate::services::password;

const USER_COLUMNS: &str = "id, username, first_name, last_name, email, admin, language, timezone, date_format, created_at, updated_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        admin: row.get(5)?,
        language: row.get(6)?,
        timezone: row.get(7)?,
        date_format: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Stored password material for one user.
pub struct Credentials {
    pub user: User,
    pub hash: String,
    pub salt: String,
}

impl TaskboardDb {
    // ── User CRUD ─────────────────────────────────────────────────────

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let username = new.username.trim();
        if username.is_empty() {
            return Err(BoardError::validation("Username must not be empty").into());
        }
        password::validate(&new.password)?;
        if self.get_user_by_username(username)?.is_some() {
            return Err(BoardError::Conflict(format!("Username '{}' is already taken", username)).into());
        }
        let salt = password::new_salt();
        let hash = password::hash(&new.password, &salt);
        self.conn
            .execute(
                "INSERT INTO users (username, first_name, last_name, email, admin, password_hash, password_salt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![username, new.first_name, new.last_name, new.email, new.admin, hash, salt],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn require_user(&self, id: i64) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::new(ObjectKind::User, id)).into())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by username")
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))
            .context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map([], user_from_row)
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?);
        }
        Ok(users)
    }

    pub fn count_users(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")
    }

    /// Apply a partial update. Run inside [`TaskboardDb::transaction`] when
    /// the patch touches several fields.
    pub fn update_user(&self, id: i64, patch: &UserPatch) -> Result<User> {
        let text_fields = [
            ("first_name", &patch.first_name),
            ("last_name", &patch.last_name),
            ("email", &patch.email),
            ("language", &patch.language),
            ("timezone", &patch.timezone),
            ("date_format", &patch.date_format),
        ];
        for (column, value) in text_fields {
            if let Some(v) = value {
                self.conn.execute(
                    &format!("UPDATE users SET {column} = ?1, updated_at = datetime('now') WHERE id = ?2"),
                    params![v, id],
                )
                .with_context(|| format!("Failed to update user {}", column))?;
            }
        }
        if let Some(admin) = patch.admin {
            self.conn.execute(
                "UPDATE users SET admin = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![admin, id],
            )
            .context("Failed to update user admin flag")?;
        }
        self.get_user(id)?
            .ok_or_else(|| BoardError::not_found(ObjectRef::new(ObjectKind::User, id)).into())
    }

    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .context("Failed to delete user")?;
        Ok(count > 0)
    }

    // ── Credentials ───────────────────────────────────────────────────

    pub fn get_credentials(&self, username: &str) -> Result<Option<Credentials>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS}, password_hash, password_salt FROM users WHERE username = ?1"),
                params![username],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(11)?, row.get::<_, String>(12)?)),
            )
            .optional()
            .context("Failed to query credentials")?;
        Ok(row.map(|(user, hash, salt)| Credentials { user, hash, salt }))
    }

    /// Check a username/password pair; returns the user on success.
    pub fn verify_credentials(&self, username: &str, candidate: &str) -> Result<Option<User>> {
        let Some(creds) = self.get_credentials(username)? else {
            return Ok(None);
        };
        if password::verify(candidate, &creds.salt, &creds.hash) {
            Ok(Some(creds.user))
        } else {
            Ok(None)
        }
    }

    pub fn set_password(&self, user_id: i64, new_password: &str) -> Result<()> {
        password::validate(new_password)?;
        let salt = password::new_salt();
        let hash = password::hash(new_password, &salt);
        let count = self
            .conn
            .execute(
                "UPDATE users SET password_hash = ?1, password_salt = ?2, updated_at = datetime('now') WHERE id = ?3",
                params![hash, salt, user_id],
            )
            .context("Failed to update password")?;
        if count == 0 {
            return Err(BoardError::not_found(ObjectRef::new(ObjectKind::User, user_id)).into());
        }
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_session(&self, user_id: i64, ttl_hours: u32) -> Result<Session> {
        let token = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, datetime('now', ?3))",
                params![token, user_id, format!("+{} hours", ttl_hours)],
            )
            .context("Failed to insert session")?;
        self.conn
            .query_row(
                "SELECT token, user_id, created_at, expires_at FROM sessions WHERE token = ?1",
                params![token],
                |row| {
                    Ok(Session {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .context("Session not found after insert")
    }

    /// Resolve a session token to its user, ignoring expired sessions.
    pub fn get_session_user(&self, token: &str) -> Result<Option<User>> {
        let user_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > datetime('now')",
                params![token],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query session")?;
        match user_id {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])
            .context("Failed to purge sessions")
    }

    // ── Login log ─────────────────────────────────────────────────────

    pub fn record_login(&self, user_id: i64, ip: &str, agent: &str) -> Result<UserLogin> {
        self.conn
            .execute(
                "INSERT INTO user_logins (user_id, ip, agent) VALUES (?1, ?2, ?3)",
                params![user_id, ip, agent],
            )
            .context("Failed to insert user login")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, user_id, ip, agent, stamp FROM user_logins WHERE id = ?1",
                params![id],
                login_from_row,
            )
            .context("User login not found after insert")
    }

    pub fn list_logins(&self, user_id: i64, limit: i64) -> Result<Vec<UserLogin>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, ip, agent, stamp FROM user_logins
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .context("Failed to prepare list_logins")?;
        let rows = stmt
            .query_map(params![user_id, limit], login_from_row)
            .context("Failed to query user logins")?;
        let mut logins = Vec::new();
        for row in rows {
            logins.push(row.context("Failed to read user login row")?);
        }
        Ok(logins)
    }
}

fn login_from_row(row: &Row) -> rusqlite::Result<UserLogin> {
    Ok(UserLogin {
        id: row.get(0)?,
        user_id: row.get(1)?,
        ip: row.get(2)?,
        agent: row.get(3)?,
        stamp: row.get(4)?,
    })
}
