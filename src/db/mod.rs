//! SQLite storage for Taskboard.
//!
//! `TaskboardDb` owns one `rusqlite::Connection`; the per-entity query
//! methods live in the submodules as further `impl TaskboardDb` blocks.
//! Async code reaches the database through [`DbHandle`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;

mod comments;
mod history;
mod links;
mod milestones;
mod phase_durations;
mod phases;
mod projects;
mod sprints;
mod stories;
mod tasks;
mod users;

pub use comments::build_threads;
pub use users::Credentials;

/// Async-safe handle to the taskboard database.
///
/// Wraps `TaskboardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TaskboardDb>>,
}

impl DbHandle {
    pub fn new(db: TaskboardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskboardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| anyhow::Error::new(crate::errors::BoardError::LockPoisoned))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for CLI commands,
    /// startup and tests; never from a request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, TaskboardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct TaskboardDb {
    conn: Connection,
}

impl TaskboardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        self.seed_task_types().context("Failed to seed task types")?;
        Ok(())
    }

    /// Run `f` inside a transaction; any error rolls every statement back.
    ///
    /// Uses `unchecked_transaction` because `DbHandle`'s mutex already
    /// guarantees single-threaded access. Must not be nested.
    pub fn transaction<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let out = f(self)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    email TEXT NOT NULL DEFAULT '',
                    admin INTEGER NOT NULL DEFAULT 0,
                    language TEXT NOT NULL DEFAULT 'en',
                    timezone TEXT NOT NULL DEFAULT 'UTC',
                    date_format TEXT NOT NULL DEFAULT 'YYYY-MM-DD',
                    password_hash TEXT NOT NULL,
                    password_salt TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_logins (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    ip TEXT NOT NULL DEFAULT '',
                    agent TEXT NOT NULL DEFAULT '',
                    stamp TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    manager_id INTEGER NOT NULL REFERENCES users(id),
                    date_start TEXT NOT NULL,
                    date_end TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS project_users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS phases (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    tasks INTEGER NOT NULL DEFAULT 0,
                    is_done INTEGER NOT NULL DEFAULT 0,
                    background_color TEXT NOT NULL DEFAULT '#ffffff',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS task_types (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL UNIQUE,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    chart_color TEXT NOT NULL DEFAULT '',
                    class TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS sprints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    date_start TEXT NOT NULL,
                    date_end TEXT NOT NULL,
                    ignore_weekends INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS milestones (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    deadline TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS stories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    sprint_id INTEGER REFERENCES sprints(id) ON DELETE SET NULL,
                    milestone_id INTEGER REFERENCES milestones(id) ON DELETE SET NULL,
                    parent_id INTEGER REFERENCES stories(id) ON DELETE SET NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    estimate REAL,
                    priority INTEGER NOT NULL DEFAULT 0,
                    is_done INTEGER NOT NULL DEFAULT 0,
                    time_start TEXT,
                    time_end TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    story_id INTEGER NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    sprint_id INTEGER REFERENCES sprints(id) ON DELETE SET NULL,
                    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    phase_id INTEGER NOT NULL REFERENCES phases(id),
                    type_id INTEGER NOT NULL REFERENCES task_types(id),
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    priority INTEGER NOT NULL DEFAULT 0,
                    is_done INTEGER NOT NULL DEFAULT 0,
                    time_start TEXT,
                    time_end TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS phase_durations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    phase_id INTEGER NOT NULL REFERENCES phases(id) ON DELETE CASCADE,
                    story_id INTEGER NOT NULL,
                    sprint_id INTEGER,
                    project_id INTEGER NOT NULL,
                    time_start TEXT NOT NULL DEFAULT (datetime('now')),
                    time_end TEXT
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_name TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    parent_id INTEGER REFERENCES comments(id) ON DELETE CASCADE,
                    comment TEXT NOT NULL,
                    created_user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS external_links (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    link TEXT NOT NULL,
                    parameters TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS links (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_name TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    external_link_id INTEGER NOT NULL REFERENCES external_links(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    url TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    object_name TEXT NOT NULL,
                    object_id INTEGER NOT NULL,
                    object_data TEXT NOT NULL,
                    message TEXT,
                    user_id INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_project_users_user ON project_users(user_id);
                CREATE INDEX IF NOT EXISTS idx_phases_project ON phases(project_id, sort_order);
                CREATE INDEX IF NOT EXISTS idx_sprints_project ON sprints(project_id);
                CREATE INDEX IF NOT EXISTS idx_stories_project ON stories(project_id, sprint_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_story ON tasks(story_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_sprint_phase ON tasks(sprint_id, phase_id);
                CREATE INDEX IF NOT EXISTS idx_phase_durations_task ON phase_durations(task_id);
                CREATE INDEX IF NOT EXISTS idx_comments_object ON comments(object_name, object_id);
                CREATE INDEX IF NOT EXISTS idx_links_object ON links(object_name, object_id);
                CREATE INDEX IF NOT EXISTS idx_history_object ON history(object_name, object_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    fn seed_task_types(&self) -> Result<()> {
        let defaults = [
            ("Task", 0, "#b3dbff", "alert-info"),
            ("Test", 1, "#c6f0c2", "alert-success"),
            ("Bug", 2, "#f5c6c6", "alert-danger"),
        ];
        for (title, order, color, class) in defaults {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO task_types (title, sort_order, chart_color, class) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![title, order, color, class],
                )
                .with_context(|| format!("Failed to seed task type {}", title))?;
        }
        Ok(())
    }
}

/// Parse a `YYYY-MM-DD` column value.
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date in database: '{}'", value))
}

pub(crate) fn parse_optional_date(value: Option<String>) -> Result<Option<NaiveDate>> {
    value.as_deref().map(parse_date).transpose()
}
