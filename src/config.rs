//! Configuration for Taskboard.
//!
//! Settings are read from `taskboard.toml`, looked up in the working
//! directory first and then in the user config directory
//! (`~/.config/taskboard/taskboard.toml` on Linux). Values are layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev = false
//!
//! [database]
//! path = "taskboard.db"
//!
//! [auth]
//! session_ttl_hours = 168
//!
//! [logging]
//! level = "info"
//! json = false
//! directory = "logs"
//!
//! [[defaults.phases]]
//! title = "Tasks"
//!
//! [[defaults.phases]]
//! title = "Done"
//! is_done = true
//! background_color = "#dff0d8"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "taskboard.toml";

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a locally served front-end.
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("taskboard.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Lifetime of a login session token.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u32,
}

fn default_session_ttl_hours() -> u32 {
    24 * 7
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter directive used when `TASKBOARD_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// When set, logs are also written to a daily-rolling file here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

/// A phase created for every new project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: i32,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default = "crate::models::default_phase_color")]
    pub background_color: String,
}

impl PhaseTemplate {
    fn new(title: &str, is_done: bool, background_color: &str) -> Self {
        Self {
            title: title.to_string(),
            description: String::new(),
            tasks: 0,
            is_done,
            background_color: background_color.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_phases")]
    pub phases: Vec<PhaseTemplate>,
}

fn default_phases() -> Vec<PhaseTemplate> {
    vec![
        PhaseTemplate::new("Tasks", false, "#f5f5f5"),
        PhaseTemplate::new("In progress", false, "#fcf8e3"),
        PhaseTemplate::new("Done", true, "#dff0d8"),
    ]
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            phases: default_phases(),
        }
    }
}

/// The complete taskboard.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskboardToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
}

impl TaskboardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; the OS will pick a random port".to_string());
        }
        if self.auth.session_ttl_hours == 0 {
            warnings.push("auth.session_ttl_hours is 0; sessions expire immediately".to_string());
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a tracing filter such as 'info' or 'taskboard=debug'",
                self.logging.level
            ));
        }

        let phases = &self.defaults.phases;
        if phases.is_empty() {
            warnings.push("defaults.phases is empty; new projects will have no board columns".into());
        } else if !phases.iter().any(|p| p.is_done) {
            warnings.push("No default phase is marked is_done; tasks can never be completed".into());
        }
        for phase in phases {
            if phase.tasks < 0 {
                warnings.push(format!(
                    "Phase '{}' has a negative task limit ({})",
                    phase.title, phase.tasks
                ));
            }
        }
        let mut titles: Vec<&str> = phases.iter().map(|p| p.title.as_str()).collect();
        titles.sort_unstable();
        if titles.windows(2).any(|w| w[0] == w[1]) {
            warnings.push("defaults.phases contains duplicate titles".to_string());
        }

        warnings
    }
}

/// Find the config file: working directory first, then the user config dir.
pub fn find_config_file(cwd: &Path) -> Option<PathBuf> {
    let local = cwd.join(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|d| d.join("taskboard").join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}

/// Resolved runtime configuration: file, then environment, then CLI.
#[derive(Debug, Clone, Default)]
pub struct TaskboardConfig {
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
    pub toml: TaskboardToml,
}

impl TaskboardConfig {
    /// Load from an explicit file, or discover one relative to `cwd`.
    /// Environment overrides are applied on top.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        let source = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(cwd),
        };
        let toml = match &source {
            Some(path) => TaskboardToml::load(path)?,
            None => TaskboardToml::default(),
        };
        let mut config = Self { source, toml };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `TASKBOARD_*` overrides read through `get`.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = get("TASKBOARD_HOST") {
            self.toml.server.host = host;
        }
        if let Some(port) = get("TASKBOARD_PORT") {
            self.toml.server.port = port
                .parse()
                .with_context(|| format!("Invalid TASKBOARD_PORT '{}'", port))?;
        }
        if let Some(path) = get("TASKBOARD_DB_PATH") {
            self.toml.database.path = PathBuf::from(path);
        }
        if let Some(ttl) = get("TASKBOARD_SESSION_TTL_HOURS") {
            self.toml.auth.session_ttl_hours = ttl
                .parse()
                .with_context(|| format!("Invalid TASKBOARD_SESSION_TTL_HOURS '{}'", ttl))?;
        }
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn with_cli_overrides(
        mut self,
        host: Option<String>,
        port: Option<u16>,
        db_path: Option<PathBuf>,
        dev: bool,
    ) -> Self {
        if let Some(host) = host {
            self.toml.server.host = host;
        }
        if let Some(port) = port {
            self.toml.server.port = port;
        }
        if let Some(db_path) = db_path {
            self.toml.database.path = db_path;
        }
        if dev {
            self.toml.server.dev = true;
        }
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.toml.database.path
    }

    pub fn session_ttl_hours(&self) -> u32 {
        self.toml.auth.session_ttl_hours
    }

    pub fn default_phases(&self) -> &[PhaseTemplate] {
        &self.toml.defaults.phases
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
