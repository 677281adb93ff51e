//! Configuration loading and validation.
//!
//! Loads `./blp-monitor.toml` (or `$BLP_CONFIG_PATH`, or an explicit
//! `--config` path). Environment variables override file values; file
//! values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::kernel::label::DEFAULT_LEVEL_NAMES;
use crate::kernel::{ClearanceScale, Mode, PolicySettings, WriteRule};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "blp-monitor.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Policy settings (`[kernel]`).
    pub kernel: KernelConfig,
    /// Listener settings (`[server]`).
    pub server: ServerConfig,
    /// Persistence backend (`[store]`).
    pub store: StoreConfig,
    /// Log output (`[logging]`).
    pub logging: LoggingConfig,
}

impl MonitorConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// An explicit `path` must exist. Without one, `$BLP_CONFIG_PATH` or
    /// `./blp-monitor.toml` is tried and a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// fails [`MonitorConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::load_default_file(Self::config_path_with(env))?,
        };
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        tracing::info!(path = %path.display(), "loading config from file");
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    fn load_default_file(path: PathBuf) -> Result<Self> {
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("BLP_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        override_parsed(&env, "BLP_MODE", &mut self.kernel.mode);
        override_parsed(&env, "BLP_WRITE_RULE", &mut self.kernel.write_rule);
        override_parsed(&env, "BLP_CATEGORIES", &mut self.kernel.categories);
        if let Some(v) = env("BLP_HOST") {
            self.server.host = v;
        }
        override_parsed(&env, "BLP_PORT", &mut self.server.port);
        override_parsed(&env, "BLP_STORE", &mut self.store.backend);
        if let Some(v) = env("BLP_STORE_PATH") {
            self.store.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("BLP_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("BLP_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error for an unusable clearance scale or line limit.
    pub fn validate(&self) -> Result<()> {
        ClearanceScale::new(self.kernel.levels.clone()).context("invalid [kernel].levels")?;
        if self.server.max_line_bytes == 0 {
            anyhow::bail!("[server].max_line_bytes must be greater than zero");
        }
        Ok(())
    }

    /// Policy settings for the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the clearance scale is invalid.
    pub fn policy_settings(&self) -> Result<PolicySettings> {
        Ok(PolicySettings {
            mode: self.kernel.mode,
            write_rule: self.kernel.write_rule,
            categories: self.kernel.categories,
            scale: ClearanceScale::new(self.kernel.levels.clone())
                .context("invalid [kernel].levels")?,
        })
    }

    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn override_parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(v) = env(key) {
        match v.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
        }
    }
}

// ── Kernel config ───────────────────────────────────────────────

/// Policy settings (`[kernel]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Label-mutation discipline.
    pub mode: Mode,
    /// Star-property variant.
    pub write_rule: WriteRule,
    /// Whether category sets take part in decisions.
    pub categories: bool,
    /// Clearance scale display names, lowest first.
    pub levels: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            write_rule: WriteRule::default(),
            categories: false,
            levels: DEFAULT_LEVEL_NAMES.iter().map(|n| (*n).to_owned()).collect(),
        }
    }
}

// ── Server config ───────────────────────────────────────────────

/// Listener settings (`[server]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port; 0 picks an ephemeral port.
    pub port: u16,
    /// Longest accepted request line, newline excluded.
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5010,
            max_line_bytes: 64 * 1024,
        }
    }
}

// ── Store config ────────────────────────────────────────────────

/// Persistence backend choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Nothing survives a restart.
    #[default]
    Memory,
    /// SQLite file.
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

/// Persistence settings (`[store]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend.
    pub backend: StoreBackend,
    /// SQLite file; defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// SQLite path, falling back to `<data dir>/blp-monitor/state.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is set and the home directory cannot be
    /// determined.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(dirs.data_dir().join("blp-monitor").join("state.db"))
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Log output (`[logging]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for JSON log files; stderr only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}
