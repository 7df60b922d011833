//! Configuration management for OptionSync
//!
//! Loads from optional config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub poll: PollConfig,
    pub persistence: PersistenceConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Analytics server base URL (no trailing slash needed)
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Option-chain polling period in milliseconds
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Session record file name inside `data_dir`
    pub session_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// User whose server-side token is used
    pub user: Option<String>,
    /// Expiry date (YYYY-MM-DD)
    pub expiry: Option<String>,
    /// Start polling at launch when user and expiry are set
    pub auto_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines
    pub json: bool,
    /// Default filter when RUST_LOG is not set
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PersistenceConfig {
    pub fn session_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.session_file)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (OPTIONSYNC__*)
            .add_source(Environment::with_prefix("OPTIONSYNC").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Defaults only, without files or environment
    pub fn defaults() -> Result<Self> {
        let config = Self::builder()?
            .build()
            .context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            // API defaults
            .set_default("api.base_url", "http://localhost:8000")?
            .set_default("api.request_timeout_ms", 10_000)?
            // Polling defaults
            .set_default("poll.interval_ms", 5_000)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.session_file", "option_chain_session.json")?
            // Session defaults
            .set_default("session.auto_start", false)?
            // Logging defaults
            .set_default("logging.json", false)?
            .set_default("logging.filter", "optionsync=info")?
            // Dashboard defaults
            .set_default("dashboard.enabled", false)?
            .set_default("dashboard.port", 3001)?)
    }

    /// Generate a one-line digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "api={} poll={}ms session_file={} user={} expiry={} auto_start={}",
            self.api.base_url,
            self.poll.interval_ms,
            self.persistence.session_path().display(),
            self.session.user.as_deref().unwrap_or("-"),
            self.session.expiry.as_deref().unwrap_or("-"),
            self.session.auto_start
        )
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.base_url must not be empty");
        }
        if self.poll.interval_ms == 0 {
            bail!("poll.interval_ms must be greater than zero");
        }
        if self.api.request_timeout_ms == 0 {
            bail!("api.request_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
