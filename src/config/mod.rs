//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod worker;

pub use worker::{ConfigWarning, WorkerConfig};

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::Path;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub database_max_connections: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load worker settings from a TOML file, then apply environment
    /// variables on top.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let mut config = Self::from_env()?;
        let mut worker = WorkerConfig::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))?;
        worker.apply_lookup(|name| std::env::var(name).ok())?;
        config.worker = worker;
        Ok(config)
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut worker = WorkerConfig::default();
        worker.apply_lookup(&lookup)?;

        let database_max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::Config(format!("DATABASE_MAX_CONNECTIONS must be an integer, got {raw}"))
            })?,
            None => 10,
        };

        Ok(Self {
            database_url: SecretString::from(required_var(&lookup, "DATABASE_URL")?),
            database_max_connections,
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            worker,
        })
    }
}

fn required_var<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}
