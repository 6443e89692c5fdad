//! Settings file for the `unidb` binary
//!
//! Settings are read from YAML, then the `UNIDB_DRIVER` and `UNIDB_DATABASE`
//! environment variables override the matching keys. The library itself
//! never reads settings; callers convert them into `ConnectOptions` and
//! `PoolConfig`.
//!
//! ```yaml
//! driver: postgresql
//! database: orders
//! host: db.internal
//! port: 5432
//! username: app
//! password: s3cret
//! pool:
//!   max_size: 10
//!   acquire_timeout_secs: 5
//! ```

use crate::driver::ConnectOptions;
use crate::error::{Error, Result, ResultExt};
use crate::pool::{PoolConfig, DEFAULT_MAX_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// File `Settings::discover` looks for in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "unidb.yaml";

/// Environment variable overriding `driver`
pub const ENV_DRIVER: &str = "UNIDB_DRIVER";

/// Environment variable overriding `database`
pub const ENV_DATABASE: &str = "UNIDB_DATABASE";

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Driver kind
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Database name or file path
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// ODBC data source name
    #[serde(default)]
    pub dsn: Option<String>,

    /// Complete connection string; wins over every other key
    #[serde(default)]
    pub url: Option<String>,

    /// Extra URL query parameters
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    #[serde(default)]
    pub pool: PoolSettings,
}

fn default_driver() -> String {
    "sqlite".to_string()
}

fn default_database() -> String {
    "app.db".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            database: default_database(),
            host: None,
            port: None,
            username: None,
            password: None,
            dsn: None,
            url: None,
            query: BTreeMap::new(),
            pool: PoolSettings::default(),
        }
    }
}

/// Pool section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Seconds to wait for a free raw connection; 0 waits forever
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Settings {
    /// Parse settings from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Ok(Self::from_yaml_str(&content)?.apply_env())
    }

    /// Load `unidb.yaml` from the working directory if present, defaults otherwise
    pub fn discover() -> Result<Self> {
        let path = Path::new(DEFAULT_SETTINGS_FILE);
        if path.exists() {
            tracing::debug!("Loading settings from {}", path.display());
            Self::load(path)
        } else {
            Ok(Self::default().apply_env())
        }
    }

    /// Apply `UNIDB_DRIVER` / `UNIDB_DATABASE` from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup(ENV_DRIVER).filter(|v| !v.is_empty()) {
            self.driver = driver;
        }
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            self.database = database;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(Error::config("driver must not be empty"));
        }
        if self.pool.max_size == 0 {
            return Err(Error::config("pool.max_size must be at least 1"));
        }
        Ok(())
    }

    // ========================================================================
    // Conversions
    // ========================================================================

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            driver: self.driver.clone(),
            database: Some(self.database.clone()).filter(|d| !d.is_empty()),
            dsn: self.dsn.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            host: self.host.clone(),
            port: self.port,
            query: self.query.clone(),
            url: self.url.clone(),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        let timeout = match self.pool.acquire_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        PoolConfig::new()
            .with_max_size(self.pool.max_size)
            .with_acquire_timeout(timeout)
    }
}
