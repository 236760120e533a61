//! Backend selection and lock tuning.
//!
//! Settings are read with the `config` crate: an optional file first, then
//! environment variables prefixed with `MODELPLUS`, using `__` to reach nested
//! keys (`MODELPLUS__BACKEND__KIND=sqlite`, `MODELPLUS__LOCK__TTL_MS=2000`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{ModelplusError, Result};
use crate::store::{MemoryStore, SqliteStore, Store};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub lock: LockSettings,
}

/// Exactly one backend per settings object.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSettings {
    #[default]
    Memory,
    Sqlite { file: PathBuf },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockSettings {
    pub retry_interval_ms: u64,
    pub ttl_ms: u64,
    pub max_attempts: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            retry_interval_ms: 500,
            ttl_ms: 1000,
            max_attempts: 20,
        }
    }
}

impl LockSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Settings {
    /// Reads `path` when it exists, then applies `MODELPLUS__*` overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("MODELPLUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from TOML text, ignoring the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn sqlite(file: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendSettings::Sqlite { file: file.into() },
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.lock.max_attempts == 0 {
            return Err(ModelplusError::Config(
                "lock.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lock.ttl_ms == 0 {
            return Err(ModelplusError::Config("lock.ttl_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn open_store(&self) -> Result<Arc<dyn Store>> {
        Ok(match &self.backend {
            BackendSettings::Memory => Arc::new(MemoryStore::new()),
            BackendSettings::Sqlite { file } if file.as_os_str() == ":memory:" => {
                Arc::new(SqliteStore::open_in_memory()?)
            }
            BackendSettings::Sqlite { file } => Arc::new(SqliteStore::open(file)?),
        })
    }
}
