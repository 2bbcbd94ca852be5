//! Engine configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional file
//! (format chosen by extension), then `ENTIGRAPH__SECTION__KEY` environment
//! variables.

use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{MemoryEngine, RelationalEngine};
use crate::error::{EntigraphError, Result};
use crate::persist::{PersistenceMode, Persistor};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub persistence: PersistenceConfig,
    pub encryption: EncryptionConfig,
    pub store: StoreConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Memory limit the valve measures against; no limit disables the valve.
    pub memory_limit_bytes: Option<u64>,
    pub pressure_ratio: f64,
    /// Size of the pages `/proc/self/statm` counts in.
    pub page_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_limit_bytes: None,
            pressure_ratio: 0.5,
            page_size_bytes: 4096,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Depth used by [`crate::session::Session::save`].
    pub default_depth: u32,
    pub created_column: Option<String>,
    pub modified_column: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            default_depth: 1,
            created_column: None,
            modified_column: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Password per encryption scope.
    pub scopes: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    #[default]
    Memory,
    SqliteMemory,
    SqliteFile,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub mode: StoreMode,
    pub path: Option<String>,
}

impl EngineConfig {
    /// Defaults, overridden by `path` when given and present, overridden by
    /// the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let builder = builder.add_source(
            Environment::with_prefix("ENTIGRAPH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        let config: EngineConfig = builder.build()?.try_deserialize()?;
        info!(store = ?config.store.mode, cache = config.cache.enabled, "configuration loaded");
        Ok(config)
    }

    /// The relational engine the store section selects.
    pub fn open_engine(&self) -> Result<Box<dyn RelationalEngine>> {
        let engine: Box<dyn RelationalEngine> = match self.store.mode {
            StoreMode::Memory => Box::new(MemoryEngine::new()),
            StoreMode::SqliteMemory => Box::new(Persistor::new(PersistenceMode::InMemory)?),
            StoreMode::SqliteFile => {
                let path = self.store.path.clone().ok_or_else(|| {
                    EntigraphError::Config("store.path is required for sqlite_file".into())
                })?;
                Box::new(Persistor::new(PersistenceMode::File(path))?)
            }
        };
        Ok(engine)
    }
}
