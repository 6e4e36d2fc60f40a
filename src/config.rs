use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::dialect::DatabaseParams;
use crate::{Error, Result};

/// Root directory for versioned data migration scripts
pub const DEFAULT_MIGRATIONS_PATH: &str = "db/migrations";

/// Startup configuration for [`crate::init`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run the versioned migration scripts after schemas are synchronized
    pub migrate_data: bool,
    /// Scripts for a database live in `<migrations_path>/<database name>`
    pub migrations_path: PathBuf,
    /// Databases to register before initialization
    pub databases: Vec<DatabaseParams>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            migrate_data: false,
            migrations_path: PathBuf::from(DEFAULT_MIGRATIONS_PATH),
            databases: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a `.toml`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(Error::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }
}
