//! Project configuration
//!
//! Loaded once at startup from `rbxfs.json` in the project directory. Any
//! problem with the file falls back to defaults instead of aborting.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::utils::atomic_write;

pub const PROJECT_FILENAME: &str = "rbxfs.json";
pub const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DEBOUNCE_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("A project already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("Failed to write project file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize project file: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Contents of the project file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Directory tree holding the scripts
    pub root_directory: PathBuf,
    /// Namespace prefix for every translated name
    pub root_object: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("."),
            root_object: String::new(),
            serve_port: None,
            debounce_ms: None,
        }
    }
}

impl Config {
    /// Load the project file from `project_dir`, falling back to defaults
    ///
    /// A relative `rootDirectory` is resolved against `project_dir`.
    pub fn load(project_dir: &Path) -> Self {
        let path = project_dir.join(PROJECT_FILENAME);

        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration at {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Couldn't parse {}: {}; using defaults", path.display(), e);
                    Config::default()
                }
            },
            Err(_) => {
                tracing::info!("Using default configuration...");
                Config::default()
            }
        };

        if config.root_directory.is_relative() {
            config.root_directory = project_dir.join(&config.root_directory);
        }

        config
    }

    pub fn port(&self) -> u16 {
        self.serve_port.unwrap_or(DEFAULT_PORT)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS))
    }

    /// Write a default project file into `project_dir`
    pub fn init(project_dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = project_dir.join(PROJECT_FILENAME);
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path));
        }

        let serialized = serde_json::to_string_pretty(&Config::default())?;
        atomic_write(&path, serialized.as_bytes())?;

        Ok(path)
    }
}
