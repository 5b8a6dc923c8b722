use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// store configuration stored in config.toml
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}

/// durability settings for the blob and index areas
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// fsync scratch files and parent directories before/after promotion
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fsync: default_fsync(),
        }
    }
}

fn default_fsync() -> bool {
    true
}

/// compression levels used when re-emitting archives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            gzip_level: default_gzip_level(),
            zstd_level: default_zstd_level(),
        }
    }
}

fn default_gzip_level() -> u32 {
    6
}

fn default_zstd_level() -> i32 {
    3
}
