//! Configuration file support for RLN nodes.
//!
//! Settings are loaded from TOML. Every section and field has a default, so
//! an empty file is a valid configuration.

use crate::cache::DEFAULT_CACHE_LENGTH;
use crate::merkle::{MAX_DEPTH, MIN_DEPTH};
use crate::registry::DEFAULT_TREE_DEPTH;
use crate::utils::parse_field;
use anyhow::{Context, Result};
use ark_bn254::Fr;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default epoch length in seconds.
pub const DEFAULT_EPOCH_GRANULARITY_SECS: u64 = 60;

/// Configuration for an RLN deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub keys: KeysConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_tree_depth")]
    pub depth: usize,
    /// Decimal or `0x`-hex scalar used for unfilled leaves.
    #[serde(default = "default_zero_value")]
    pub zero_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of epochs retained; 0 keeps every epoch.
    #[serde(default = "default_cache_length")]
    pub cache_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_rln_identifier")]
    pub rln_identifier: String,
    #[serde(default = "default_epoch_granularity_secs")]
    pub epoch_granularity_secs: u64,
}

/// Key material for the built-in verification backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Groth16 verifying key in arkworks compressed form.
    #[serde(default)]
    pub verification_key: Option<PathBuf>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_TREE_DEPTH,
            zero_value: default_zero_value(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_length: DEFAULT_CACHE_LENGTH,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            rln_identifier: default_rln_identifier(),
            epoch_granularity_secs: DEFAULT_EPOCH_GRANULARITY_SECS,
        }
    }
}

fn default_tree_depth() -> usize {
    DEFAULT_TREE_DEPTH
}

fn default_zero_value() -> String {
    "0".to_string()
}

fn default_cache_length() -> usize {
    DEFAULT_CACHE_LENGTH
}

fn default_rln_identifier() -> String {
    "0".to_string()
}

fn default_epoch_granularity_secs() -> u64 {
    DEFAULT_EPOCH_GRANULARITY_SECS
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn load_from_file_or_default(path: &PathBuf) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Checks ranges and that every scalar parses.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&self.tree.depth) {
            return Err(anyhow::anyhow!(
                "tree.depth must be between {} and {}, got {}",
                MIN_DEPTH,
                MAX_DEPTH,
                self.tree.depth
            ));
        }
        if self.protocol.epoch_granularity_secs == 0 {
            return Err(anyhow::anyhow!(
                "protocol.epoch_granularity_secs must be greater than zero"
            ));
        }
        self.zero_value()?;
        self.rln_identifier()?;
        Ok(())
    }

    #[must_use]
    pub fn tree_depth(&self) -> usize {
        self.tree.depth
    }

    pub fn zero_value(&self) -> Result<Fr> {
        parse_field(&self.tree.zero_value).context("tree.zero_value is not a valid field element")
    }

    pub fn rln_identifier(&self) -> Result<Fr> {
        parse_field(&self.protocol.rln_identifier)
            .context("protocol.rln_identifier is not a valid field element")
    }
}
