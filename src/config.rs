//! Configuration module for the embedding search engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! All values are read once at startup; nothing here is mutable at runtime.
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RE_` and use double underscores
//! to separate nested levels:
//! - `RE_CACHE__MAX_SIZE_BYTES=1073741824` sets `cache.max_size_bytes`
//! - `RE_KERNEL__SIMD_ENABLED=false` sets `kernel.simd_enabled`
//! - `RE_SEARCH__NUM_WORKERS=4` sets `search.num_workers`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vector::WorkerOptions;

/// Directory holding the settings file, searched from the current directory upwards.
const CONFIG_DIR_NAME: &str = ".repo-embeddings";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "RE_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode (verbose logging)
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Index cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Dot-product kernel settings
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Similarity search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Remote vector-search backend settings
    #[serde(default)]
    pub remote_search: RemoteSearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Upper bound for the estimated size of all resident indexes
    #[serde(default = "default_cache_max_size_bytes")]
    pub max_size_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KernelConfig {
    /// Allow the vectorized dot-product path when the CPU supports it
    #[serde(default = "default_true")]
    pub simd_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Number of partitions a large index scan is split into
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Indexes with fewer rows are always scanned on one thread
    #[serde(default = "default_min_rows_to_split")]
    pub min_rows_to_split: usize,

    /// Number of recent query embeddings kept in memory
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RemoteSearchConfig {
    /// Repositories served by the remote backend instead of the local cache
    #[serde(default)]
    pub enabled_repos: Vec<String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_cache_max_size_bytes() -> u64 {
    // 6 GiB
    6 * 1024 * 1024 * 1024
}
fn default_num_workers() -> usize {
    num_cpus::get()
}
fn default_min_rows_to_split() -> usize {
    10_000
}
fn default_query_cache_size() -> usize {
    128
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            cache: CacheConfig::default(),
            kernel: KernelConfig::default(),
            search: SearchConfig::default(),
            remote_search: RemoteSearchConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_cache_max_size_bytes(),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { simd_enabled: true }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            min_rows_to_split: default_min_rows_to_split(),
            query_cache_size: default_query_cache_size(),
        }
    }
}

impl SearchConfig {
    /// Worker partitioning used by similarity search.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            num_workers: self.num_workers,
            min_rows_to_split: self.min_rows_to_split,
        }
    }
}

impl RemoteSearchConfig {
    /// Whether `repo_name` is served remotely. `"*"` enables every repository.
    pub fn is_enabled_for(&self, repo_name: &str) -> bool {
        self.enabled_repos
            .iter()
            .any(|enabled| enabled == "*" || enabled == repo_name)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR_NAME).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for the config directory
    /// Searches from current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR_NAME);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}
