//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - ruletree.toml (default configuration)
//! - ruletree.local.toml (git-ignored local overrides)
//! - Environment variables (RULETREE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # ruletree.toml
//! [tree]
//! flavor = "sliced"
//! slice_cache_size = 20
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RULETREE_TREE__FLAVOR=dated
//! RULETREE_LOGGING__LEVEL=debug
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::tree::TreeKind;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tree compilation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Default tree flavor (single, dated, sliced)
    #[serde(default)]
    pub flavor: TreeKind,

    /// Capacity of the sliced root's sub-tree cache
    #[serde(default = "default_slice_cache_size")]
    pub slice_cache_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_slice_cache_size() -> usize {
    crate::tree::DEFAULT_SLICE_CACHE_CAPACITY
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. ruletree.toml (base configuration)
    /// 2. ruletree.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (RULETREE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("ruletree.toml"))
            .merge(Toml::file("ruletree.local.toml"))
            .merge(Env::prefixed("RULETREE_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RULETREE_").split("__"))
            .extract()
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            flavor: TreeKind::Single,
            slice_cache_size: default_slice_cache_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Initialise the global tracing subscriber from the logging config.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new(default_log_level()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A subscriber set elsewhere (tests, embedding application) wins
    drop(result);
}
