//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.otterlens.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".otterlens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Producer endpoint settings.
    #[serde(default)]
    pub producers: ProducersConfig,

    /// Pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Access control.
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path. Empty means stdout.
    #[serde(default)]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Remote analysis producer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducersConfig {
    /// Base URL shared by all producer endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for a single HTTP exchange.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Deadline for each producer, after which its fallback is used.
    #[serde(default = "default_producer_timeout")]
    pub producer_timeout_seconds: u64,
}

impl Default for ProducersConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            call_timeout_seconds: default_call_timeout(),
            producer_timeout_seconds: default_producer_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_call_timeout() -> u64 {
    60
}

fn default_producer_timeout() -> u64 {
    120
}

/// Aggregation pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for the whole analysis once the cache has missed.
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_seconds: u64,

    /// Share one set of producer calls between identical concurrent requests.
    #[serde(default)]
    pub coalesce_duplicates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            overall_timeout_seconds: default_overall_timeout(),
            coalesce_duplicates: false,
        }
    }
}

fn default_overall_timeout() -> u64 {
    300
}

/// Where cached aggregates live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local, lost on exit.
    #[default]
    Memory,
    /// JSON files in `cache.directory`.
    File,
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Time to live for cached aggregates.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    /// Capacity of the memory backend.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// Directory of the file backend.
    #[serde(default = "default_cache_directory")]
    pub directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl_seconds: default_ttl(),
            max_entries: default_max_entries(),
            directory: default_cache_directory(),
        }
    }
}

fn default_ttl() -> u64 {
    86_400 // one day
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_cache_directory() -> String {
    ".otterlens-cache".to_string()
}

/// Which users may analyze which repositories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Grant every user access to every repository.
    #[serde(default)]
    pub allow_all: bool,

    #[serde(default)]
    pub grants: Vec<Grant>,
}

/// Repositories one user may analyze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub user_id: u64,
    #[serde(default)]
    pub repo_ids: Vec<u64>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.otterlens.toml` from `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref endpoint) = args.endpoint {
            self.producers.base_url = endpoint.clone();
        }

        if let Some(timeout) = args.timeout {
            self.pipeline.overall_timeout_seconds = timeout;
        }

        if let Some(backend) = args.cache {
            self.cache.backend = backend;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
        if args.coalesce {
            self.pipeline.coalesce_duplicates = true;
        }
    }

    /// Log level for the merged settings. `--quiet` wins over verbosity.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
