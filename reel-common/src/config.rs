//! Bootstrap configuration loading
//!
//! Configuration is a single TOML file with two tables:
//! - `[logging]` - log level for binaries that initialise a subscriber
//! - `[pool]` - decoder pool tuning (window sizes, caps, timeouts, backoff)
//!
//! Every field has a built-in default, so an absent file or an absent key is
//! never fatal. A file that exists but does not parse is.
//!
//! # Config file resolution priority
//!
//! 1. Explicit path (command-line argument)
//! 2. Environment variable (`REEL_CONFIG`)
//! 3. Platform config directory (`<config_dir>/reel/config.toml`)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "REEL_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Decoder pool tuning (optional)
    #[serde(default)]
    pub pool: PoolSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Decoder pool tuning constants
///
/// These are heuristics, not contracts. All of them can be overridden per
/// deployment; the defaults match what a phone-class device tolerates.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    /// Indices ahead of the current one kept initialized
    pub preload_window: usize,
    /// Simultaneous cold initializations allowed across all feeds
    pub max_concurrent_inits: usize,
    /// Max index distance from current before a handle is evicted
    pub keep_range: usize,
    /// Hard bound on resident handles
    pub max_pool_size: usize,
    /// Delay before a deferred preload request is re-enqueued
    pub defer_delay_ms: u64,
    /// Init timeout for progressive (single file) URLs
    pub init_timeout_progressive_ms: u64,
    /// Init timeout for segmented-stream URLs (more upfront negotiation)
    pub init_timeout_segmented_ms: u64,
    /// Failed attempts per index before it is abandoned
    pub max_attempts: u32,
    /// First out-of-memory backoff delay
    pub oom_backoff_base_ms: u64,
    /// Added to the OOM backoff delay on each further attempt
    pub oom_backoff_step_ms: u64,
    /// Delay for timeout / not-found retries
    pub fixed_retry_delay_ms: u64,
    /// Page-change debounce window
    pub debounce_ms: u64,
    /// Interval between first-frame priming polls
    pub priming_poll_ms: u64,
    /// Seek target used to kick the decoder during priming
    pub priming_seek_ms: u64,
    /// Force the native surface to mount after this long without a first frame
    pub surface_fallback_ms: u64,
    /// Distance from the end at which auto-advance fires
    pub near_end_threshold_ms: u64,
    /// Delay between sign-in and the single autoplay attempt it triggers
    pub sign_in_autoplay_delay_ms: u64,
    /// Advance to the next video at end of stream instead of looping
    pub auto_advance: bool,
    /// Volume restored after priming and applied on play
    pub default_volume: f32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            preload_window: 2,
            max_concurrent_inits: 2,
            keep_range: 3,
            max_pool_size: 5,
            defer_delay_ms: 500,
            init_timeout_progressive_ms: 10_000,
            init_timeout_segmented_ms: 30_000,
            max_attempts: 3,
            oom_backoff_base_ms: 10_000,
            oom_backoff_step_ms: 5_000,
            fixed_retry_delay_ms: 3_000,
            debounce_ms: 150,
            priming_poll_ms: 50,
            priming_seek_ms: 1,
            surface_fallback_ms: 700,
            near_end_threshold_ms: 200,
            sign_in_autoplay_delay_ms: 500,
            auto_advance: false,
            default_volume: 1.0,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a file that must exist
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Resolves which config file to read, then loads it
///
/// Missing files degrade to defaults with a warning; only an unreadable
/// or malformed file is an error.
pub struct ConfigResolver {
    env_var_name: String,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self {
            env_var_name: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Use a different environment variable (tests, embedded hosts)
    pub fn with_env_var(env_var_name: impl Into<String>) -> Self {
        Self {
            env_var_name: env_var_name.into(),
        }
    }

    /// Determine the config file path, if any, following the priority order
    pub fn resolve_path(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var_name) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: Platform config directory
        default_config_path().filter(|p| p.exists())
    }

    /// Resolve and load configuration
    pub fn load(&self, cli_arg: Option<&Path>) -> Result<TomlConfig> {
        match self.resolve_path(cli_arg) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                TomlConfig::load_file(&path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(TomlConfig::default())
            }
            None => {
                info!("No config file found, using built-in defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("reel").join("config.toml"))
}
