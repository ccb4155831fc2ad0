//! Runtime pool configuration
//!
//! `PoolConfig` is the validated, `Duration`-typed form of the
//! `[pool]` table from the bootstrap TOML. Every component receives a clone.

use crate::decoder::StreamFormat;
use crate::error::{Error, Result};
use crate::preload::retry::RetryPolicy;
use reel_common::config::PoolSettings;
use std::time::Duration;

/// Validated decoder pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub preload_window: usize,
    pub max_concurrent_inits: usize,
    pub keep_range: usize,
    pub max_pool_size: usize,
    pub defer_delay: Duration,
    pub init_timeout_progressive: Duration,
    pub init_timeout_segmented: Duration,
    pub max_attempts: u32,
    pub oom_backoff_base: Duration,
    pub oom_backoff_step: Duration,
    pub fixed_retry_delay: Duration,
    pub debounce: Duration,
    pub priming_poll: Duration,
    pub priming_seek: Duration,
    pub surface_fallback: Duration,
    pub near_end_threshold: Duration,
    pub sign_in_autoplay_delay: Duration,
    pub auto_advance: bool,
    pub default_volume: f32,
}

impl PoolConfig {
    /// Convert and validate bootstrap settings
    pub fn from_settings(settings: &PoolSettings) -> Result<Self> {
        let config = Self {
            preload_window: settings.preload_window,
            max_concurrent_inits: settings.max_concurrent_inits,
            keep_range: settings.keep_range,
            max_pool_size: settings.max_pool_size,
            defer_delay: Duration::from_millis(settings.defer_delay_ms),
            init_timeout_progressive: Duration::from_millis(settings.init_timeout_progressive_ms),
            init_timeout_segmented: Duration::from_millis(settings.init_timeout_segmented_ms),
            max_attempts: settings.max_attempts,
            oom_backoff_base: Duration::from_millis(settings.oom_backoff_base_ms),
            oom_backoff_step: Duration::from_millis(settings.oom_backoff_step_ms),
            fixed_retry_delay: Duration::from_millis(settings.fixed_retry_delay_ms),
            debounce: Duration::from_millis(settings.debounce_ms),
            priming_poll: Duration::from_millis(settings.priming_poll_ms.max(1)),
            priming_seek: Duration::from_millis(settings.priming_seek_ms),
            surface_fallback: Duration::from_millis(settings.surface_fallback_ms),
            near_end_threshold: Duration::from_millis(settings.near_end_threshold_ms),
            sign_in_autoplay_delay: Duration::from_millis(settings.sign_in_autoplay_delay_ms),
            auto_advance: settings.auto_advance,
            default_volume: settings.default_volume,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size < 2 {
            // current + next must both fit
            return Err(Error::Config(format!(
                "max_pool_size must be at least 2 (got {})",
                self.max_pool_size
            )));
        }
        if self.max_concurrent_inits == 0 {
            return Err(Error::Config("max_concurrent_inits must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.preload_window > self.keep_range {
            // Preloaded handles would be evicted as soon as they register
            return Err(Error::Config(format!(
                "preload_window ({}) must not exceed keep_range ({})",
                self.preload_window, self.keep_range
            )));
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(Error::Config(format!(
                "default_volume must be within 0.0..=1.0 (got {})",
                self.default_volume
            )));
        }
        Ok(())
    }

    /// Initialization timeout for a URL format
    pub fn init_timeout(&self, format: StreamFormat) -> Duration {
        match format {
            StreamFormat::Progressive => self.init_timeout_progressive,
            StreamFormat::Segmented => self.init_timeout_segmented,
        }
    }

    /// Retry policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            oom_backoff_base: self.oom_backoff_base,
            oom_backoff_step: self.oom_backoff_step,
            fixed_delay: self.fixed_retry_delay,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let settings = PoolSettings::default();
        // Built-in defaults satisfy every validation rule
        Self {
            preload_window: settings.preload_window,
            max_concurrent_inits: settings.max_concurrent_inits,
            keep_range: settings.keep_range,
            max_pool_size: settings.max_pool_size,
            defer_delay: Duration::from_millis(settings.defer_delay_ms),
            init_timeout_progressive: Duration::from_millis(settings.init_timeout_progressive_ms),
            init_timeout_segmented: Duration::from_millis(settings.init_timeout_segmented_ms),
            max_attempts: settings.max_attempts,
            oom_backoff_base: Duration::from_millis(settings.oom_backoff_base_ms),
            oom_backoff_step: Duration::from_millis(settings.oom_backoff_step_ms),
            fixed_retry_delay: Duration::from_millis(settings.fixed_retry_delay_ms),
            debounce: Duration::from_millis(settings.debounce_ms),
            priming_poll: Duration::from_millis(settings.priming_poll_ms),
            priming_seek: Duration::from_millis(settings.priming_seek_ms),
            surface_fallback: Duration::from_millis(settings.surface_fallback_ms),
            near_end_threshold: Duration::from_millis(settings.near_end_threshold_ms),
            sign_in_autoplay_delay: Duration::from_millis(settings.sign_in_autoplay_delay_ms),
            auto_advance: settings.auto_advance,
            default_volume: settings.default_volume,
        }
    }
}
