//! Engine configuration

use crate::{ConfigError, HopwiseError, HopwiseResult, WritePolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime knobs for the orchestrators and the bundled tool registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently executing steps within one wave
    pub max_concurrent_steps: usize,

    /// Allow replacing a ready `input` Asset (off: inputs are write-once)
    pub allow_input_overwrite: bool,

    /// Timeout applied by the tool registry when a tool has no override
    pub default_tool_timeout: Duration,

    /// Persist the Mission on every ToolStep transition, not only at Hop boundaries
    pub save_after_each_step: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 4,
            allow_input_overwrite: false,
            default_tool_timeout: Duration::from_secs(120),
            save_after_each_step: true,
        }
    }
}

impl EngineConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `HOPWISE_MAX_CONCURRENT_STEPS`: Steps run at once within a wave (default: 4)
    /// - `HOPWISE_ALLOW_INPUT_OVERWRITE`: Let input Assets be rewritten (default: false)
    /// - `HOPWISE_DEFAULT_TOOL_TIMEOUT_MS`: Per-invocation timeout (default: 120000)
    /// - `HOPWISE_SAVE_AFTER_EACH_STEP`: Persist on every step transition (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_steps: std::env::var("HOPWISE_MAX_CONCURRENT_STEPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_steps),
            allow_input_overwrite: std::env::var("HOPWISE_ALLOW_INPUT_OVERWRITE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.allow_input_overwrite),
            default_tool_timeout: std::env::var("HOPWISE_DEFAULT_TOOL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_tool_timeout),
            save_after_each_step: std::env::var("HOPWISE_SAVE_AFTER_EACH_STEP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.save_after_each_step),
        }
    }

    pub fn with_max_concurrent_steps(mut self, max: usize) -> Self {
        self.max_concurrent_steps = max;
        self
    }

    pub fn with_default_tool_timeout(mut self, timeout: Duration) -> Self {
        self.default_tool_timeout = timeout;
        self
    }

    pub fn with_input_overwrite(mut self, allow: bool) -> Self {
        self.allow_input_overwrite = allow;
        self
    }

    pub fn with_save_after_each_step(mut self, save: bool) -> Self {
        self.save_after_each_step = save;
        self
    }

    /// Write policy applied to every Asset Store the engine touches.
    pub fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            allow_input_overwrite: self.allow_input_overwrite,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HopwiseResult<()> {
        if self.max_concurrent_steps == 0 {
            return Err(HopwiseError::Config(ConfigError::InvalidValue {
                field: "max_concurrent_steps".to_string(),
                value: self.max_concurrent_steps.to_string(),
                reason: "max_concurrent_steps must be greater than 0".to_string(),
            }));
        }

        if self.default_tool_timeout.is_zero() {
            return Err(HopwiseError::Config(ConfigError::InvalidValue {
                field: "default_tool_timeout".to_string(),
                value: format!("{:?}", self.default_tool_timeout),
                reason: "default_tool_timeout must be positive".to_string(),
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.write_policy().allow_input_overwrite);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = EngineConfig::default().with_max_concurrent_steps(0);
        match config.validate() {
            Err(HopwiseError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "max_concurrent_steps");
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig::default().with_default_tool_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_concurrent_steps(1)
            .with_input_overwrite(true)
            .with_default_tool_timeout(Duration::from_millis(50))
            .with_save_after_each_step(false);
        assert_eq!(config.max_concurrent_steps, 1);
        assert!(!config.save_after_each_step);
        assert!(config.write_policy().allow_input_overwrite);
        assert_eq!(config.default_tool_timeout, Duration::from_millis(50));
    }
}
