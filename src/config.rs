//! Validated option types: `PoolOptions` for connecting a [`crate::Store`] and
//! `AdvanceOptions` for a single `advance` call. Both follow the validating-newtype
//! idiom used throughout this crate — invalid combinations are rejected at `build()`
//! time with `Error::Validation`, not discovered on first use.

use std::time::Duration;

use crate::error::Error;
use crate::model::ModelConfig;
use crate::tools::ToolProvider;
use crate::Result;
use std::sync::Arc;

/// Connection pool sizing for [`crate::Store::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub(crate) min_size: u32,
    pub(crate) max_size: u32,
    pub(crate) max_inactive_connection_lifetime: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            max_inactive_connection_lifetime: Duration::from_secs(600),
        }
    }
}

impl PoolOptions {
    pub fn builder() -> PoolOptionsBuilder {
        PoolOptionsBuilder::default()
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn max_inactive_connection_lifetime(&self) -> Duration {
        self.max_inactive_connection_lifetime
    }
}

#[derive(Debug, Clone)]
pub struct PoolOptionsBuilder {
    min_size: u32,
    max_size: u32,
    max_inactive_connection_lifetime: Duration,
}

impl Default for PoolOptionsBuilder {
    fn default() -> Self {
        let defaults = PoolOptions::default();
        Self {
            min_size: defaults.min_size,
            max_size: defaults.max_size,
            max_inactive_connection_lifetime: defaults.max_inactive_connection_lifetime,
        }
    }
}

impl PoolOptionsBuilder {
    pub fn min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn max_inactive_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_inactive_connection_lifetime = lifetime;
        self
    }

    pub fn build(self) -> Result<PoolOptions> {
        if self.max_size == 0 {
            return Err(Error::validation("max_size", "must be at least 1"));
        }
        if self.min_size > self.max_size {
            return Err(Error::validation(
                "min_size",
                format!("{} exceeds max_size {}", self.min_size, self.max_size),
            ));
        }
        Ok(PoolOptions {
            min_size: self.min_size,
            max_size: self.max_size,
            max_inactive_connection_lifetime: self.max_inactive_connection_lifetime,
        })
    }
}

/// Per-call options for [`crate::Store::advance`].
#[derive(Clone)]
pub struct AdvanceOptions {
    pub(crate) max_retries: u32,
    pub(crate) timeout: Duration,
    pub(crate) max_tool_rounds: u32,
    pub(crate) model_config_overrides: ModelConfig,
    pub(crate) tool_provider: Option<Arc<dyn ToolProvider>>,
}

impl Default for AdvanceOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(120),
            max_tool_rounds: 10,
            model_config_overrides: ModelConfig::default(),
            tool_provider: None,
        }
    }
}

impl std::fmt::Debug for AdvanceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvanceOptions")
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("model_config_overrides", &self.model_config_overrides)
            .field("tool_provider", &self.tool_provider.as_ref().map(|_| "<dyn ToolProvider>"))
            .finish()
    }
}

impl AdvanceOptions {
    pub fn builder() -> AdvanceOptionsBuilder {
        AdvanceOptionsBuilder::default()
    }
}

#[derive(Default)]
pub struct AdvanceOptionsBuilder {
    max_retries: Option<u32>,
    timeout: Option<Duration>,
    max_tool_rounds: Option<u32>,
    model_config_overrides: Option<ModelConfig>,
    tool_provider: Option<Arc<dyn ToolProvider>>,
}

impl AdvanceOptionsBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_tool_rounds(mut self, max_tool_rounds: u32) -> Self {
        self.max_tool_rounds = Some(max_tool_rounds);
        self
    }

    pub fn model_config_overrides(mut self, overrides: ModelConfig) -> Self {
        self.model_config_overrides = Some(overrides);
        self
    }

    /// Override the tool provider for this call only, instead of whatever the
    /// [`crate::Store`] was constructed with.
    pub fn tool_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.tool_provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<AdvanceOptions> {
        if self.max_tool_rounds == Some(0) {
            return Err(Error::validation(
                "max_tool_rounds",
                "must be at least 1 or the agent can never answer a tool call",
            ));
        }
        let defaults = AdvanceOptions::default();
        Ok(AdvanceOptions {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            max_tool_rounds: self.max_tool_rounds.unwrap_or(defaults.max_tool_rounds),
            model_config_overrides: self.model_config_overrides.unwrap_or(defaults.model_config_overrides),
            tool_provider: self.tool_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::builder().build().unwrap();
        assert_eq!(opts.min_size(), 1);
        assert_eq!(opts.max_size(), 10);
    }

    #[test]
    fn test_pool_options_rejects_min_over_max() {
        let err = PoolOptions::builder()
            .min_size(20)
            .max_size(5)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_pool_options_rejects_zero_max_size() {
        let err = PoolOptions::builder().max_size(0).build().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_advance_options_defaults() {
        let opts = AdvanceOptions::builder().build().unwrap();
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.max_tool_rounds, 10);
        assert_eq!(opts.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_advance_options_rejects_zero_tool_rounds() {
        let err = AdvanceOptions::builder().max_tool_rounds(0).build().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
