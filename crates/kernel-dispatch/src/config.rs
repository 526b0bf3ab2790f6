//! Process-wide dispatch settings.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::env;

/// Settings consulted by [`crate::Dispatcher`] on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Emit one-time deprecation notices (e.g. for `gels`).
    pub deprecation_warnings: bool,
    /// Log the wall time of every kernel invocation at debug level.
    pub trace_kernels: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            deprecation_warnings: true,
            trace_kernels: false,
        }
    }
}

impl DispatchConfig {
    /// Builds a config from `KERNEL_DISPATCH_DEPRECATION_WARNINGS` and
    /// `KERNEL_DISPATCH_TRACE_KERNELS`, falling back to defaults for unset variables.
    pub fn from_env() -> Self {
        let defaults = DispatchConfig::default();
        DispatchConfig {
            deprecation_warnings: env::bool_var(
                env::DEPRECATION_WARNINGS_VAR,
                defaults.deprecation_warnings,
            ),
            trace_kernels: env::bool_var(env::TRACE_KERNELS_VAR, defaults.trace_kernels),
        }
    }

    /// Parses a JSON object; missing fields take their default values.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn with_deprecation_warnings(mut self, enabled: bool) -> Self {
        self.deprecation_warnings = enabled;
        self
    }

    pub fn with_trace_kernels(mut self, enabled: bool) -> Self {
        self.trace_kernels = enabled;
        self
    }
}

static GLOBAL_CONFIG: OnceLock<DispatchConfig> = OnceLock::new();

/// Configuration read from the environment on first use and cached for the process.
pub fn global_config() -> &'static DispatchConfig {
    GLOBAL_CONFIG.get_or_init(DispatchConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = DispatchConfig::from_json(r#"{ "trace_kernels": true }"#).unwrap();
        assert!(config.trace_kernels);
        assert!(config.deprecation_warnings);

        let config = DispatchConfig::from_json("{}").unwrap();
        assert_eq!(config, DispatchConfig::default());
    }

    #[test]
    fn json_rejects_wrong_types() {
        assert!(DispatchConfig::from_json(r#"{ "trace_kernels": "sometimes" }"#).is_err());
    }

    #[test]
    fn builders_override_fields() {
        let config = DispatchConfig::default()
            .with_deprecation_warnings(false)
            .with_trace_kernels(true);
        assert!(!config.deprecation_warnings);
        assert!(config.trace_kernels);
    }
}
