//! Execution Configuration
//!
//! The two options the opcode executor recognises. Resolution from a loose
//! option table rejects unknown keys and wrongly typed values, and fills in
//! the documented defaults.

use crate::error::ExecutionError;
use opbench_remote::PhpConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Option name for ini overrides
pub const OPTION_PHP_CONFIG: &str = "php_config";
/// Option name for the process-safe parameter encoding
pub const OPTION_SAFE_PARAMETERS: &str = "safe_parameters";

/// Resolved executor options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Ini settings applied on top of the executor baseline, e.g. `{"max_execution_time": 100}`
    #[serde(default)]
    pub php_config: PhpConfig,
    /// Embed parameters as PHP `serialize()` strings instead of literals.
    /// Transitional: only changes how parameters are encoded, never their values.
    #[serde(default)]
    pub safe_parameters: bool,
}

impl ExecutionConfig {
    /// Resolve from an option table such as a `[executor]` TOML section
    /// converted to JSON.
    pub fn resolve(options: Value) -> Result<Self, ExecutionError> {
        let options = match options {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(ExecutionError::InvalidConfig(format!(
                    "expected an option table, got {}",
                    other
                )));
            }
        };

        if let Some(value) = options.get(OPTION_PHP_CONFIG) {
            if !value.is_object() {
                return Err(ExecutionError::InvalidConfig(format!(
                    "option `{}` must be a table of ini settings, got {}",
                    OPTION_PHP_CONFIG, value
                )));
            }
        }
        if let Some(value) = options.get(OPTION_SAFE_PARAMETERS) {
            if !value.is_boolean() {
                return Err(ExecutionError::InvalidConfig(format!(
                    "option `{}` must be a boolean, got {}",
                    OPTION_SAFE_PARAMETERS, value
                )));
            }
        }

        serde_json::from_value(Value::Object(options))
            .map_err(|e| ExecutionError::InvalidConfig(e.to_string()))
    }

    /// Short description of each option
    pub fn option_infos() -> [(&'static str, &'static str); 2] {
        [
            (
                OPTION_PHP_CONFIG,
                "Key value table of ini settings, e.g. {\"max_execution_time\": 100}",
            ),
            (
                OPTION_SAFE_PARAMETERS,
                "Pass parameters to the child as PHP serialize() strings (transitional)",
            ),
        ]
    }
}
