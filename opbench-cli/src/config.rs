//! Configuration loading from opbench.toml
//!
//! opbench configuration can be specified in an `opbench.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.

use opbench_core::{ExecutionConfig, OPTION_PHP_CONFIG, OPTION_SAFE_PARAMETERS};
use opbench_remote::{Launcher, PhpConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up during discovery
pub const CONFIG_FILE_NAME: &str = "opbench.toml";

/// opbench configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OpbenchConfig {
    /// How the PHP child process is launched
    #[serde(default)]
    pub launcher: LauncherConfig,
    /// Executor options, resolved with [`ExecutionConfig::resolve`]
    #[serde(default)]
    pub executor: serde_json::Value,
}

/// Launcher configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
    /// PHP binary, looked up on `PATH` when not absolute
    #[serde(default = "default_php_binary")]
    pub php_binary: String,
    /// Command prefix such as `"nice -n 5"`
    #[serde(default)]
    pub php_wrapper: Option<String>,
    /// Ignore php.ini files (`-n`)
    #[serde(default)]
    pub php_disable_ini: bool,
    /// File required before the benchmark file, e.g. a Composer autoloader
    #[serde(default)]
    pub bootstrap: Option<PathBuf>,
    /// Wall-clock limit per subject (e.g. "60s"); "0" or absent for none
    #[serde(default)]
    pub timeout: Option<String>,
    /// Ini settings applied to every launch, below the executor's own
    #[serde(default)]
    pub php_config: PhpConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            php_binary: default_php_binary(),
            php_wrapper: None,
            php_disable_ini: false,
            bootstrap: None,
            timeout: None,
            php_config: PhpConfig::new(),
        }
    }
}

fn default_php_binary() -> String {
    "php".to_string()
}

impl LauncherConfig {
    /// Build the launcher these settings describe
    pub fn to_launcher(&self) -> Launcher {
        Launcher::new(self.php_binary.clone())
            .with_wrapper(self.php_wrapper.clone())
            .with_disable_ini(self.php_disable_ini)
            .with_php_config(self.php_config.clone())
            .with_bootstrap(self.bootstrap.clone())
    }

    /// Parsed timeout; `None` when unset or zero
    pub fn timeout(&self) -> anyhow::Result<Option<Duration>> {
        match self.timeout.as_deref() {
            Some(timeout) => Ok(Some(OpbenchConfig::parse_duration(timeout)?).filter(|t| !t.is_zero())),
            None => Ok(None),
        }
    }
}

impl OpbenchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid configuration in {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Discover and load configuration by walking up from the current directory
    pub fn discover() -> anyhow::Result<Option<Self>> {
        let dir = std::env::current_dir()?;
        Self::discover_from(&dir)
    }

    /// Discover and load configuration by walking up from `start`
    pub fn discover_from(start: &Path) -> anyhow::Result<Option<Self>> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                tracing::debug!(path = %config_path.display(), "loading configuration");
                return Self::load(&config_path).map(Some);
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    /// Resolve the `[executor]` section
    pub fn execution_config(&self) -> anyhow::Result<ExecutionConfig> {
        Ok(ExecutionConfig::resolve(self.executor.clone())?)
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        let describe = |name: &str| {
            ExecutionConfig::option_infos()
                .into_iter()
                .find(|(option, _)| *option == name)
                .map(|(_, info)| info)
                .unwrap_or_default()
        };
        format!(
            r#"# opbench Configuration

[launcher]
# PHP binary used to run benchmark scripts
php_binary = "php"
# Command prefix (uncomment to enable)
# php_wrapper = "nice -n 5"
# Ignore php.ini files
php_disable_ini = false
# File required before the benchmark file (uncomment to enable)
# bootstrap = "vendor/autoload.php"
# Wall-clock limit per subject, "0" for none
timeout = "0"

[launcher.php_config]
# memory_limit = "1G"

[executor]
# {safe_parameters_info}
{safe_parameters} = false

[executor.{php_config}]
# {php_config_info}
# max_execution_time = 100
"#,
            safe_parameters = OPTION_SAFE_PARAMETERS,
            safe_parameters_info = describe(OPTION_SAFE_PARAMETERS),
            php_config = OPTION_PHP_CONFIG,
            php_config_info = describe(OPTION_PHP_CONFIG),
        )
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m"); a bare number is seconds
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic() || *c == 'µ')
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_nanos((value * multiplier as f64) as u64))
    }
}
