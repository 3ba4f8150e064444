//! Engine configuration
//!
//! Layers, lowest priority first: built-in defaults, one YAML/JSON/TOML file,
//! then `LEADFLOW__*` environment variables (`LEADFLOW__LOG__LEVEL=debug`).
//! Command line flags are applied on top by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use action_flow::InterpreterSettings;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use leadflow_scheduler::{RetryOpt, SchedulerConfig, StopPolicy};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "LEADFLOW";
const LOCAL_CONFIG: &str = "config/leadflow.yaml";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Daily rolling log file, written in addition to stderr
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub stop_policy: StopPolicy,
    pub one_flow_per_platform: bool,
    pub default_wait_timeout_ms: u64,
    pub default_type_delay_ms: u64,
    pub flows_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let interpreter = InterpreterSettings::default();
        Self {
            concurrency: 2,
            max_attempts: 2,
            retry_backoff_ms: 0,
            stop_policy: StopPolicy::Drain,
            one_flow_per_platform: true,
            default_wait_timeout_ms: interpreter.default_wait_timeout_ms,
            default_type_delay_ms: interpreter.default_type_delay_ms,
            flows_dir: PathBuf::from("flows"),
            artifacts_dir: PathBuf::from("artifacts"),
            log: LogConfig::default(),
        }
    }
}

pub struct LoadedConfig {
    pub config: EngineConfig,
    /// File that contributed to the configuration, if any
    pub path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load with the default file lookup: an explicit path (must exist), else
    /// `./config/leadflow.yaml`, else `<config_dir>/leadflow/config.yaml`.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
        let (path, required) = match explicit {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (default_config_path(), false),
        };
        let config = Self::from_sources(path.as_deref(), required)?;
        let path = path.filter(|p| p.exists());
        Ok(LoadedConfig { config, path })
    }

    pub fn from_sources(file: Option<&Path>, required: bool) -> Result<Self> {
        let defaults =
            Config::try_from(&EngineConfig::default()).context("Failed to encode defaults")?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(file) = file {
            if required && !file.exists() {
                bail!("Config file not found: {}", file.display());
            }
            builder = builder.add_source(File::from(file).required(required));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;
        let config: EngineConfig = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn interpreter(&self) -> InterpreterSettings {
        InterpreterSettings {
            default_wait_timeout_ms: self.default_wait_timeout_ms,
            default_type_delay_ms: self.default_type_delay_ms,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: self.concurrency,
            retry: RetryOpt {
                max_attempts: self.max_attempts,
                backoff: Duration::from_millis(self.retry_backoff_ms),
            },
            stop_policy: self.stop_policy,
            one_flow_per_platform: self.one_flow_per_platform,
            artifacts_dir: Some(self.artifacts_dir.clone()),
            interpreter: self.interpreter(),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join("leadflow").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn defaults_without_sources() {
        let config = EngineConfig::from_sources(None, false).unwrap();
        assert_eq!(config, EngineConfig::default());
        let scheduler = config.scheduler();
        assert_eq!(scheduler.concurrency, 2);
        assert_eq!(scheduler.retry.max_attempts, 2);
        assert_eq!(scheduler.interpreter.default_wait_timeout_ms, 10_000);
    }

    #[test]
    #[serial]
    fn file_overrides_defaults() {
        let file = yaml_file(
            "concurrency: 4\nstop_policy: interrupt\nretry_backoff_ms: 250\nlog:\n  format: json\n",
        );
        let config = EngineConfig::from_sources(Some(file.path()), true).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.stop_policy, StopPolicy::Interrupt);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");
        assert_eq!(
            config.scheduler().retry.delay_after(2),
            Duration::from_millis(500)
        );
    }

    #[test]
    #[serial]
    fn environment_beats_file() {
        let file = yaml_file("concurrency: 4\n");
        std::env::set_var("LEADFLOW__CONCURRENCY", "7");
        std::env::set_var("LEADFLOW__LOG__LEVEL", "debug");
        let config = EngineConfig::from_sources(Some(file.path()), true);
        std::env::remove_var("LEADFLOW__CONCURRENCY");
        std::env::remove_var("LEADFLOW__LOG__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.concurrency, 7);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    #[serial]
    fn rejects_zero_concurrency() {
        let file = yaml_file("concurrency: 0\n");
        let err = EngineConfig::from_sources(Some(file.path()), true).unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    #[serial]
    fn explicit_missing_file_is_an_error() {
        assert!(EngineConfig::load(Some(Path::new("/nonexistent/leadflow.yaml"))).is_err());
    }
}
