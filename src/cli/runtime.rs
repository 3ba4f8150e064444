use std::path::Path;

use anyhow::{Context, Result};
use leadflow::{EngineConfig, LoadedConfig, LogConfig, LogFormat};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber. `RUST_LOG` wins over `level`. The returned
/// guard flushes the log file and must live until exit.
pub fn init_logging(log: &LogConfig, level: &str) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;

    let console = match log.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match &log.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

pub fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    EngineConfig::load(config_path)
}

/// `--debug` beats `--log-level`, which beats the configured level.
pub fn effective_level<'a>(config: &'a EngineConfig, flag: Option<&'a str>, debug: bool) -> &'a str {
    if debug {
        "debug"
    } else {
        flag.unwrap_or(&config.log.level)
    }
}
