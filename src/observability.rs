//! Logging configuration and initialization for preprocessing runs.
//!
//! Logs go to stderr so the run summary printed on stdout stays machine-readable.

use std::env;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("BADGE_ACTIVITY_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Some(format) = env::var("BADGE_ACTIVITY_LOG_FORMAT")
        .ok()
        .and_then(|raw| parse_log_format(&raw))
    {
        config.format = format;
    }

    if let Some(include_target) = env::var("BADGE_ACTIVITY_LOG_TARGET")
        .ok()
        .and_then(|raw| parse_bool(&raw))
    {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "preprocess",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_pipeline_config(config: &PipelineConfig) {
    info!(
        component = "preprocess",
        event = "config.selected",
        data_dir = %config.data_dir.display(),
        output_path = %config.output_path.display(),
        period_ms = config.window.period_ms,
        max_periods = config.window.max_periods,
        badge_names = ?config.badge_names,
        threads = config.threads
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
