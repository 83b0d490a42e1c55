//! Run configuration: defaults, environment overrides and validation.

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::window::{WindowConfig, DAY_MS, HOUR_MS, WEEK_MS};

pub const DEFAULT_BADGE_NAMES: [&str; 3] = ["Mortarboard", "Epic", "Legendary"];
pub const DEFAULT_OUTPUT_FILE: &str = "activity_preprocessed.csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub output_path: PathBuf,
    pub window: WindowConfig,
    pub badge_names: Vec<String>,
    /// Worker threads; 0 lets rayon decide.
    pub threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            output_path: data_dir.join(DEFAULT_OUTPUT_FILE),
            data_dir,
            window: WindowConfig::default(),
            badge_names: DEFAULT_BADGE_NAMES.iter().map(|s| s.to_string()).collect(),
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();

    if let Some(raw) = non_empty_var("BADGE_ACTIVITY_DATA_DIR") {
        config.data_dir = PathBuf::from(raw);
        config.output_path = config.data_dir.join(DEFAULT_OUTPUT_FILE);
    }

    if let Some(raw) = non_empty_var("BADGE_ACTIVITY_OUTPUT") {
        config.output_path = PathBuf::from(raw);
    }

    if let Some(raw) = non_empty_var("BADGE_ACTIVITY_PERIOD") {
        config.window.period_ms =
            parse_period_ms(&raw).map_err(|reason| ConfigError::InvalidEnv {
                var: "BADGE_ACTIVITY_PERIOD",
                value: raw.clone(),
                reason,
            })?;
    }

    if let Some(raw) = non_empty_var("BADGE_ACTIVITY_MAXTIME") {
        config.window.max_periods = raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnv {
            var: "BADGE_ACTIVITY_MAXTIME",
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    }

    if let Some(raw) = non_empty_var("BADGE_ACTIVITY_BADGES") {
        config.badge_names = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(raw) = non_empty_var("BADGE_ACTIVITY_THREADS") {
        config.threads = raw.parse::<usize>().map_err(|e| ConfigError::InvalidEnv {
            var: "BADGE_ACTIVITY_THREADS",
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    }

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.window.period_ms <= 0 {
        return Err(ConfigError::Invalid("period must be > 0".to_string()));
    }
    if config.window.max_periods == 0 {
        return Err(ConfigError::Invalid("maxtime must be > 0".to_string()));
    }
    if config.window.max_periods > i32::MAX as u32 / 2 {
        return Err(ConfigError::Invalid("maxtime is too large".to_string()));
    }
    if config.badge_names.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one badge name is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for name in &config.badge_names {
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(ConfigError::Invalid(format!(
                "badge name '{name}' is listed more than once"
            )));
        }
    }

    Ok(())
}

/// Parses `<count><unit>` with unit `w`, `d`, `h`, `m` or `s` (e.g. `1w`, `12h`).
/// A bare unit means a count of one.
pub fn parse_period_ms(raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| "missing unit (expected w, d, h, m or s)".to_string())?;
    let (count_raw, unit) = trimmed.split_at(split);

    let count = if count_raw.is_empty() {
        1
    } else {
        count_raw.parse::<i64>().map_err(|e| e.to_string())?
    };
    let unit_ms = match unit {
        "w" | "week" | "weeks" => WEEK_MS,
        "d" | "day" | "days" => DAY_MS,
        "h" | "hour" | "hours" => HOUR_MS,
        "m" | "min" | "minutes" => 60_000,
        "s" | "sec" | "seconds" => 1_000,
        other => return Err(format!("unknown unit '{other}'")),
    };

    match count.checked_mul(unit_ms) {
        Some(ms) if ms > 0 => Ok(ms),
        Some(_) => Err("period must be > 0".to_string()),
        None => Err("period overflows".to_string()),
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: [&str; 6] = [
        "BADGE_ACTIVITY_DATA_DIR",
        "BADGE_ACTIVITY_OUTPUT",
        "BADGE_ACTIVITY_PERIOD",
        "BADGE_ACTIVITY_MAXTIME",
        "BADGE_ACTIVITY_BADGES",
        "BADGE_ACTIVITY_THREADS",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(&str, Option<String>)> =
            VARS.iter().map(|key| (*key, env::var(key).ok())).collect();

        for key in VARS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(&[], pipeline_config_from_env).expect("defaults are valid");
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(
            cfg.output_path,
            PathBuf::from("./data/activity_preprocessed.csv")
        );
        assert_eq!(cfg.window.period_ms, WEEK_MS);
        assert_eq!(cfg.window.max_periods, 52);
    }

    #[test]
    fn env_overrides_every_field() {
        let cfg = with_env_vars(
            &[
                ("BADGE_ACTIVITY_DATA_DIR", "/tmp/so"),
                ("BADGE_ACTIVITY_PERIOD", "1d"),
                ("BADGE_ACTIVITY_MAXTIME", "2"),
                ("BADGE_ACTIVITY_BADGES", "Epic, Legendary,"),
                ("BADGE_ACTIVITY_THREADS", "3"),
            ],
            pipeline_config_from_env,
        )
        .expect("valid env");

        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/so"));
        assert_eq!(
            cfg.output_path,
            PathBuf::from("/tmp/so/activity_preprocessed.csv")
        );
        assert_eq!(cfg.window.period_ms, DAY_MS);
        assert_eq!(cfg.window.max_periods, 2);
        assert_eq!(cfg.badge_names, vec!["Epic", "Legendary"]);
        assert_eq!(cfg.threads, 3);
    }

    #[test]
    fn explicit_output_wins_over_data_dir() {
        let cfg = with_env_vars(
            &[
                ("BADGE_ACTIVITY_DATA_DIR", "/tmp/so"),
                ("BADGE_ACTIVITY_OUTPUT", "/tmp/out.csv"),
            ],
            pipeline_config_from_env,
        )
        .expect("valid env");
        assert_eq!(cfg.output_path, PathBuf::from("/tmp/out.csv"));
    }

    #[test]
    fn unparseable_values_are_rejected() {
        let err = with_env_vars(
            &[("BADGE_ACTIVITY_MAXTIME", "fifty")],
            pipeline_config_from_env,
        )
        .expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "BADGE_ACTIVITY_MAXTIME",
                ..
            }
        ));

        let err = with_env_vars(&[("BADGE_ACTIVITY_MAXTIME", "0")], pipeline_config_from_env)
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn period_units_parse() {
        assert_eq!(parse_period_ms("1w"), Ok(WEEK_MS));
        assert_eq!(parse_period_ms("W"), Ok(WEEK_MS));
        assert_eq!(parse_period_ms("7d"), Ok(WEEK_MS));
        assert_eq!(parse_period_ms("12h"), Ok(12 * HOUR_MS));
        assert_eq!(parse_period_ms("30m"), Ok(1_800_000));
        assert_eq!(parse_period_ms("45s"), Ok(45_000));
        assert!(parse_period_ms("0d").is_err());
        assert!(parse_period_ms("10").is_err());
        assert!(parse_period_ms("3 fortnights").is_err());
    }

    #[test]
    fn duplicate_badges_are_rejected() {
        let cfg = PipelineConfig {
            badge_names: vec!["Epic".to_string(), "epic".to_string()],
            ..PipelineConfig::default()
        };
        assert!(matches!(validate_config(&cfg), Err(ConfigError::Invalid(_))));
    }
}
