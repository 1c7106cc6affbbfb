//! Configuration loading.
//!
//! Order: TOML file (optional) → environment overrides → validation.
//!
//! Environment keys are `GATEWAY_<FIELD>` for the resilience defaults and
//! `GATEWAY_<DEPENDENCY>_<FIELD>` for one dependency, e.g.
//! `GATEWAY_MARKET_DATA_MAX_RETRIES=1`.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::{DependencyOverrides, GatewayConfig, LogFormat};
use crate::config::validation::{validate_config, ValidationError};
use crate::engine::DEPENDENCIES;
use crate::resilience::RpcCode;

const PREFIX: &str = "GATEWAY_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Env {
        key: String,
        value: String,
        reason: String,
    },

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the process environment, and validate.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn parse_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup: &lookup };

    if let Some(v) = env.string("BIND_ADDRESS") {
        config.listener.bind_address = v;
    }
    if let Some(v) = env.string("ENGINE_ENDPOINT") {
        config.engine.endpoint = v;
    }
    if let Some(v) = env.string("LOG_LEVEL") {
        config.observability.log_level = v;
    }
    if let Some(v) = env.parsed::<LogFormat>("LOG_FORMAT")? {
        config.observability.log_format = v;
    }
    if let Some(v) = env.string("METRICS_ADDRESS") {
        config.observability.metrics_address = v;
    }
    if let Some(v) = env.string("ADMIN_API_KEY") {
        config.admin.api_key = v;
        config.admin.enabled = true;
    }

    let defaults = read_overrides(&env, "")?;
    config.resilience = config.resilience.merged(&defaults);

    for dependency in DEPENDENCIES {
        let scope = format!("{}_", dependency.to_ascii_uppercase());
        let overrides = read_overrides(&env, &scope)?;
        if overrides == DependencyOverrides::default() {
            continue;
        }
        let entry = config
            .dependencies
            .entry(dependency.to_string())
            .or_default();
        *entry = merge_overrides(entry, &overrides);
    }

    Ok(())
}

fn read_overrides(env: &Env<'_>, scope: &str) -> Result<DependencyOverrides, ConfigError> {
    let key = |field: &str| format!("{scope}{field}");
    Ok(DependencyOverrides {
        max_failures: env.parsed(&key("MAX_FAILURES"))?,
        open_timeout_ms: env.parsed(&key("OPEN_TIMEOUT_MS"))?,
        reset_timeout_ms: env.parsed(&key("RESET_TIMEOUT_MS"))?,
        max_retries: env.parsed(&key("MAX_RETRIES"))?,
        initial_delay_ms: env.parsed(&key("INITIAL_DELAY_MS"))?,
        max_delay_ms: env.parsed(&key("MAX_DELAY_MS"))?,
        multiplier: env.parsed(&key("MULTIPLIER"))?,
        jitter_fraction: env.parsed(&key("JITTER_FRACTION"))?,
        retryable_codes: env.codes(&key("RETRYABLE_CODES"))?,
        deadline_ms: env.parsed(&key("DEADLINE_MS"))?,
    })
}

/// Environment values win over file values field by field.
fn merge_overrides(file: &DependencyOverrides, env: &DependencyOverrides) -> DependencyOverrides {
    DependencyOverrides {
        max_failures: env.max_failures.or(file.max_failures),
        open_timeout_ms: env.open_timeout_ms.or(file.open_timeout_ms),
        reset_timeout_ms: env.reset_timeout_ms.or(file.reset_timeout_ms),
        max_retries: env.max_retries.or(file.max_retries),
        initial_delay_ms: env.initial_delay_ms.or(file.initial_delay_ms),
        max_delay_ms: env.max_delay_ms.or(file.max_delay_ms),
        multiplier: env.multiplier.or(file.multiplier),
        jitter_fraction: env.jitter_fraction.or(file.jitter_fraction),
        retryable_codes: env
            .retryable_codes
            .clone()
            .or_else(|| file.retryable_codes.clone()),
        deadline_ms: env.deadline_ms.or(file.deadline_ms),
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn raw(&self, field: &str) -> Option<(String, String)> {
        let key = format!("{PREFIX}{field}");
        (self.lookup)(&key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| (key, v))
    }

    fn string(&self, field: &str) -> Option<String> {
        self.raw(field).map(|(_, v)| v)
    }

    fn parsed<T>(&self, field: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some((key, value)) = self.raw(field) else {
            return Ok(None);
        };
        let parsed = value.parse::<T>();
        match parsed {
            Ok(v) => Ok(Some(v)),
            Err(e) => Err(ConfigError::Env {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn codes(&self, field: &str) -> Result<Option<Vec<RpcCode>>, ConfigError> {
        let Some((key, value)) = self.raw(field) else {
            return Ok(None);
        };
        let parsed: Result<Vec<RpcCode>, _> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(RpcCode::from_str)
            .collect();
        match parsed {
            Ok(codes) => Ok(Some(codes)),
            Err(e) => Err(ConfigError::Env {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }
}
