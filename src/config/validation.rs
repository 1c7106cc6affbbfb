//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges for every dependency's effective settings
//! - Check addresses and the engine URL parse
//! - Reject overrides for dependencies the gateway does not have
//!
//! Returns all validation errors, not just the first.

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, ResilienceConfig};
use crate::engine::DEPENDENCIES;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    match Url::parse(&config.engine.endpoint) {
        // The engine transport speaks plain HTTP only.
        Ok(url) if url.scheme() == "http" && url.host().is_some() => {}
        Ok(url) => errors.push(ValidationError::new(
            "engine.endpoint",
            format!("unsupported URL '{url}' (expected http://host:port)"),
        )),
        Err(e) => errors.push(ValidationError::new(
            "engine.endpoint",
            format!("'{}' is not a valid URL: {e}", config.engine.endpoint),
        )),
    }
    if config.engine.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("engine.connect_timeout_ms", "must be greater than 0"));
    }

    validate_resilience("resilience", &config.resilience, &mut errors);

    for name in config.dependencies.keys() {
        if !DEPENDENCIES.contains(&name.as_str()) {
            errors.push(ValidationError::new(
                format!("dependencies.{name}"),
                format!("unknown dependency (expected one of {})", DEPENDENCIES.join(", ")),
            ));
            continue;
        }
        validate_resilience(
            &format!("dependencies.{name}"),
            &config.resilience_for(name),
            &mut errors,
        );
    }

    if config.websocket.max_in_flight == 0 {
        errors.push(ValidationError::new("websocket.max_in_flight", "must be at least 1"));
    }
    if config.websocket.outbound_buffer == 0 {
        errors.push(ValidationError::new("websocket.outbound_buffer", "must be at least 1"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_resilience(prefix: &str, r: &ResilienceConfig, errors: &mut Vec<ValidationError>) {
    if r.max_failures < 1 {
        errors.push(ValidationError::new(format!("{prefix}.max_failures"), "must be at least 1"));
    }
    if r.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.reset_timeout_ms"),
            "must be greater than 0",
        ));
    }
    if r.multiplier.is_nan() || r.multiplier < 1.0 {
        errors.push(ValidationError::new(format!("{prefix}.multiplier"), "must be at least 1.0"));
    }
    if !(0.0..1.0).contains(&r.jitter_fraction) {
        errors.push(ValidationError::new(
            format!("{prefix}.jitter_fraction"),
            "must be in [0, 1)",
        ));
    }
    if r.initial_delay_ms > r.max_delay_ms {
        errors.push(ValidationError::new(
            format!("{prefix}.initial_delay_ms"),
            format!("{} exceeds max_delay_ms {}", r.initial_delay_ms, r.max_delay_ms),
        ));
    }
    if r.deadline_ms == 0 {
        errors.push(ValidationError::new(format!("{prefix}.deadline_ms"), "must be greater than 0"));
    }
}
