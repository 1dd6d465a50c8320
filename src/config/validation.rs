//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits > 0)
//! - Compile extra firewall signatures up front
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::ShieldConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
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

/// Validate a parsed configuration.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    let session = &config.session;
    if session.cookie_name.is_empty()
        || !session.cookie_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        errors.push(ValidationError::new("session.cookie_name", "must be a non-empty token"));
    }
    if session.inactivity_secs == 0 {
        errors.push(ValidationError::new("session.inactivity_secs", "must be greater than zero"));
    }
    if session.max_lifetime_secs <= session.inactivity_secs {
        errors.push(ValidationError::new(
            "session.max_lifetime_secs",
            "must be greater than session.inactivity_secs",
        ));
    }

    if config.auth.enabled && config.auth.password_hash.is_empty() {
        errors.push(ValidationError::new("auth.password_hash", "required when auth is enabled"));
    }

    let rate = &config.rate_limit;
    if rate.default_max == 0 {
        errors.push(ValidationError::new("rate_limit.default_max", "must be greater than zero"));
    }
    if rate.default_window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.default_window_secs", "must be greater than zero"));
    }
    let mut seen = HashSet::new();
    for route in &rate.routes {
        if route.max == 0 || route.window_secs == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.routes[{}]", route.path),
                "max and window_secs must be greater than zero",
            ));
        }
        if !seen.insert(route.path.as_str()) {
            errors.push(ValidationError::new(
                format!("rate_limit.routes[{}]", route.path),
                "duplicate route",
            ));
        }
    }

    let attempts = &config.login_attempts;
    if attempts.max_attempts == 0 {
        errors.push(ValidationError::new("login_attempts.max_attempts", "must be greater than zero"));
    }
    if attempts.window_secs == 0 || attempts.lockout_secs == 0 {
        errors.push(ValidationError::new(
            "login_attempts",
            "window_secs and lockout_secs must be greater than zero",
        ));
    }

    let firewall = &config.firewall;
    if firewall.max_body_bytes == 0 {
        errors.push(ValidationError::new("firewall.max_body_bytes", "must be greater than zero"));
    }
    for sig in &firewall.extra_signatures {
        if let Err(e) = regex::Regex::new(&sig.pattern) {
            errors.push(ValidationError::new(
                format!("firewall.extra_signatures[{}]", sig.description),
                e.to_string(),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
