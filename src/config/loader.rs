//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ShieldConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ShieldConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ShieldConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `RATE_LIMIT_*` environment overrides.
///
/// Non-numeric or non-positive values are ignored.
pub fn apply_env_overrides<F>(config: &mut ShieldConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("RATE_LIMIT_ENABLED") {
        if !raw.is_empty() {
            config.rate_limit.enabled = raw != "false";
        }
    }

    if let Some(max) = lookup("RATE_LIMIT_DEFAULT_MAX_REQUESTS").and_then(|v| v.trim().parse::<u32>().ok()) {
        if max > 0 {
            config.rate_limit.default_max = max;
        }
    }

    if let Some(window) = lookup("RATE_LIMIT_DEFAULT_WINDOW_SECONDS").and_then(|v| v.trim().parse::<u64>().ok()) {
        if window > 0 {
            config.rate_limit.default_window_secs = window;
        }
    }
}
