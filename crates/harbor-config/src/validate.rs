//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::HostConfig;

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.to_owned(),
    }
}

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &HostConfig) -> ConfigResult<()> {
    let r = &config.runtime;
    if r.pool_capacity == 0 {
        return Err(invalid("runtime.pool_capacity", "must be at least 1"));
    }
    for (field, value) in [
        ("runtime.acquire_timeout_ms", r.acquire_timeout_ms),
        ("runtime.call_timeout_ms", r.call_timeout_ms),
        ("runtime.promise_poll_ms", r.promise_poll_ms),
        ("runtime.scheduler_submit_timeout_ms", r.scheduler_submit_timeout_ms),
        ("runtime.fetch_timeout_ms", r.fetch_timeout_ms),
    ] {
        if value == 0 {
            return Err(invalid(field, "timeouts must be greater than zero"));
        }
    }

    let p = &config.plugins;
    if p.render_interval_ms < 1 {
        return Err(invalid("plugins.render_interval_ms", "must be at least 1"));
    }
    if p.listener_buffer == 0 {
        return Err(invalid("plugins.listener_buffer", "must be at least 1"));
    }
    if p.event_batch_size == 0 {
        return Err(invalid("plugins.event_batch_size", "must be at least 1"));
    }
    if p.max_exceptions == 0 {
        return Err(invalid("plugins.max_exceptions", "must be at least 1"));
    }

    if config.bank.signal_capacity == 0 {
        return Err(invalid("bank.signal_capacity", "must be at least 1"));
    }

    if !matches!(
        config.logging.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            "expected one of: trace, debug, info, warn, error",
        ));
    }
    if !matches!(
        config.logging.format.as_str(),
        "pretty" | "compact" | "json" | "full"
    ) {
        return Err(invalid(
            "logging.format",
            "expected one of: pretty, compact, json, full",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        validate(&HostConfig::default()).unwrap();
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = HostConfig::default();
        config.runtime.promise_poll_ms = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("runtime.promise_poll_ms"));
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = HostConfig::default();
        config.logging.format = "xml".into();
        assert!(validate(&config).is_err());
    }
}
