//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::PluginBusConfig;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validates the entire configuration.
pub fn validate_config(config: &PluginBusConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_fast_push(&config.fast_push)?;
    validate_ingress(&config.ingress)?;
    Ok(())
}

fn validate_logging(logging: &super::schema::LoggingConfig) -> ConfigResult<()> {
    if !VALID_LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
        return Err(ConfigError::validation(
            "logging.level",
            format!("must be one of {:?}, got {:?}", VALID_LOG_LEVELS, logging.level),
        ));
    }
    Ok(())
}

fn validate_fast_push(fast_push: &super::schema::FastPushConfig) -> ConfigResult<()> {
    if fast_push.batch_size == 0 {
        return Err(ConfigError::validation("fast_push.batch_size", "must be greater than 0"));
    }
    if fast_push.flush_interval_ms == 0 {
        return Err(ConfigError::validation(
            "fast_push.flush_interval_ms",
            "must be greater than 0",
        ));
    }
    if fast_push.sync_timeout_seconds <= 0.0 {
        return Err(ConfigError::validation(
            "fast_push.sync_timeout_seconds",
            "must be greater than 0",
        ));
    }
    if fast_push.endpoint.is_empty() {
        return Err(ConfigError::validation("fast_push.endpoint", "must not be empty"));
    }
    Ok(())
}

fn validate_ingress(ingress: &super::schema::IngressConfig) -> ConfigResult<()> {
    if ingress.capacity == 0 {
        return Err(ConfigError::validation("ingress.capacity", "must be greater than 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&PluginBusConfig::default()).is_ok());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = PluginBusConfig::default();
        config.logging.level = "verbose".to_string();
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::Validation { field, .. }) if field == "logging.level"));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = PluginBusConfig::default();
        config.fast_push.batch_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_zero_ingress_capacity() {
        let mut config = PluginBusConfig::default();
        config.ingress.capacity = 0;
        assert!(validate_config(&config).is_err());
    }
}
