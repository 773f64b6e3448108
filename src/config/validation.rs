use super::{ConfigError, StreamConfig};

const VALID_LEVELS: [&str; 6] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
const VALID_FORMATS: [&str; 2] = ["text", "json"];

/// Validate the full config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &StreamConfig) -> Result<(), ConfigError> {
    validate_logging(config)?;
    validate_sse(config)?;
    validate_ndjson(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_logging(config: &StreamConfig) -> Result<(), ConfigError> {
    let logging = &config.logging;
    if !VALID_LEVELS.contains(&logging.level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "logging.level must be one of {VALID_LEVELS:?}"
        )));
    }
    if !VALID_FORMATS.contains(&logging.format.to_lowercase().as_str()) {
        return Err(validation_err(format!(
            "logging.format must be one of {VALID_FORMATS:?}"
        )));
    }
    Ok(())
}

fn validate_sse(config: &StreamConfig) -> Result<(), ConfigError> {
    let sse = &config.sse;
    if sse.line_delimiter.is_empty() {
        return Err(validation_err("sse.line_delimiter cannot be empty"));
    }
    if sse.event_delimiter.is_empty() {
        return Err(validation_err("sse.event_delimiter cannot be empty"));
    }
    if sse.line_delimiter == sse.event_delimiter {
        return Err(validation_err(
            "sse.line_delimiter and sse.event_delimiter must differ",
        ));
    }
    if sse.max_pending_bytes == Some(0) {
        return Err(validation_err(
            "sse.max_pending_bytes must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_ndjson(config: &StreamConfig) -> Result<(), ConfigError> {
    if config.ndjson.max_pending_bytes == Some(0) {
        return Err(validation_err(
            "ndjson.max_pending_bytes must be greater than 0 when set",
        ));
    }
    Ok(())
}
