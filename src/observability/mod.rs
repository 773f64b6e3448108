use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::StreamError;
use crate::result::{StreamPhase, StreamResult};

/// Initialize the tracing subscriber with the configured log level and format.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `format` is `text` or `json`. Calling this twice leaves the first
/// subscriber in place.
pub fn init_tracing(log_level: &str, format: &str) {
    let Some(filter) = level_filter(log_level) else {
        return;
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let installed = if format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn level_filter(log_level: &str) -> Option<EnvFilter> {
    let level = log_level.to_uppercase();
    if level == "DISABLED" {
        return None;
    }
    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };
    Some(EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO")))
}

/// Log a settled stream at INFO level.
pub fn log_stream_outcome(
    request_id: &str,
    phase: StreamPhase,
    result: &StreamResult,
    duration: Duration,
) {
    let usage = result.usage.unwrap_or_default();
    info!(
        request_id = request_id,
        phase = phase.as_str(),
        finish_reason = result.finish_reason.as_str(),
        text_len = result.text.len(),
        tool_calls = result.tool_calls.len(),
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        duration_seconds = duration.as_secs_f64(),
        "stream settled"
    );
}

/// Log a failed stream at WARN level.
pub fn log_stream_failure(request_id: &str, err: &StreamError, duration: Duration) {
    warn!(
        request_id = request_id,
        retryable = err.is_retryable(),
        duration_seconds = duration.as_secs_f64(),
        "stream failed: {err}"
    );
}
