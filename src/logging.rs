//! Structured logging for DeepCard.
//!
//! Every layer logs through the macros below so field names stay the same
//! across handlers, services, storage and provider calls: `endpoint`,
//! `service`, `component`, `user_id`, `card_id`, `provider`.

use anyhow::Result;
use std::fs;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

// HTTP handlers

/// Request received by a handler
#[macro_export]
macro_rules! log_api_start {
    ($endpoint:expr, card_id = $card_id:expr, user_id = $user_id:expr) => {
        tracing::debug!(endpoint = $endpoint, card_id = %$card_id, user_id = %$user_id, "Request received");
    };
    ($endpoint:expr, user_id = $user_id:expr) => {
        tracing::debug!(endpoint = $endpoint, user_id = %$user_id, "Request received");
    };
    ($endpoint:expr, provider = $provider:expr) => {
        tracing::debug!(endpoint = $endpoint, provider = %$provider, "Request received");
    };
}

/// Handler finished successfully
#[macro_export]
macro_rules! log_api_success {
    ($endpoint:expr, card_id = $card_id:expr, $msg:expr) => {
        tracing::info!(endpoint = $endpoint, card_id = %$card_id, "Request handled: {}", $msg);
    };
    ($endpoint:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(endpoint = $endpoint, result_count = $count, "Request handled: {}", $msg);
    };
    ($endpoint:expr, $msg:expr) => {
        tracing::info!(endpoint = $endpoint, "Request handled: {}", $msg);
    };
}

#[macro_export]
macro_rules! log_api_warn {
    ($endpoint:expr, card_id = $card_id:expr, $msg:expr) => {
        tracing::warn!(endpoint = $endpoint, card_id = %$card_id, "Request warning: {}", $msg);
    };
}

// Services

#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, user_id = $user_id:expr) => {
        tracing::debug!(service = $service, operation = $operation, user_id = %$user_id, "Service call started");
    };
}

#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, card_id = $card_id:expr) => {
        tracing::info!(service = $service, operation = $operation, card_id = %$card_id, "Service call finished");
    };
    ($service:expr, $operation:expr, card_count = $count:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            card_count = $count,
            duration_ms = $duration,
            "Service call finished"
        );
    };
}

/// Recoverable problem inside a service call, e.g. one card of a batch
#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(service = $service, operation = $operation, "Service warning: {}", $msg);
    };
}

// Storage

/// Query timing for the SQLite repository
#[macro_export]
macro_rules! log_db_operation {
    (debug, $query:expr, card_id = $card_id:expr, duration_ms = $duration:expr) => {
        tracing::debug!(component = "database", query = $query, card_id = %$card_id, duration_ms = $duration, "Query done");
    };
    (debug, $query:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(component = "database", query = $query, row_count = $count, duration_ms = $duration, "Query done");
    };
    (info, $query:expr, $msg:expr) => {
        tracing::info!(component = "database", query = $query, "{}", $msg);
    };
}

// Providers

#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, provider = $provider:expr, model = $model:expr) => {
        tracing::info!(component = "llm", operation = $operation, provider = %$provider, model = %$model, "Generation started");
    };
    (success, $operation:expr, provider = $provider:expr, duration_ms = $duration:expr, card_count = $count:expr) => {
        tracing::info!(
            component = "llm",
            operation = $operation,
            provider = %$provider,
            duration_ms = $duration,
            card_count = $count,
            "Generation finished"
        );
    };
    (retry, $operation:expr, attempt = $attempt:expr, delay_ms = $delay:expr, error = $error:expr) => {
        tracing::warn!(
            component = "llm",
            operation = $operation,
            attempt = $attempt,
            delay_ms = $delay,
            error = %$error,
            "Provider call failed, backing off"
        );
    };
    (error, $operation:expr, error = $error:expr, retry_count = $retries:expr) => {
        tracing::error!(component = "llm", operation = $operation, error = %$error, retry_count = $retries, "Provider call gave up");
    };
}

// Process lifecycle and validation

#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(event_type = "startup", component = $component, "{}", $msg);
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "{}", $msg);
    };
}

#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(event_type = "validation", component = $component, result = "success", "{}", $msg);
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(event_type = "validation", component = $component, result = "failure", error = %$error, "Validation failed");
    };
}

/// Install the global subscriber: console and/or daily-rotated file output.
/// The returned guard must be held for the lifetime of the process so the
/// file writer flushes.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info,deepcard=debug"));

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    let (file_layer, guard) = if config.file_enabled {
        if let Err(e) = fs::create_dir_all(&config.log_directory) {
            eprintln!("Warning: Could not create logs directory: {}", e);
        }
        let file_appender = tracing_appender::rolling::daily(&config.log_directory, "deepcard.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(non_blocking_file);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        log_directory = %config.log_directory,
        file_enabled = config.file_enabled,
        console_enabled = config.console_enabled,
        "Logging initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    #[test]
    fn test_logging_macros_compile() {
        let card_id = Uuid::new_v4();
        let error = anyhow::anyhow!("test error");

        log_api_start!("test_operation", card_id = card_id, user_id = "user-1");
        log_api_start!("test_operation", user_id = "user-1");
        log_api_start!("test_operation", provider = "openai");

        log_api_success!("test_operation", card_id = card_id, "operation completed");
        log_api_success!("test_operation", count = 5, "cards processed");
        log_api_success!("test_operation", "done");

        log_api_warn!("test_operation", card_id = card_id, "operation warning");

        log_service_start!("card_service", "create_card", user_id = "user-1");
        log_service_success!("card_service", "create_card", card_id = card_id);
        log_service_success!("card_generator", "generate", card_count = 3, duration_ms = 1500);
        log_service_warn!("card_generator", "auto_save", "card skipped");

        log_db_operation!(debug, "select_card", card_id = card_id, duration_ms = 10);
        log_db_operation!(debug, "list_cards", count = 3, duration_ms = 10);
        log_db_operation!(info, "migration", "database initialized");

        log_llm_operation!(start, "generate_cards", provider = "openai", model = "gpt-3.5-turbo");
        log_llm_operation!(
            success,
            "generate_cards",
            provider = "openai",
            duration_ms = 1500,
            card_count = 4
        );
        log_llm_operation!(retry, "generate_text", attempt = 1, delay_ms = 1000, error = error);
        log_llm_operation!(error, "generate_text", error = error, retry_count = 3);

        log_system_event!(startup, component = "server", "server starting");
        log_system_event!(config, "configuration loaded successfully");

        log_validation!(success, "api_request", "request validated");
        log_validation!(failure, "api_request", error = error);
    }
}
