//! # PayHub Telemetry
//!
//! Process-wide ambient concerns that every binary in the workspace needs
//! exactly once at startup: the `tracing` subscriber (this module) and
//! environment-sourced [`config::AppConfig`].

pub mod config;

pub use config::AppConfig;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global `tracing` subscriber. Log level comes from
/// `RUST_LOG`, defaulting to `info`. Output is JSON in production (or
/// whenever `PAYHUB_LOG_FORMAT=json` is set) and human-readable otherwise,
/// so a developer's terminal stays readable while production logs stay
/// machine-parseable.
///
/// Must be called once, before any `tracing` event is emitted; calling it
/// twice panics (the underlying `tracing` global dispatcher can only be set
/// once per process).
pub fn init_tracing(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_format = config.is_production()
        || std::env::var("PAYHUB_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_format {
        registry.with(fmt::layer().json().with_current_span(true).with_span_list(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_env(env: &str) -> AppConfig {
        AppConfig {
            env: env.to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/payhub".to_string(),
            db_max_connections: 10,
            db_ssl_mode: "prefer".to_string(),
            redis_url: "redis://localhost".to_string(),
            amqp_url: "amqp://localhost".to_string(),
            webhook_secret: "whsec_test".to_string(),
            webhook_max_attempts: 5,
            webhook_retry_schedule_ms: "60000,300000,900000,3600000".to_string(),
            allow_http_webhooks: false,
            idempotency_ttl_secs: 86_400,
            breaker_call_timeout_ms: 10_000,
            breaker_error_threshold_percent: 50,
            breaker_volume_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            tracing_endpoint: None,
            error_reporter_dsn: None,
        }
    }

    #[test]
    fn production_config_is_production() {
        assert!(config_with_env("production").is_production());
        assert!(!config_with_env("development").is_production());
    }
}
