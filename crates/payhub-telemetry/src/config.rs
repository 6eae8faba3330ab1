//! Environment-sourced application configuration (spec.md section 6,
//! expanded in SPEC_FULL.md section 13). Deserialized with `envy`, which
//! maps `SCREAMING_SNAKE_CASE` environment variables onto this struct's
//! `snake_case` fields. `dotenvy::dotenv()` is called once before `envy`
//! runs (see [`AppConfig::from_env`]) so a local `.env` can supply
//! development defaults without touching the real environment.

use serde::Deserialize;

fn default_env() -> String {
    "development".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_ssl_mode() -> String {
    "prefer".to_string()
}
fn default_webhook_max_attempts() -> u32 {
    5
}
fn default_webhook_retry_schedule_ms() -> String {
    "60000,300000,900000,3600000".to_string()
}
fn default_idempotency_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_breaker_call_timeout_ms() -> u64 {
    10_000
}
fn default_breaker_error_threshold_percent() -> u8 {
    50
}
fn default_breaker_volume_threshold() -> u32 {
    5
}
fn default_breaker_reset_timeout_ms() -> u64 {
    30_000
}
fn default_false() -> bool {
    false
}

/// Loaded once at startup in `payhub-node` (spec.md section 6's
/// "Configuration (environment)" list). Field names match their
/// `PAYHUB_`-prefixed environment variables one-to-one, e.g.
/// `database_url` <- `PAYHUB_DATABASE_URL`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_ssl_mode")]
    pub db_ssl_mode: String,

    pub redis_url: String,
    pub amqp_url: String,

    /// Required once `env == "production"`; enforced by
    /// [`AppConfig::validate_for_production`] rather than at parse time, so
    /// development can run with an empty secret.
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_webhook_max_attempts")]
    pub webhook_max_attempts: u32,
    /// Comma-separated milliseconds, e.g. `"60000,300000,900000,3600000"`.
    #[serde(default = "default_webhook_retry_schedule_ms")]
    pub webhook_retry_schedule_ms: String,
    /// Development-only escape hatch for the SSRF URL check (spec.md 4.9).
    /// Rejected by [`AppConfig::validate_for_production`] if left on in
    /// production.
    #[serde(default = "default_false")]
    pub allow_http_webhooks: bool,

    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    #[serde(default = "default_breaker_call_timeout_ms")]
    pub breaker_call_timeout_ms: u64,
    #[serde(default = "default_breaker_error_threshold_percent")]
    pub breaker_error_threshold_percent: u8,
    #[serde(default = "default_breaker_volume_threshold")]
    pub breaker_volume_threshold: u32,
    #[serde(default = "default_breaker_reset_timeout_ms")]
    pub breaker_reset_timeout_ms: u64,

    /// Accepted for parity with spec.md section 6's configuration list;
    /// distributed-trace export and third-party error reporting are out
    /// of scope (SPEC_FULL.md section 11), so these are never read.
    pub tracing_endpoint: Option<String>,
    pub error_reporter_dsn: Option<String>,
}

impl AppConfig {
    /// Loads `.env` (development convenience, silently skipped if absent)
    /// then deserializes the environment with the `PAYHUB_` prefix.
    pub fn from_env() -> Result<Self, envy::Error> {
        let _ = dotenvy::dotenv();
        envy::prefixed("PAYHUB_").from_env()
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }

    /// Parses [`Self::webhook_retry_schedule_ms`] into a millisecond
    /// sequence, falling back to the spec's default schedule if the
    /// configured value fails to parse (defensive against a malformed
    /// override reaching this far; `from_env` does not validate it).
    pub fn webhook_retry_schedule(&self) -> Vec<u64> {
        let parsed: Vec<u64> = self
            .webhook_retry_schedule_ms
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if parsed.is_empty() {
            vec![60_000, 300_000, 900_000, 3_600_000]
        } else {
            parsed
        }
    }

    /// Fail-fast startup check (SPEC_FULL.md section 13), mirroring the
    /// teacher's `NodeConfig::validate_for_production`'s panic-on-missing-
    /// secret posture: called once from `payhub-node::main` before any
    /// listener binds, never from inside a request handler.
    pub fn validate_for_production(&self) {
        if !self.is_production() {
            return;
        }
        if self.webhook_secret.trim().is_empty() {
            panic!("PAYHUB_WEBHOOK_SECRET must be set when PAYHUB_ENV=production");
        }
        if self.allow_http_webhooks {
            panic!("PAYHUB_ALLOW_HTTP_WEBHOOKS must not be enabled when PAYHUB_ENV=production");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            env: "development".to_string(),
            host: default_host(),
            port: default_port(),
            database_url: "postgres://localhost/payhub".to_string(),
            db_max_connections: default_db_max_connections(),
            db_ssl_mode: default_db_ssl_mode(),
            redis_url: "redis://localhost".to_string(),
            amqp_url: "amqp://localhost".to_string(),
            webhook_secret: String::new(),
            webhook_max_attempts: default_webhook_max_attempts(),
            webhook_retry_schedule_ms: default_webhook_retry_schedule_ms(),
            allow_http_webhooks: true,
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            breaker_call_timeout_ms: default_breaker_call_timeout_ms(),
            breaker_error_threshold_percent: default_breaker_error_threshold_percent(),
            breaker_volume_threshold: default_breaker_volume_threshold(),
            breaker_reset_timeout_ms: default_breaker_reset_timeout_ms(),
            tracing_endpoint: None,
            error_reporter_dsn: None,
        }
    }

    #[test]
    fn development_allows_missing_secret_and_http_webhooks() {
        let config = base_config();
        config.validate_for_production(); // must not panic
    }

    #[test]
    #[should_panic(expected = "WEBHOOK_SECRET")]
    fn production_requires_webhook_secret() {
        let mut config = base_config();
        config.env = "production".to_string();
        config.allow_http_webhooks = false;
        config.validate_for_production();
    }

    #[test]
    #[should_panic(expected = "ALLOW_HTTP_WEBHOOKS")]
    fn production_rejects_allow_http_webhooks() {
        let mut config = base_config();
        config.env = "production".to_string();
        config.webhook_secret = "whsec_live".to_string();
        config.validate_for_production();
    }

    #[test]
    fn retry_schedule_parses_comma_separated_list() {
        let config = base_config();
        assert_eq!(config.webhook_retry_schedule(), vec![60_000, 300_000, 900_000, 3_600_000]);
    }

    #[test]
    fn retry_schedule_falls_back_when_unparseable() {
        let mut config = base_config();
        config.webhook_retry_schedule_ms = "garbage".to_string();
        assert_eq!(config.webhook_retry_schedule(), vec![60_000, 300_000, 900_000, 3_600_000]);
    }
}
