//! Environment-backed configuration.
//!
//! One closed [`Settings`] schema, populated by [`Settings::from_env`].
//! `.env` files are honored (loaded by the binary before parsing). A vendor
//! adapter is registered only when its API key is present; Redis being
//! unreachable at startup disables the KV-backed stages but not the
//! gateway.

use crate::error::{GatewayError, Result};
use crate::shield::PiiAction;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Read timeout for outbound provider calls.
    pub request_timeout: Duration,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    /// Anthropic API version header value.
    pub anthropic_version: String,

    pub pii_action: PiiAction,
    pub injection_block_threshold: f64,
    pub injection_warn_threshold: f64,

    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout: Duration,

    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_socket_timeout: Duration,

    pub semantic_cache_threshold: f32,
    pub embedding_base_url: Option<String>,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub embedding_api_key: Option<String>,

    pub judge_enabled: bool,
    pub judge_model: String,

    /// model -> ordered provider names; `"*"` is the wildcard chain.
    pub fallback_chains: HashMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(60),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_api_key: None,
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            anthropic_version: "2023-06-01".to_string(),
            pii_action: PiiAction::Redact,
            injection_block_threshold: 0.9,
            injection_warn_threshold: 0.3,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(40),
            circuit_failure_threshold: 3,
            circuit_recovery_timeout: Duration::from_secs(30),
            rate_limit_max_requests: 60,
            rate_limit_window_seconds: 60,
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_socket_timeout: Duration::from_secs(5),
            semantic_cache_threshold: 0.95,
            embedding_base_url: None,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            embedding_api_key: None,
            judge_enabled: false,
            judge_model: "gpt-4o-mini".to_string(),
            fallback_chains: HashMap::new(),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            GatewayError::InvalidConfig(format!("cannot parse {}={:?}", name, raw))
        }),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs_f64(env_parse(
        name,
        default.as_secs_f64(),
    )?))
}

impl Settings {
    /// Build settings from the process environment, falling back to the
    /// documented defaults. Call `dotenvy::dotenv()` first if `.env`
    /// support is wanted.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let pii_action = match env_opt("PII_ACTION") {
            None => defaults.pii_action,
            Some(raw) => raw
                .parse::<PiiAction>()
                .map_err(GatewayError::InvalidConfig)?,
        };

        let fallback_chains = match env_opt("FALLBACK_CHAINS") {
            None => HashMap::new(),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                GatewayError::InvalidConfig(format!("cannot parse FALLBACK_CHAINS: {}", e))
            })?,
        };

        Ok(Self {
            host: env_opt("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port)?,
            request_timeout: env_secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_base_url: env_opt("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            anthropic_base_url: env_opt("ANTHROPIC_BASE_URL")
                .unwrap_or(defaults.anthropic_base_url),
            anthropic_version: env_opt("ANTHROPIC_VERSION").unwrap_or(defaults.anthropic_version),
            pii_action,
            injection_block_threshold: env_parse(
                "INJECTION_BLOCK_THRESHOLD",
                defaults.injection_block_threshold,
            )?,
            injection_warn_threshold: env_parse(
                "INJECTION_WARN_THRESHOLD",
                defaults.injection_warn_threshold,
            )?,
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_base_delay: env_secs("RETRY_BASE_DELAY_SECS", defaults.retry_base_delay)?,
            retry_max_delay: env_secs("RETRY_MAX_DELAY_SECS", defaults.retry_max_delay)?,
            circuit_failure_threshold: env_parse(
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_failure_threshold,
            )?,
            circuit_recovery_timeout: env_secs(
                "CIRCUIT_RECOVERY_TIMEOUT_SECS",
                defaults.circuit_recovery_timeout,
            )?,
            rate_limit_max_requests: env_parse(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            rate_limit_window_seconds: env_parse(
                "RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window_seconds,
            )?,
            redis_host: env_opt("REDIS_HOST").unwrap_or(defaults.redis_host),
            redis_port: env_parse("REDIS_PORT", defaults.redis_port)?,
            redis_socket_timeout: env_secs(
                "REDIS_SOCKET_TIMEOUT_SECS",
                defaults.redis_socket_timeout,
            )?,
            semantic_cache_threshold: env_parse(
                "SEMANTIC_CACHE_THRESHOLD",
                defaults.semantic_cache_threshold,
            )?,
            embedding_base_url: env_opt("EMBEDDING_BASE_URL"),
            embedding_model: env_opt("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            embedding_api_key: env_opt("EMBEDDING_API_KEY"),
            judge_enabled: env_parse("JUDGE_ENABLED", defaults.judge_enabled)?,
            judge_model: env_opt("JUDGE_MODEL").unwrap_or(defaults.judge_model),
            fallback_chains,
        })
    }
}
