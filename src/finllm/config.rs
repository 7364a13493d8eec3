//! Configuration for the gateway.
//!
//! Provides the [`GatewayConfig`] struct covering the model chain and the
//! retry, cooldown, and concurrency knobs. Users construct it manually or
//! load it from `FINLLM_*` environment variables — no file parsing
//! dependencies are required. API keys are configured separately through
//! [`CredentialPool`](crate::CredentialPool).
//!
//! # Example
//!
//! ```rust
//! use finllm::GatewayConfig;
//! use std::time::Duration;
//!
//! // Use the defaults
//! let config = GatewayConfig::default();
//! assert_eq!(config.max_retries, 3);
//!
//! // Or override selectively
//! let config = GatewayConfig {
//!     primary_model: "gemini-2.5-flash".into(),
//!     backup_models: vec!["gemini-2.0-flash".into()],
//!     base_retry_delay: Duration::from_millis(500),
//!     ..GatewayConfig::default()
//! };
//! assert_eq!(config.model_chain().len(), 2);
//! ```

use std::str::FromStr;
use std::time::Duration;

use crate::finllm::clients::gemini::{Model, model_to_string};

/// Gateway tuning knobs.
///
/// The defaults mirror a conservative production setup: three retries per
/// model with exponential backoff starting at one second, a sixty second
/// cooldown for rate-limited keys, and at most twenty upstream calls in
/// flight at once.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Model used first for every request.
    pub primary_model: String,
    /// Fallback models tried in order once the primary is exhausted.
    pub backup_models: Vec<String>,
    /// Attempts per model before advancing to the next one.
    pub max_retries: u32,
    /// Base delay for exponential backoff between same-model attempts.
    pub base_retry_delay: Duration,
    /// How long a rate-limited credential sits out.
    pub rate_limit_cooldown: Duration,
    /// Upper bound on concurrent upstream calls.
    pub max_concurrent_requests: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            primary_model: model_to_string(Model::Gemini20Flash),
            backup_models: Vec::new(),
            max_retries: 3,
            base_retry_delay: Duration::from_secs(1),
            rate_limit_cooldown: Duration::from_secs(60),
            max_concurrent_requests: 20,
        }
    }
}

impl GatewayConfig {
    /// Load the config from `FINLLM_*` environment variables, falling back
    /// to the defaults for anything unset or unparsable.
    ///
    /// Recognised variables: `FINLLM_PRIMARY_MODEL`, `FINLLM_BACKUP_MODELS`
    /// (comma separated), `FINLLM_MAX_RETRIES`,
    /// `FINLLM_RETRY_BASE_DELAY_MS`, `FINLLM_RATE_LIMIT_COOLDOWN_SECS`, and
    /// `FINLLM_MAX_CONCURRENT_REQUESTS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backup_models = match std::env::var("FINLLM_BACKUP_MODELS") {
            Ok(raw) => raw
                .split(',')
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty())
                .collect(),
            Err(_) => defaults.backup_models,
        };
        Self {
            primary_model: std::env::var("FINLLM_PRIMARY_MODEL")
                .unwrap_or(defaults.primary_model),
            backup_models,
            max_retries: parse_env("FINLLM_MAX_RETRIES", defaults.max_retries),
            base_retry_delay: Duration::from_millis(parse_env(
                "FINLLM_RETRY_BASE_DELAY_MS",
                defaults.base_retry_delay.as_millis() as u64,
            )),
            rate_limit_cooldown: Duration::from_secs(parse_env(
                "FINLLM_RATE_LIMIT_COOLDOWN_SECS",
                defaults.rate_limit_cooldown.as_secs(),
            )),
            max_concurrent_requests: parse_env(
                "FINLLM_MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            ),
        }
    }

    /// The full fallback chain: primary model first, then the backups in
    /// declaration order.
    pub fn model_chain(&self) -> Vec<String> {
        let mut chain = Vec::with_capacity(1 + self.backup_models.len());
        chain.push(self.primary_model.clone());
        chain.extend(self.backup_models.iter().cloned());
        chain
    }
}

fn parse_env<T: FromStr>(name: &str, fallback: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}
