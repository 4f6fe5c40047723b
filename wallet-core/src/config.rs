//! Wallet configuration

use std::time::Duration;

use crate::nuts::nut19;
use crate::wallet::{HttpOptions, RateLimitConfig, RetryPolicy};

fn default_unit() -> String {
    crate::nuts::CURRENCY_UNIT_SAT.to_owned()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_operation_timeout() -> f64 {
    30.0
}

/// Recognized options; unknown keys are rejected on parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletConfig {
    pub mint_url: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// seconds, doubles per attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// seconds, applied to quote and swap calls; melt runs unbounded
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: f64,
    /// local override of the mint-announced cache settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_cache: Option<nut19::Settings>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl WalletConfig {
    pub fn new(mint_url: impl Into<String>) -> Self {
        Self {
            mint_url: mint_url.into(),
            unit: default_unit(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            operation_timeout: default_operation_timeout(),
            response_cache: None,
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            delay: Duration::from_secs_f64(self.retry_delay.max(0.0)),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.operation_timeout.max(0.1))
    }

    pub fn http_options(&self) -> HttpOptions {
        let ms = self.operation_timeout().as_millis() as u64;
        HttpOptions::new()
            .timeout_connect_ms(ms.min(10_000))
            .timeout_get_ms(ms)
            .timeout_swap_ms(ms)
            // melt blocks until the Lightning payment resolves
            .timeout_melt_ms(0)
            .rate_limit(self.rate_limit)
    }
}
