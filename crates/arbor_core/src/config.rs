//! Client configuration.

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per logical call, first attempt included
    pub max_attempts: u32,
    /// Backoff before the first retry in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff in milliseconds
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive backoffs
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Create a retry config with the given attempt bound
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Set backoff bounds
    #[must_use]
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Backoff to wait after the given failed attempt (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Transaction defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Lease timeout requested when the caller sets none, in milliseconds
    pub default_timeout_ms: u64,
    /// Interval between lease renewals in milliseconds
    pub ping_period_ms: u64,
    /// Budget for the best-effort abort issued on scope cancellation
    pub abort_timeout_ms: u64,
    /// Whether new transactions renew their lease unless told otherwise
    pub ping_enabled: bool,
}

impl TransactionConfig {
    /// Set default lease timeout
    #[must_use]
    pub fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set ping period
    #[must_use]
    pub fn with_ping_period(mut self, period_ms: u64) -> Self {
        self.ping_period_ms = period_ms;
        self
    }

    /// Set abort budget
    #[must_use]
    pub fn with_abort_timeout(mut self, timeout_ms: u64) -> Self {
        self.abort_timeout_ms = timeout_ms;
        self
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 15_000,
            ping_period_ms: 5_000,
            abort_timeout_ms: 5_000,
            ping_enabled: true,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Retry policy
    pub retry: RetryConfig,
    /// Transaction defaults
    pub transaction: TransactionConfig,
}

impl ClientConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set transaction defaults
    #[must_use]
    pub fn with_transaction(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = transaction;
        self
    }

    /// Parse from JSON; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or inconsistent
    pub fn from_json_str(json: &str) -> ClientResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ClientError::Validation {
            field: "config".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns error on a zero attempt bound or a ping period not shorter
    /// than the lease timeout
    pub fn validate(&self) -> ClientResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(ClientError::Validation {
                field: "retry.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.transaction.ping_period_ms >= self.transaction.default_timeout_ms {
            return Err(ClientError::Validation {
                field: "transaction.ping_period_ms".to_string(),
                reason: "must be shorter than the default timeout".to_string(),
            });
        }
        Ok(())
    }
}
