//! Error classification and backoff
//!
//! Maps transport errors and server error envelopes onto `FailureKind`, and
//! groups kinds into retry categories with their backoff bases.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::config::InvocationDefaults;
use crate::error::FailureKind;
use crate::protocol::{codes, ErrorBody};

/// Retry-relevant grouping of failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimited,
    ServerError,
    ClientError,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::ClientError)
    }

    /// Base delay before the first retry
    pub fn backoff_base(self) -> Option<Duration> {
        match self {
            ErrorCategory::Network | ErrorCategory::Timeout => Some(Duration::from_millis(200)),
            ErrorCategory::RateLimited => Some(Duration::from_secs(1)),
            ErrorCategory::ServerError => Some(Duration::from_millis(500)),
            ErrorCategory::ClientError => None,
        }
    }

    /// Whether a terminal failure in this category says the server is unhealthy.
    /// Rate limiting and client errors mean it answered.
    pub fn counts_against_health(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::ServerError
        )
    }
}

/// Category of a failure. `None` for kinds that only ever end an invocation.
pub fn categorize(kind: &FailureKind) -> Option<ErrorCategory> {
    match kind {
        FailureKind::Network { .. } => Some(ErrorCategory::Network),
        FailureKind::Timeout { .. } | FailureKind::HandlerTimeout { .. } => {
            Some(ErrorCategory::Timeout)
        }
        FailureKind::RateLimited { .. } => Some(ErrorCategory::RateLimited),
        FailureKind::ServerError { .. } => Some(ErrorCategory::ServerError),
        FailureKind::Validation { .. }
        | FailureKind::NotFound { .. }
        | FailureKind::HandlerFailure { .. } => Some(ErrorCategory::ClientError),
        FailureKind::Unreachable { .. }
        | FailureKind::ServiceUnavailable { .. }
        | FailureKind::Cancelled => None,
    }
}

pub fn is_retryable(kind: &FailureKind) -> bool {
    categorize(kind).is_some_and(ErrorCategory::is_retryable)
}

/// Classify an error raised before any response arrived
pub fn classify_transport(err: &reqwest::Error, timeout: Duration) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout { timeout }
    } else if err.is_builder() {
        FailureKind::Validation {
            message: err.to_string(),
        }
    } else {
        FailureKind::Network {
            message: err.to_string(),
        }
    }
}

/// Classify a non-success response from the error envelope it carried
pub fn classify_response(
    status: StatusCode,
    body: Option<ErrorBody>,
    retry_after: Option<Duration>,
) -> FailureKind {
    let code = body.as_ref().map(|b| b.code.as_str()).unwrap_or_default();
    let message = body
        .as_ref()
        .map(|b| b.message.clone())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    match status.as_u16() {
        429 => FailureKind::RateLimited { retry_after },
        408 => FailureKind::HandlerTimeout { message },
        404 => FailureKind::NotFound { message },
        400..=499 if code == codes::NOT_FOUND => FailureKind::NotFound { message },
        400..=499 => FailureKind::Validation { message },
        500 if code == codes::HANDLER_FAILURE => FailureKind::HandlerFailure { message },
        status => FailureKind::ServerError { status, message },
    }
}

/// `Retry-After` in whole seconds. HTTP dates are not honored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Replaces every category's base when set
    pub base_override: Option<Duration>,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn from_defaults(defaults: &InvocationDefaults) -> Self {
        Self {
            base_override: defaults.backoff_base,
            max_delay: defaults.max_backoff,
            jitter: defaults.jitter,
        }
    }

    /// Delay after the given (1-based) failed attempt, or `None` when the
    /// failure must not be retried.
    ///
    /// `base * 2^(attempt-1)`, spread over [0.5x, 1.5x] with jitter on. A
    /// server-provided retry-after is used as is. Both are capped at
    /// `max_delay`.
    pub fn delay(&self, kind: &FailureKind, attempt: u32) -> Option<Duration> {
        let category = categorize(kind).filter(|c| c.is_retryable())?;

        if let FailureKind::RateLimited {
            retry_after: Some(retry_after),
        } = kind
        {
            return Some((*retry_after).min(self.max_delay));
        }

        let base = self.base_override.or(category.backoff_base())?;
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = base.saturating_mul(1 << exponent);
        let delay = if self.jitter {
            delay.mul_f64(rand::rng().random_range(0.5..=1.5))
        } else {
            delay
        };

        Some(delay.min(self.max_delay))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_defaults(&InvocationDefaults::default())
    }
}
