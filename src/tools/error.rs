//! Tool error taxonomy with retry classification.
//!
//! Only `Unavailable` and `Timeout` are transient. Everything else is
//! surfaced to the calling agent on the first occurrence.

use std::time::Duration;

use thiserror::Error;

/// Normalized error from a tool invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// Collaborator could not be reached or is overloaded.
    #[error("tool unavailable: {0}")]
    Unavailable(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A single attempt exceeded the per-attempt timeout.
    #[error("tool timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Collaborator answered with a non-retryable error.
    #[error("upstream error {code}: {message}")]
    Upstream { code: u16, message: String },

    /// The owning run abandoned the invocation.
    #[error("tool invocation cancelled")]
    Cancelled,
}

impl ToolError {
    /// Check if the adapter should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Unavailable(_) | ToolError::Timeout(_))
    }

    /// Short machine-readable label, used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Unavailable(_) => "unavailable",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Timeout(_) => "timeout",
            ToolError::Upstream { .. } => "upstream",
            ToolError::Cancelled => "cancelled",
        }
    }
}

/// Map an HTTP error status from a collaborator onto the taxonomy.
pub fn classify_http_status(status: u16, message: String) -> ToolError {
    match status {
        429 | 502 | 503 | 504 => ToolError::Unavailable(format!("HTTP {}: {}", status, message)),
        _ => ToolError::Upstream {
            code: status,
            message,
        },
    }
}

/// Map a transport-level `reqwest` failure onto the taxonomy.
///
/// `client_timeout` is the deadline the client was built with.
pub fn classify_reqwest_error(err: reqwest::Error, client_timeout: Duration) -> ToolError {
    if err.is_timeout() {
        ToolError::Timeout(client_timeout)
    } else if let Some(status) = err.status() {
        classify_http_status(status.as_u16(), err.to_string())
    } else if err.is_decode() {
        ToolError::Upstream {
            code: 502,
            message: format!("undecodable response: {}", err),
        }
    } else {
        ToolError::Unavailable(err.to_string())
    }
}

/// Exponential backoff policy for transient tool errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Delay before the first retry
    pub backoff_base: Duration,
    /// Upper bound for a single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 3,
            backoff_base: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.backoff_base
            .saturating_mul(multiplier)
            .min(self.max_backoff)
    }

    /// Check if a failed attempt (0-based) should be followed by another one.
    pub fn should_retry(&self, error: &ToolError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.retry_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ToolError::Unavailable("down".into()).is_retryable());
        assert!(ToolError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!ToolError::InvalidArguments("query".into()).is_retryable());
        assert!(!ToolError::Upstream {
            code: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!ToolError::Cancelled.is_retryable());
    }

    #[test]
    fn test_http_status_classification() {
        assert!(matches!(
            classify_http_status(429, "slow down".into()),
            ToolError::Unavailable(_)
        ));
        assert!(matches!(
            classify_http_status(503, String::new()),
            ToolError::Unavailable(_)
        ));
        assert_eq!(
            classify_http_status(401, "no key".into()),
            ToolError::Upstream {
                code: 401,
                message: "no key".into()
            }
        );
        assert!(matches!(
            classify_http_status(500, String::new()),
            ToolError::Upstream { code: 500, .. }
        ));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            retry_count: 3,
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        };

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_should_retry_respects_count() {
        let policy = RetryPolicy {
            retry_count: 2,
            ..Default::default()
        };
        let err = ToolError::Unavailable("down".into());
        assert!(policy.should_retry(&err, 0));
        assert!(policy.should_retry(&err, 1));
        assert!(!policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&ToolError::InvalidArguments("x".into()), 0));
    }
}
