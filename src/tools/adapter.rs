//! Uniform call contract around a [`Tool`]: timeout, retry, cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::{RetryPolicy, ToolError};
use super::Tool;
use crate::config::Config;

/// Timeout and retry settings shared by every adapter of a run.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    /// Limit for a single attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl ToolPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.tool_timeout,
            retry: RetryPolicy {
                retry_count: config.retry_count,
                backoff_base: config.retry_backoff_base,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Record of one logical tool call, across all of its attempts.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub outcome: Result<Value, ToolError>,
    /// Attempts made, including the first one
    pub attempts: u32,
    /// Wall-clock time across all attempts and backoff sleeps
    pub latency: Duration,
}

impl ToolInvocation {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A tool bound to a call policy.
#[derive(Clone)]
pub struct ToolAdapter {
    tool: Arc<dyn Tool>,
    policy: ToolPolicy,
}

impl ToolAdapter {
    pub fn new(tool: Arc<dyn Tool>, policy: ToolPolicy) -> Self {
        Self { tool, policy }
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Invoke the tool, retrying transient failures with exponential backoff.
    ///
    /// Never panics and never returns early without a record: cancellation
    /// shows up as `ToolError::Cancelled` in the outcome.
    pub async fn invoke(&self, arguments: Value, cancel: &CancellationToken) -> ToolInvocation {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(ToolError::Cancelled);
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ToolError::Cancelled),
                res = tokio::time::timeout(self.policy.timeout, self.tool.execute(arguments.clone())) => {
                    match res {
                        Ok(inner) => inner,
                        Err(_) => Err(ToolError::Timeout(self.policy.timeout)),
                    }
                }
            };

            match result {
                Ok(value) => break Ok(value),
                Err(err) if self.policy.retry.should_retry(&err, attempts - 1) => {
                    let delay = self.policy.retry.delay(attempts - 1);
                    tracing::warn!(
                        "Tool {} attempt {} failed ({}), retrying in {:?}",
                        self.tool.name(),
                        attempts,
                        err,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Err(ToolError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => break Err(err),
            }
        };

        let invocation = ToolInvocation {
            tool: self.tool.name().to_string(),
            arguments,
            outcome,
            attempts,
            latency: started.elapsed(),
        };

        match &invocation.outcome {
            Ok(_) => tracing::debug!(
                "Tool {} succeeded after {} attempt(s) in {:?}",
                invocation.tool,
                invocation.attempts,
                invocation.latency
            ),
            Err(err) => tracing::warn!(
                "Tool {} failed after {} attempt(s): {}",
                invocation.tool,
                invocation.attempts,
                err
            ),
        }

        invocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Sleeps past the adapter timeout for the first `slow_calls` calls.
    struct FlakyTool {
        calls: AtomicU32,
        slow_calls: u32,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "times out a few times, then answers"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.slow_calls {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(json!({"answer": 42}))
        }
    }

    struct FailingTool {
        calls: AtomicU32,
        error: ToolError,
    }

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    fn fast_policy(retry_count: u32) -> ToolPolicy {
        ToolPolicy {
            timeout: Duration::from_millis(30),
            retry: RetryPolicy {
                retry_count,
                backoff_base: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
            },
        }
    }

    #[tokio::test]
    async fn test_timeouts_then_success_are_retried() {
        let tool = Arc::new(FlakyTool {
            calls: AtomicU32::new(0),
            slow_calls: 2,
        });
        let adapter = ToolAdapter::new(tool.clone(), fast_policy(3));

        let invocation = adapter
            .invoke(json!({}), &CancellationToken::new())
            .await;

        assert_eq!(invocation.outcome, Ok(json!({"answer": 42})));
        assert_eq!(invocation.attempts, 3);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
        assert!(invocation.latency >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_last_error() {
        let tool = Arc::new(FailingTool {
            calls: AtomicU32::new(0),
            error: ToolError::Unavailable("down".into()),
        });
        let adapter = ToolAdapter::new(tool.clone(), fast_policy(2));

        let invocation = adapter.invoke(json!({}), &CancellationToken::new()).await;

        assert_eq!(invocation.outcome, Err(ToolError::Unavailable("down".into())));
        assert_eq!(invocation.attempts, 3);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_arguments_not_retried() {
        let tool = Arc::new(FailingTool {
            calls: AtomicU32::new(0),
            error: ToolError::InvalidArguments("query is required".into()),
        });
        let adapter = ToolAdapter::new(tool.clone(), fast_policy(3));

        let invocation = adapter.invoke(json!({}), &CancellationToken::new()).await;

        assert!(matches!(invocation.outcome, Err(ToolError::InvalidArguments(_))));
        assert_eq!(invocation.attempts, 1);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_not_retried() {
        let tool = Arc::new(FailingTool {
            calls: AtomicU32::new(0),
            error: ToolError::Upstream {
                code: 400,
                message: "bad query".into(),
            },
        });
        let adapter = ToolAdapter::new(tool.clone(), fast_policy(3));

        let invocation = adapter.invoke(json!({}), &CancellationToken::new()).await;

        assert_eq!(invocation.attempts, 1);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_slow_attempt() {
        let tool = Arc::new(FlakyTool {
            calls: AtomicU32::new(0),
            slow_calls: 10,
        });
        let policy = ToolPolicy {
            timeout: Duration::from_secs(10),
            ..fast_policy(0)
        };
        let adapter = ToolAdapter::new(tool, policy);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let invocation = adapter.invoke(json!({}), &cancel).await;
        assert_eq!(invocation.outcome, Err(ToolError::Cancelled));
        assert!(invocation.latency < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let tool = Arc::new(FailingTool {
            calls: AtomicU32::new(0),
            error: ToolError::Unavailable("down".into()),
        });
        let adapter = ToolAdapter::new(tool.clone(), fast_policy(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let invocation = adapter.invoke(json!({}), &cancel).await;
        assert_eq!(invocation.outcome, Err(ToolError::Cancelled));
        assert_eq!(invocation.attempts, 0);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }
}
