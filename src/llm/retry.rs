use std::time::Duration;

use tracing::{debug, warn};

use super::{CompletionOutcome, CompletionProvider, CompletionRequest, RateLimiter};
use crate::error::{PipelineError, Result};

/// Timeout and retry discipline for one unit of work
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Upper bound for a single request
    pub timeout: Duration,
    /// Extra attempts after the first one, only for transport failures and timeouts
    pub max_retries: u32,
    /// Base pause before a retry; attempt `n` waits `n * retry_delay`
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Result of driving one request through the retry loop
#[derive(Debug)]
pub struct Attempted {
    pub result: Result<String>,
    /// Requests actually issued
    pub attempts: u32,
}

/// Issue `request` until it succeeds, hits a non-retryable outcome, or runs out of retries
///
/// Every attempt waits on `limiter` first, so retries count against the rate limit
/// like any other request. The same payload is sent each time.
pub async fn complete_with_retry<P>(
    provider: &P,
    request: &CompletionRequest,
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    label: &str,
) -> Attempted
where
    P: CompletionProvider + ?Sized,
{
    let mut last_error = None;
    let mut attempts = 0;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            debug!("{}: retry {} of {}", label, attempt, policy.max_retries);
            tokio::time::sleep(policy.retry_delay * attempt).await;
        }

        limiter.acquire().await;
        attempts += 1;

        let outcome = match tokio::time::timeout(policy.timeout, provider.complete(request)).await {
            Ok(outcome) => outcome,
            Err(_) => CompletionOutcome::Timeout,
        };

        match outcome {
            CompletionOutcome::Success(text) => {
                return Attempted {
                    result: Ok(text),
                    attempts,
                };
            }
            CompletionOutcome::Malformed(message) => {
                return Attempted {
                    result: Err(PipelineError::MalformedResponse(message)),
                    attempts,
                };
            }
            CompletionOutcome::TransportFailure(message) => {
                warn!("{}: transport failure: {}", label, message);
                last_error = Some(PipelineError::Transport(message));
            }
            CompletionOutcome::Timeout => {
                warn!("{}: timed out after {:?}", label, policy.timeout);
                last_error = Some(PipelineError::Timeout(policy.timeout));
            }
        }
    }

    Attempted {
        result: Err(last_error
            .unwrap_or_else(|| PipelineError::Transport("no attempt was made".to_string()))),
        attempts,
    }
}
