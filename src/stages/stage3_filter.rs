use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::llm::{
    build_judge_request, complete_with_retry, parse_judgment, CompletionProvider, RateLimiter,
    RetryPolicy,
};
use crate::models::{CandidateDetection, Dialogue, DialogueId, ScoredDetection};

/// Configuration for Stage 3
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Maximum judgments in flight at once
    pub max_concurrent: usize,
    /// Timeout and retry policy per judgment
    pub retry: RetryPolicy,
    /// Optional cap on request issuance, shared by all units
    pub max_requests_per_second: Option<f64>,
    /// Candidates are confirmed when confidence is strictly above this
    pub acceptance_threshold: f64,
    /// No unit is admitted after this instant
    pub deadline: Option<Instant>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            retry: RetryPolicy {
                timeout: Duration::from_secs(180),
                max_retries: 2,
                retry_delay: Duration::from_secs(2),
            },
            max_requests_per_second: Some(8.0),
            acceptance_threshold: 0.5,
            deadline: None,
        }
    }
}

/// Result of Stage 3 processing
#[derive(Debug)]
pub struct FilterStageResult {
    /// One scored detection per candidate, in candidate order
    pub scored: Vec<ScoredDetection>,
    /// Candidates above the acceptance threshold
    pub confirmed: usize,
    /// Candidates whose judgment failed terminally
    pub failed: usize,
    /// Candidates never started because the run deadline passed
    pub not_admitted: usize,
}

const NOT_ADMITTED: &str = "not admitted: run deadline reached";

/// Execute Stage 3: confidence filtering
///
/// Every candidate is an independent unit of work. Units wait for one of
/// `max_concurrent` permits, then hold it through all their attempts. A unit
/// that fails (timeout, transport, malformed answer) is scored 0.0 and
/// unconfirmed without affecting the others. Results land in slots indexed by
/// input position, so the output follows candidate order whatever the
/// completion order was.
pub async fn filter_candidates<P>(
    provider: &P,
    candidates: &[CandidateDetection],
    dialogues: &HashMap<&DialogueId, &Dialogue>,
    config: &FilterConfig,
) -> Result<FilterStageResult>
where
    P: CompletionProvider + ?Sized,
{
    // Resolve every dialogue up front; a dangling reference is a broken pipeline
    let units: Vec<(&CandidateDetection, &Dialogue)> = candidates
        .iter()
        .map(|candidate| {
            dialogues
                .get(&candidate.dialogue_id)
                .map(|dialogue| (candidate, *dialogue))
                .ok_or_else(|| PipelineError::InputSchema {
                    location: format!("candidate for brand {:?}", candidate.brand),
                    message: format!("unknown dialogue id {}", candidate.dialogue_id),
                })
        })
        .collect::<Result<_>>()?;

    info!(
        "Stage 3: judging {} candidates (max {} in flight)",
        units.len(),
        config.max_concurrent
    );

    let semaphore = Semaphore::new(config.max_concurrent.max(1));
    let limiter = RateLimiter::from_option(config.max_requests_per_second);

    let mut in_flight: FuturesUnordered<_> = units
        .iter()
        .enumerate()
        .map(|(ordinal, (candidate, dialogue))| {
            judge_unit(
                provider,
                ordinal,
                candidate,
                dialogue,
                &semaphore,
                &limiter,
                config,
            )
        })
        .collect();

    let mut slots: Vec<Option<ScoredDetection>> = vec![None; units.len()];
    let mut completed = 0;
    while let Some((ordinal, scored)) = in_flight.next().await {
        slots[ordinal] = Some(scored);
        completed += 1;
        if completed % 50 == 0 {
            info!("Stage 3: {}/{} candidates judged", completed, units.len());
        }
    }

    let scored: Vec<ScoredDetection> = slots.into_iter().flatten().collect();

    let confirmed = scored.iter().filter(|s| s.confirmed).count();
    let failed = scored.iter().filter(|s| s.is_failed()).count();
    let not_admitted = scored
        .iter()
        .filter(|s| s.failure.as_deref() == Some(NOT_ADMITTED))
        .count();

    info!(
        "Stage 3: {} confirmed, {} failed ({} not admitted) of {}",
        confirmed,
        failed,
        not_admitted,
        scored.len()
    );

    Ok(FilterStageResult {
        scored,
        confirmed,
        failed,
        not_admitted,
    })
}

/// Judge one candidate; never returns an error, failures become the score
async fn judge_unit<P>(
    provider: &P,
    ordinal: usize,
    candidate: &CandidateDetection,
    dialogue: &Dialogue,
    semaphore: &Semaphore,
    limiter: &RateLimiter,
    config: &FilterConfig,
) -> (usize, ScoredDetection)
where
    P: CompletionProvider + ?Sized,
{
    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return (ordinal, ScoredDetection::failed(candidate.clone(), "admission closed", 0));
        }
    };

    if config.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        debug!(
            "Dialogue {} / {}: {}",
            candidate.dialogue_id, candidate.brand, NOT_ADMITTED
        );
        return (ordinal, ScoredDetection::failed(candidate.clone(), NOT_ADMITTED, 0));
    }

    let label = format!("Dialogue {} / {}", candidate.dialogue_id, candidate.brand);
    let request = build_judge_request(&dialogue.text, candidate);
    let attempted = complete_with_retry(provider, &request, limiter, &config.retry, &label).await;

    let scored = match attempted
        .result
        .and_then(|content| parse_judgment(&content))
    {
        Ok(judgment) => {
            debug!(
                "{}: confidence {:.2}, quote {:?}",
                label, judgment.confidence, judgment.quote
            );
            ScoredDetection::judged(
                candidate.clone(),
                judgment.confidence,
                config.acceptance_threshold,
                attempted.attempts,
            )
        }
        Err(e) => {
            warn!("{} failed after {} attempts: {}", label, attempted.attempts, e);
            ScoredDetection::failed(candidate.clone(), e.to_string(), attempted.attempts)
        }
    };

    (ordinal, scored)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::llm::{CompletionOutcome, CompletionRequest};
    use crate::models::{index_dialogues, MatchSource};

    /// Mock judge that tracks how many requests are in flight
    struct CountingJudge {
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingJudge {
        fn new(delay: Duration) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for CountingJudge {
        async fn complete(&self, request: &CompletionRequest) -> CompletionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);

            // Later brands answer faster so completion order differs from input order
            let speedup = if request.user.contains("Brand: B") { 2 } else { 1 };
            tokio::time::sleep(self.delay / speedup).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.user.contains("Brand: Down") {
                CompletionOutcome::TransportFailure("HTTP 503".to_string())
            } else if request.user.contains("Brand: Slow") {
                tokio::time::sleep(Duration::from_secs(10)).await;
                CompletionOutcome::Success(r#"{"confidence": 1.0, "quote": ""}"#.to_string())
            } else if request.user.contains("Brand: Garbled") {
                CompletionOutcome::Success("I think so".to_string())
            } else if request.user.contains("Brand: Weak") {
                CompletionOutcome::Success(r#"{"confidence": 0.2, "quote": ""}"#.to_string())
            } else {
                CompletionOutcome::Success(r#"{"confidence": 0.9, "quote": ""}"#.to_string())
            }
        }
    }

    fn candidate(dialogue_id: &str, brand: &str) -> CandidateDetection {
        CandidateDetection {
            dialogue_id: DialogueId::new(dialogue_id),
            brand: brand.to_string(),
            matched_term: brand.to_lowercase(),
            matched_text: brand.to_lowercase(),
            source: MatchSource::Canonical,
        }
    }

    fn fast_config(max_concurrent: usize, max_retries: u32) -> FilterConfig {
        FilterConfig {
            max_concurrent,
            retry: RetryPolicy {
                timeout: Duration::from_millis(500),
                max_retries,
                retry_delay: Duration::ZERO,
            },
            max_requests_per_second: None,
            acceptance_threshold: 0.5,
            deadline: None,
        }
    }

    fn dialogues(count: usize) -> Vec<Dialogue> {
        (1..=count)
            .map(|i| Dialogue::new(i.to_string(), format!("dialogue {}", i), Vec::<String>::new()))
            .collect()
    }

    #[tokio::test]
    async fn test_never_exceeds_max_concurrent() {
        let dialogues = dialogues(12);
        let index = index_dialogues(&dialogues);
        let candidates: Vec<_> = dialogues
            .iter()
            .map(|d| candidate(d.dialogue_id.as_str(), "Acme"))
            .collect();
        let judge = CountingJudge::new(Duration::from_millis(20));

        let result = filter_candidates(&judge, &candidates, &index, &fast_config(3, 0))
            .await
            .unwrap();

        assert_eq!(result.scored.len(), 12);
        assert_eq!(result.confirmed, 12);
        let high_water = judge.high_water.load(Ordering::SeqCst);
        assert!(high_water <= 3, "high water mark {}", high_water);
        assert!(high_water >= 2, "units did not overlap");
    }

    #[tokio::test]
    async fn test_failed_unit_is_isolated() {
        let dialogues = dialogues(3);
        let index = index_dialogues(&dialogues);
        let candidates = vec![
            candidate("1", "Acme"),
            candidate("2", "Down"),
            candidate("3", "Acme"),
        ];
        let judge = CountingJudge::new(Duration::from_millis(5));

        let result = filter_candidates(&judge, &candidates, &index, &fast_config(2, 2))
            .await
            .unwrap();

        let down = &result.scored[1];
        assert_eq!(down.brand(), "Down");
        assert_eq!(down.confidence, 0.0);
        assert!(!down.confirmed);
        assert_eq!(down.attempts, 3);
        assert!(down.failure.as_deref().unwrap().contains("503"));

        assert!(result.scored[0].confirmed);
        assert!(result.scored[2].confirmed);
        assert_eq!(result.failed, 1);
        // 1 + 3 + 1 requests
        assert_eq!(judge.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_timeout_does_not_block_other_units() {
        let dialogues = dialogues(2);
        let index = index_dialogues(&dialogues);
        let candidates = vec![candidate("1", "Slow"), candidate("2", "Acme")];
        let judge = CountingJudge::new(Duration::from_millis(5));
        let mut config = fast_config(2, 1);
        config.retry.timeout = Duration::from_millis(100);

        let started = Instant::now();
        let result = filter_candidates(&judge, &candidates, &index, &config)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.scored[0].confidence, 0.0);
        assert_eq!(result.scored[0].attempts, 2);
        assert!(result.scored[0].failure.as_deref().unwrap().contains("timed out"));
        assert!(result.scored[1].confirmed);
    }

    #[tokio::test]
    async fn test_malformed_and_low_confidence() {
        let dialogues = dialogues(2);
        let index = index_dialogues(&dialogues);
        let candidates = vec![candidate("1", "Garbled"), candidate("2", "Weak")];
        let judge = CountingJudge::new(Duration::from_millis(1));

        let result = filter_candidates(&judge, &candidates, &index, &fast_config(2, 2))
            .await
            .unwrap();

        let garbled = &result.scored[0];
        assert!(garbled.is_failed());
        assert_eq!(garbled.attempts, 1);

        let weak = &result.scored[1];
        assert!(!weak.is_failed());
        assert!(!weak.confirmed);
        assert!((weak.confidence - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_output_follows_candidate_order() {
        let dialogues = dialogues(2);
        let index = index_dialogues(&dialogues);
        // "B*" brands answer faster than "A*" brands
        let candidates = vec![
            candidate("1", "Alpha"),
            candidate("1", "Bravo"),
            candidate("2", "Apex"),
            candidate("2", "Beta"),
        ];
        let judge = CountingJudge::new(Duration::from_millis(30));

        let result = filter_candidates(&judge, &candidates, &index, &fast_config(4, 0))
            .await
            .unwrap();

        let order: Vec<&CandidateDetection> = result.scored.iter().map(|s| &s.candidate).collect();
        let expected: Vec<&CandidateDetection> = candidates.iter().collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_deadline_stops_admission() {
        let dialogues = dialogues(3);
        let index = index_dialogues(&dialogues);
        let candidates: Vec<_> = dialogues
            .iter()
            .map(|d| candidate(d.dialogue_id.as_str(), "Acme"))
            .collect();
        let judge = CountingJudge::new(Duration::from_millis(1));
        let mut config = fast_config(2, 0);
        config.deadline = Some(Instant::now());

        let result = filter_candidates(&judge, &candidates, &index, &config)
            .await
            .unwrap();

        assert_eq!(result.not_admitted, 3);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
        assert!(result.scored.iter().all(|s| s.confidence == 0.0));
    }

    #[tokio::test]
    async fn test_unknown_dialogue_is_fatal() {
        let dialogues = dialogues(1);
        let index = index_dialogues(&dialogues);
        let candidates = vec![candidate("99", "Acme")];
        let judge = CountingJudge::new(Duration::ZERO);

        let err = filter_candidates(&judge, &candidates, &index, &fast_config(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputSchema { .. }));
    }

    #[test]
    fn test_filter_config_default() {
        let config = FilterConfig::default();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.retry.timeout, Duration::from_secs(180));
        assert_eq!(config.retry.max_retries, 2);
    }
}
