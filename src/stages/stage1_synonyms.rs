use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;
use crate::io::SynonymCache;
use crate::llm::{
    build_synonym_request, complete_with_retry, parse_synonym_batch, CompletionProvider,
    RateLimiter, RetryPolicy,
};
use crate::models::{Catalog, SynonymSet};

/// Configuration for Stage 1
#[derive(Debug, Clone)]
pub struct SynonymConfig {
    /// Brands per completion request
    pub batch_size: usize,
    /// Maximum request issuance rate
    pub max_requests_per_second: f64,
    /// Timeout and retry policy per batch request
    pub retry: RetryPolicy,
    /// Regenerate brands that are already cached
    pub force_regenerate: bool,
}

impl Default for SynonymConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_requests_per_second: 4.0,
            retry: RetryPolicy {
                timeout: Duration::from_secs(60),
                max_retries: 2,
                retry_delay: Duration::from_secs(3),
            },
            force_regenerate: false,
        }
    }
}

/// Result of Stage 1 processing
#[derive(Debug)]
pub struct SynonymStageResult {
    /// Synonyms for every catalog brand
    pub synonyms: SynonymSet,
    /// Brands sent to the completion capability
    pub brands_generated: usize,
    /// Brands served from the cache
    pub brands_cached: usize,
    /// Batches whose brands fell back to empty synonym sets
    pub degraded_batches: usize,
}

/// Execute Stage 1: synonym generation
///
/// For each batch of uncached brands:
/// 1. Wait for the fixed-interval rate limiter
/// 2. Ask for spelling variants of every brand in the batch
/// 3. Merge the answer into the cache (empty sets on failure)
/// 4. Persist the cache so an interrupted run can resume
///
/// Requests are strictly serialized: one batch in flight at a time.
pub async fn generate_synonyms<P>(
    provider: &P,
    catalog: &Catalog,
    cache: &mut SynonymCache,
    cache_path: &Path,
    config: &SynonymConfig,
) -> Result<SynonymStageResult>
where
    P: CompletionProvider + ?Sized,
{
    let pending: Vec<&str> = if config.force_regenerate {
        catalog.iter().collect()
    } else {
        cache.missing(catalog)
    };
    let brands_cached = catalog.len() - pending.len();
    let batch_size = config.batch_size.max(1);
    let batch_count = pending.len().div_ceil(batch_size);

    info!(
        "Stage 1: {} brands to generate in {} batches ({} cached)",
        pending.len(),
        batch_count,
        brands_cached
    );

    let limiter = RateLimiter::new(config.max_requests_per_second);
    let mut degraded_batches = 0;

    for (batch_index, batch) in pending.chunks(batch_size).enumerate() {
        let label = format!("Synonym batch {}/{}", batch_index + 1, batch_count);
        let request = build_synonym_request(batch);
        let attempted = complete_with_retry(provider, &request, &limiter, &config.retry, &label).await;

        let parsed = attempted
            .result
            .and_then(|content| parse_synonym_batch(&content, batch));

        match parsed {
            Ok(mut generated) => {
                let mut missing = 0;
                for brand in batch {
                    let synonyms = generated.remove(*brand).unwrap_or_else(|| {
                        missing += 1;
                        Vec::new()
                    });
                    cache.merge(brand, &synonyms);
                }
                if missing > 0 {
                    warn!("{}: no synonyms returned for {} brands", label, missing);
                }
                info!("{}: {} brands done", label, batch.len());
            }
            Err(e) => {
                warn!(
                    "{} degraded after {} attempts: {}; caching empty synonym sets",
                    label, attempted.attempts, e
                );
                degraded_batches += 1;
                for brand in batch {
                    cache.merge(brand, &[]);
                }
            }
        }

        cache.persist(cache_path)?;
    }

    Ok(SynonymStageResult {
        synonyms: cache.synonym_set(catalog),
        brands_generated: pending.len(),
        brands_cached,
        degraded_batches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionOutcome, CompletionRequest};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::time::Instant;

    /// Answers every batch with one synonym per brand, except brands named "Broken"
    struct EchoSynonyms {
        batches: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionProvider for EchoSynonyms {
        async fn complete(&self, request: &CompletionRequest) -> CompletionOutcome {
            self.batches.lock().unwrap().push(request.user.clone());
            if request.user.contains("- Broken\n") {
                return CompletionOutcome::Success("not json at all".to_string());
            }
            echo_answer(&request.user)
        }
    }

    fn echo_answer(user: &str) -> CompletionOutcome {
        let items: Vec<serde_json::Value> = user
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .map(|brand| {
                serde_json::json!({
                    "original": brand,
                    "exact_variants": [brand.to_uppercase()],
                    "phonetic_variants": [format!("{}-variant", brand)],
                    "colloquial_variants": []
                })
            })
            .collect();
        CompletionOutcome::Success(serde_json::json!({ "items": items }).to_string())
    }

    /// Notes, per request, whether the first brand was already on disk
    struct CacheObserver {
        cache_path: PathBuf,
        first_brand_on_disk: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl CompletionProvider for CacheObserver {
        async fn complete(&self, request: &CompletionRequest) -> CompletionOutcome {
            let on_disk = SynonymCache::load(&self.cache_path)
                .map(|cache| cache.contains("Сбер"))
                .unwrap_or(false);
            self.first_brand_on_disk.lock().unwrap().push(on_disk);
            echo_answer(&request.user)
        }
    }

    fn fast_config(batch_size: usize) -> SynonymConfig {
        SynonymConfig {
            batch_size,
            max_requests_per_second: 0.0,
            retry: RetryPolicy {
                timeout: Duration::from_secs(1),
                max_retries: 0,
                retry_delay: Duration::ZERO,
            },
            force_regenerate: false,
        }
    }

    #[tokio::test]
    async fn test_every_brand_gets_a_cache_entry() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("synonyms.json");
        let provider = EchoSynonyms { batches: Mutex::new(Vec::new()) };
        let catalog = Catalog::new(["Сбер", "Ozon", "Broken", "Яндекс"]);
        let mut cache = SynonymCache::default();

        let result = generate_synonyms(&provider, &catalog, &mut cache, &cache_path, &fast_config(2))
            .await
            .unwrap();

        assert_eq!(result.brands_generated, 4);
        assert_eq!(result.degraded_batches, 1);
        assert_eq!(provider.batches.lock().unwrap().len(), 2);

        let persisted = SynonymCache::load(&cache_path).unwrap();
        for brand in catalog.iter() {
            assert!(persisted.contains(brand), "{} missing from cache", brand);
        }
        // "Broken" and "Яндекс" shared the malformed batch
        assert!(persisted.get("Broken").unwrap().is_empty());
        assert!(persisted.get("Яндекс").unwrap().is_empty());
        assert_eq!(persisted.get("Ozon").unwrap(), &["OZON", "Ozon-variant"]);
        assert_eq!(result.synonyms.get("Ozon").unwrap(), &["Ozon-variant"]);
    }

    #[tokio::test]
    async fn test_cached_brands_are_skipped() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("synonyms.json");
        let provider = EchoSynonyms { batches: Mutex::new(Vec::new()) };
        let catalog = Catalog::new(["Сбер", "Ozon"]);
        let mut cache = SynonymCache::default();
        cache.merge("Сбер", &["сбербанк".to_string()]);

        let result = generate_synonyms(&provider, &catalog, &mut cache, &cache_path, &fast_config(50))
            .await
            .unwrap();

        assert_eq!(result.brands_cached, 1);
        assert_eq!(result.brands_generated, 1);
        let batches = provider.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(!batches[0].contains("Сбер"));
        assert_eq!(cache.get("Сбер").unwrap(), &["сбербанк"]);
    }

    #[tokio::test]
    async fn test_force_regenerate_replaces_cached_entries() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("synonyms.json");
        let provider = EchoSynonyms { batches: Mutex::new(Vec::new()) };
        let catalog = Catalog::new(["Ozon"]);
        let mut cache = SynonymCache::default();
        cache.merge("Ozon", &[]);

        let config = SynonymConfig {
            force_regenerate: true,
            ..fast_config(50)
        };
        generate_synonyms(&provider, &catalog, &mut cache, &cache_path, &config)
            .await
            .unwrap();

        assert_eq!(cache.get("Ozon").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batches_are_spaced_by_rate_limit() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("synonyms.json");
        let provider = EchoSynonyms { batches: Mutex::new(Vec::new()) };
        let catalog = Catalog::new(["Сбер", "Ozon", "Яндекс"]);
        let mut cache = SynonymCache::default();
        // 20 per second: one batch every 50ms
        let config = SynonymConfig {
            max_requests_per_second: 20.0,
            ..fast_config(1)
        };

        let started = Instant::now();
        generate_synonyms(&provider, &catalog, &mut cache, &cache_path, &config)
            .await
            .unwrap();

        assert_eq!(provider.batches.lock().unwrap().len(), 3);
        assert!(
            started.elapsed() >= Duration::from_millis(100),
            "three batches finished in {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_cache_is_persisted_before_next_batch() {
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("synonyms.json");
        let provider = CacheObserver {
            cache_path: cache_path.clone(),
            first_brand_on_disk: Mutex::new(Vec::new()),
        };
        let catalog = Catalog::new(["Сбер", "Ozon", "Яндекс"]);
        let mut cache = SynonymCache::default();

        generate_synonyms(&provider, &catalog, &mut cache, &cache_path, &fast_config(1))
            .await
            .unwrap();

        assert_eq!(
            *provider.first_brand_on_disk.lock().unwrap(),
            vec![false, true, true]
        );
    }

    #[test]
    fn test_synonym_config_default() {
        let config = SynonymConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_requests_per_second, 4.0);
    }
}
