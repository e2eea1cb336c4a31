//! Content- or id-addressed LRU cache for at-most-once *effective*
//! processing on top of at-least-once delivery (spec §4.10).

use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Derives a dedupe key from a raw delivery. The default strategy
/// prefers the broker's `message_id`, falling back to a content hash.
/// A custom extractor may be supplied; if it panics or errors, callers
/// should catch that themselves and fall through to the default (spec
/// §4.10 "defensively fall back on throw").
pub trait KeyExtractor: Send + Sync {
    fn key(&self, message_id: Option<&str>, body: &[u8]) -> String;
}

pub struct DefaultKeyExtractor;

impl KeyExtractor for DefaultKeyExtractor {
    fn key(&self, message_id: Option<&str>, body: &[u8]) -> String {
        if let Some(id) = message_id {
            return format!("id:{id}");
        }
        let mut hasher = Sha256::new();
        hasher.update(body);
        format!("sha256:{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone)]
pub struct DedupeConfig {
    pub cache_size: usize,
    pub cache_ttl: Duration,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        // Spec §5: dedup cache TTL default 5 min.
        Self { cache_size: 10_000, cache_ttl: Duration::from_secs(300) }
    }
}

struct DedupeEntry {
    value: Value,
    inserted_at: Instant,
}

pub struct Deduplicator {
    config: DedupeConfig,
    extractor: Box<dyn KeyExtractor>,
    cache: Mutex<LruCache<String, DedupeEntry>>,
}

pub struct ProcessOutcome {
    pub duplicate: bool,
    pub result: Value,
}

impl Deduplicator {
    pub fn new(config: DedupeConfig) -> Self {
        Self::with_extractor(config, Box::new(DefaultKeyExtractor))
    }

    pub fn with_extractor(config: DedupeConfig, extractor: Box<dyn KeyExtractor>) -> Self {
        let capacity = NonZeroUsize::new(config.cache_size.max(1)).unwrap();
        Self { config, extractor, cache: Mutex::new(LruCache::new(capacity)) }
    }

    fn key(&self, message_id: Option<&str>, body: &[u8]) -> String {
        self.extractor.key(message_id, body)
    }

    /// Runs `handler` unless a live cache entry exists for this
    /// delivery's key, in which case the cached result is returned
    /// without invoking `handler`. Only `Ok` handler outcomes are
    /// cached (SPEC_FULL §3: failures are never cached, to avoid
    /// suppressing legitimate retries).
    pub async fn process<F, Fut>(
        &self,
        message_id: Option<&str>,
        body: &[u8],
        handler: F,
    ) -> Result<ProcessOutcome, crate::error::Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, crate::error::Error>>,
    {
        let key = self.key(message_id, body);

        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&key) {
                if entry.inserted_at.elapsed() <= self.config.cache_ttl {
                    return Ok(ProcessOutcome { duplicate: true, result: entry.value.clone() });
                }
                cache.pop(&key);
            }
        }

        let result = handler().await?;

        let mut cache = self.cache.lock().unwrap();
        cache.put(key, DedupeEntry { value: result.clone(), inserted_at: Instant::now() });

        Ok(ProcessOutcome { duplicate: false, result })
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn distinct_message_ids_both_invoke_handler() {
        let dedup = Deduplicator::new(DedupeConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        for id in ["msg-1", "msg-2"] {
            let calls = calls.clone();
            let outcome = dedup
                .process(Some(id), b"{}", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"ok": true}))
                })
                .await
                .unwrap();
            assert!(!outcome.duplicate);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn identical_message_id_suppresses_second_invocation() {
        let dedup = Deduplicator::new(DedupeConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let outcome = dedup
                .process(Some("same-id"), b"{}", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"result": 42}))
                })
                .await
                .unwrap();
            if calls.load(Ordering::SeqCst) > 1 {
                assert!(outcome.duplicate);
                assert_eq!(outcome.result, json!({"result": 42}));
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_to_content_hash_when_message_id_absent() {
        let dedup = Deduplicator::new(DedupeConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            dedup
                .process(None, br#"{"payload":"x"}"#, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_handler_is_not_cached() {
        let dedup = Deduplicator::new(DedupeConfig::default());
        let first = dedup
            .process(Some("fail-id"), b"{}", || async { Err::<Value, _>(crate::error::Error::validation("boom")) })
            .await;
        assert!(first.is_err());
        assert!(dedup.is_empty());
    }
}
