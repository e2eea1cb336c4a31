//! Re-registers a consumer after a broker-initiated *consumer cancel*
//! without starving or thundering (spec §4.7).

use crate::logger::Logger;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        // Spec §8: 5s, 10s, 20s, 40s, 60s (capped); gives up after attempt 5.
        Self { base_delay: Duration::from_secs(5), max_delay: Duration::from_secs(60), max_attempts: 5 }
    }
}

pub fn delay_for_attempt(config: &ReconnectConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let millis = config.base_delay.as_millis() as u64 * factor;
    Duration::from_millis(millis.min(config.max_delay.as_millis() as u64))
}

/// A re-registration attempt. `Ok(())` means the consumer is live
/// again; `Err` carries a description of why it isn't yet.
pub type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

pub struct ConsumerReconnectionManager {
    config: ReconnectConfig,
    logger: Arc<dyn Logger>,
    attempt: Arc<AtomicU32>,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerReconnectionManager {
    pub fn new(config: ReconnectConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            config,
            logger,
            attempt: Arc::new(AtomicU32::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    pub fn current_attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Schedules `callback` after the next backoff delay. Concurrent
    /// calls collapse onto a single pending timer: each call bumps a
    /// generation counter, invalidating any in-flight timer that fires
    /// afterward. On success the attempt counter resets; on failure the
    /// next attempt is scheduled automatically, up to `max_attempts`.
    pub async fn schedule_reconnect(self: &Arc<Self>, callback: ReconnectCallback) {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if attempt > self.config.max_attempts {
            self.logger.error(
                &format!("consumer reconnection gave up after {} attempts", self.config.max_attempts),
                None,
                None,
            );
            self.attempt.store(0, Ordering::SeqCst);
            return;
        }

        let delay = delay_for_attempt(&self.config, attempt);
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.generation.load(Ordering::SeqCst) != my_generation {
                return; // superseded by a newer schedule_reconnect call.
            }
            match callback().await {
                Ok(()) => {
                    manager.attempt.store(0, Ordering::SeqCst);
                }
                Err(e) => {
                    manager.logger.warn(&format!("consumer reconnect attempt {attempt} failed: {e}"), None);
                    Box::pin(manager.schedule_reconnect(callback.clone())).await;
                }
            }
        });

        let mut pending = self.pending.lock().await;
        *pending = Some(handle);
    }

    /// Aborts any scheduled attempt and resets the attempt counter.
    pub async fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock().await;
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        self.attempt.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delays_follow_5_10_20_40_60_capped() {
        let config = ReconnectConfig::default();
        let expected = [5, 10, 20, 40, 60];
        for (i, secs) in expected.iter().enumerate() {
            assert_eq!(delay_for_attempt(&config, i as u32 + 1), Duration::from_secs(*secs));
        }
        // attempt 6 would be 160s but caps at max_delay (60s).
        assert_eq!(delay_for_attempt(&config, 6), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_consecutive_failures() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            max_attempts: 3,
        };
        let manager = Arc::new(ConsumerReconnectionManager::new(config, Arc::new(NoopLogger)));
        let calls = Arc::new(AtomicUsize::new(0));

        let cb: ReconnectCallback = {
            let calls = calls.clone();
            Arc::new(move || {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("still cancelled".to_string())
                })
            })
        };

        manager.schedule_reconnect(cb).await;
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(5)).await;
            tokio::task::yield_now().await;
        }

        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(manager.current_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resets_attempt_counter_on_success() {
        let config = ReconnectConfig { base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(10), max_attempts: 5 };
        let manager = Arc::new(ConsumerReconnectionManager::new(config, Arc::new(NoopLogger)));

        let cb: ReconnectCallback = Arc::new(|| Box::pin(async { Ok(()) }));
        manager.schedule_reconnect(cb).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert_eq!(manager.current_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_schedule_calls_collapse_onto_one_timer() {
        let config = ReconnectConfig { base_delay: Duration::from_millis(100), max_delay: Duration::from_millis(200), max_attempts: 5 };
        let manager = Arc::new(ConsumerReconnectionManager::new(config, Arc::new(NoopLogger)));
        let calls = Arc::new(AtomicUsize::new(0));

        let cb: ReconnectCallback = {
            let calls = calls.clone();
            Arc::new(move || {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        manager.schedule_reconnect(cb.clone()).await;
        manager.schedule_reconnect(cb).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        // only the second, latest-generation timer should have fired.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
