//! Per-key debouncing work queue with exponential backoff.
//!
//! A key is queued at most once. A key added while a worker holds it is
//! parked as dirty and queued again when the worker calls [`WorkQueue::done`],
//! so one key never has two passes in flight.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use stratus_core::ObjectKey;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

const DEFAULT_BASE_DELAY_MS: u64 = 100;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Exponential backoff for failed keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure (milliseconds)
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Upper bound on the delay (milliseconds)
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Add up to 10% random delay to spread retries
    #[serde(default)]
    pub jitter: bool,
}

fn default_base_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_DELAY_MS,
            max_ms: DEFAULT_MAX_DELAY_MS,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter: false,
        }
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `min(base * 2^attempt, max)`, plus jitter when enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_ms.saturating_mul(2u64.saturating_pow(attempt));
        let capped = exponential.min(self.max_ms);

        let jitter_ms = if self.jitter && capped >= 10 {
            rand::thread_rng().gen_range(0..capped / 10)
        } else {
            0
        };

        Duration::from_millis(capped.saturating_add(jitter_ms))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

/// Work queue shared by the workers of one controller.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    retry: RetryPolicy,
}

impl WorkQueue {
    pub fn new(retry: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            retry,
        })
    }

    /// Queue a key unless it is already waiting.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if !state.processing.contains(&key) {
            trace!(object = %key, "Queued");
            state.queue.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Queue a key after `delay`.
    pub async fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Record a failure and queue the key after its backoff delay.
    pub async fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) {
        let attempt = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let attempt = *failures;
            *failures = failures.saturating_add(1);
            attempt
        };
        let delay = self.retry.delay(attempt);
        trace!(object = %key, attempt, ?delay, "Backing off");
        self.add_after(key, delay).await;
    }

    /// Reset the failure count of a key.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn failures(&self, key: &ObjectKey) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release a key taken with [`WorkQueue::get`].
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Keys waiting to be picked up.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(100, 1_000);
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay(63), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_tenth() {
        let policy = RetryPolicy::new(1_000, 1_000).with_jitter(true);
        for _ in 0..50 {
            let delay = policy.delay(0);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay < Duration::from_millis(1_100));
        }
    }

    #[tokio::test]
    async fn test_add_deduplicates() {
        let queue = WorkQueue::new(RetryPolicy::default());
        queue.add(key("a")).await;
        queue.add(key("a")).await;
        queue.add(key("b")).await;
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_key_re_added_while_processing_is_requeued_on_done() {
        let queue = WorkQueue::new(RetryPolicy::default());
        queue.add(key("a")).await;
        let taken = queue.get().await;
        assert_eq!(taken, Some(key("a")));

        queue.add(key("a")).await;
        assert!(queue.is_empty().await);

        queue.done(&key("a")).await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_counts_failures() {
        let queue = WorkQueue::new(RetryPolicy::new(100, 1_000));
        queue.add_rate_limited(key("a")).await;
        queue.add_rate_limited(key("a")).await;
        assert_eq!(queue.failures(&key("a")).await, 2);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(queue.get().await, Some(key("a")));

        queue.forget(&key("a")).await;
        assert_eq!(queue.failures(&key("a")).await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let queue = WorkQueue::new(RetryPolicy::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown().await;
        assert_eq!(waiter.await.ok().flatten(), None);
    }
}
