//! Call deduplication
//!
//! Coalesces concurrent calls that share a key so the wrapped operation runs
//! once; later callers with the same key while it's in flight receive the
//! same result instead of re-running it. Completed results stay cached until
//! [`Deduplicator::clear`] is called, which callers run once per graph
//! invocation to scope the cache to a single run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Configuration for a [`Deduplicator`]
#[derive(Debug, Clone, Default)]
pub struct DeduplicatorConfig {
    /// Optional cap on the number of distinct keys tracked at once
    ///
    /// `None` means unbounded; a full cache rejects new keys by running the
    /// operation directly, uncached, rather than erroring.
    pub capacity: Option<usize>,
}

impl DeduplicatorConfig {
    /// Create a new configuration with no capacity limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of distinct keys tracked at once
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

enum CacheEntry<T, E> {
    InFlight(Vec<oneshot::Sender<Result<T, E>>>),
    Done(Result<T, E>),
}

/// Deduplicates calls to a single logical operation by key
///
/// Intended to sit in front of a tool call keyed by `(tool_name,
/// canonicalized_arguments)`; every caller of the wrapped operation is
/// expected to return the same `T`/`E` pair, so a [`Deduplicator`] is scoped
/// to that one shape rather than to a particular key.
///
/// # Example
///
/// ```rust
/// use tooling::middleware::dedup::{Deduplicator, DeduplicatorConfig};
///
/// # #[tokio::main]
/// # async fn main() {
/// let dedup = Deduplicator::<&str, String>::new(DeduplicatorConfig::new());
/// let result = dedup.run("key", || async { Ok("value") }).await;
/// assert_eq!(result.unwrap(), "value");
/// # }
/// ```
#[derive(Clone)]
pub struct Deduplicator<T, E> {
    config: DeduplicatorConfig,
    state: Arc<Mutex<HashMap<String, CacheEntry<T, E>>>>,
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a new, empty deduplicator
    pub fn new(config: DeduplicatorConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of distinct keys currently tracked (in flight or completed)
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether no keys are currently tracked
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every cached result and in-flight registration
    ///
    /// Callers run this once per graph invocation so cached results never
    /// leak across runs.
    pub async fn clear(&self) {
        self.state.lock().await.clear();
    }

    /// Run `operation` under `key`, coalescing concurrent callers
    ///
    /// The first caller to arrive for a given key runs `operation` and
    /// shares its result with every caller that arrived while it was in
    /// flight. Later callers, once the result is cached, receive it directly
    /// without re-running `operation`.
    pub async fn run<F, Fut>(&self, key: impl Into<String>, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = key.into();

        enum Role<T, E> {
            Leader,
            Follower(oneshot::Receiver<Result<T, E>>),
            Cached(Result<T, E>),
        }

        let role = {
            let mut guard = self.state.lock().await;
            match guard.get_mut(&key) {
                Some(CacheEntry::Done(result)) => Role::Cached(result.clone()),
                Some(CacheEntry::InFlight(waiters)) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Role::Follower(rx)
                }
                None => {
                    if let Some(cap) = self.config.capacity {
                        if guard.len() >= cap {
                            return operation().await;
                        }
                    }
                    guard.insert(key.clone(), CacheEntry::InFlight(Vec::new()));
                    Role::Leader
                }
            }
        };

        match role {
            Role::Cached(result) => result,
            Role::Follower(rx) => rx
                .await
                .expect("dedup leader dropped without completing the operation"),
            Role::Leader => {
                let result = operation().await;
                let mut guard = self.state.lock().await;
                let previous = guard.insert(key, CacheEntry::Done(result.clone()));
                if let Some(CacheEntry::InFlight(waiters)) = previous {
                    for waiter in waiters {
                        let _ = waiter.send(result.clone());
                    }
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_once_per_key() {
        let dedup = Deduplicator::<usize, String>::new(DeduplicatorConfig::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let calls = calls.clone();
            dedup.run("same-key", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(1)
            })
        };
        let result = a.await;

        let b = {
            let calls = calls.clone();
            dedup.run("same-key", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(2)
            })
        };
        let result2 = b.await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(result2.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coalesces_concurrent_callers() {
        let dedup = Arc::new(Deduplicator::<usize, String>::new(DeduplicatorConfig::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dedup = dedup.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                dedup
                    .run("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let dedup = Deduplicator::<usize, String>::new(DeduplicatorConfig::new());
        let a = dedup.run("a", || async { Ok::<_, String>(1) }).await;
        let b = dedup.run("b", || async { Ok::<_, String>(2) }).await;
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
        assert_eq!(dedup.len().await, 2);
    }

    #[tokio::test]
    async fn test_clear_resets_cache() {
        let dedup = Deduplicator::<usize, String>::new(DeduplicatorConfig::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |calls: Arc<AtomicUsize>| {
            let dedup = &dedup;
            async move {
                dedup
                    .run("key", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    })
                    .await
            }
        };

        run(calls.clone()).await.unwrap();
        dedup.clear().await;
        run(calls.clone()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_caches_failures_too() {
        let dedup = Deduplicator::<(), String>::new(DeduplicatorConfig::new());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result = dedup
                .run("failing", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom".to_string())
                })
                .await;
            assert_eq!(result.unwrap_err(), "boom");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
