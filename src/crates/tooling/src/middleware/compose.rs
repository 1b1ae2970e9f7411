//! Composing several middleware layers around one operation
//!
//! [`compose`] nests a list of [`Middleware`] layers around a base
//! [`Operation`], outermost first: `compose(vec![a, b, c], base)` builds
//! `a(b(c(base)))` — `a` sees every call first and every result last.

use crate::async_utils::retry::{with_retry, RetryPolicy};
use crate::async_utils::timeout::with_timeout;
use crate::middleware::bulkhead::{Bulkhead, Priority};
use crate::middleware::circuit_breaker::CircuitBreaker;
use crate::middleware::dedup::Deduplicator;
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A retryable, zero-argument async operation producing `T` or an error
///
/// Every middleware layer only sees this trait, never the concrete error
/// type underneath, so layers with incompatible error types (a circuit
/// breaker's `CircuitBreakerError<E>`, a bulkhead's `BulkheadError<E>`, a
/// plain `Result<T, String>` tool call) can still be composed together.
#[async_trait]
pub trait Operation<T: Send>: Send + Sync {
    /// Run the operation once
    async fn call(&self) -> AnyResult<T>;
}

/// Adapts a `Fn() -> Future<Output = AnyResult<T>>` closure into an [`Operation`]
pub struct FnOperation<F>(pub F);

#[async_trait]
impl<T, F, Fut> Operation<T> for FnOperation<F>
where
    T: Send,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = AnyResult<T>> + Send,
{
    async fn call(&self) -> AnyResult<T> {
        (self.0)().await
    }
}

/// A single resilience concern wrapped around an inner [`Operation`]
#[async_trait]
pub trait Middleware<T: Send>: Send + Sync {
    /// Run `next`, applying this layer's behavior around the call
    async fn call(&self, next: &dyn Operation<T>) -> AnyResult<T>;
}

struct Layer<T: Send> {
    middleware: Arc<dyn Middleware<T>>,
    next: Arc<dyn Operation<T>>,
}

#[async_trait]
impl<T: Send + Sync + 'static> Operation<T> for Layer<T> {
    async fn call(&self) -> AnyResult<T> {
        self.middleware.call(self.next.as_ref()).await
    }
}

/// Nest `middlewares` around `base`, outermost layer first
///
/// `compose(vec![a, b, c], base)` returns an [`Operation`] equivalent to
/// `a(b(c(base)))`: calling it runs `a`'s logic around a call to `b`'s logic
/// around a call to `c`'s logic around a direct call to `base`.
pub fn compose<T: Send + Sync + 'static>(
    middlewares: Vec<Arc<dyn Middleware<T>>>,
    base: Arc<dyn Operation<T>>,
) -> Arc<dyn Operation<T>> {
    middlewares
        .into_iter()
        .rev()
        .fold(base, |next, middleware| Arc::new(Layer { middleware, next }) as Arc<dyn Operation<T>>)
}

/// Retries the wrapped call per a [`RetryPolicy`]
pub struct RetryMiddleware(pub RetryPolicy);

#[async_trait]
impl<T: Send + Sync + 'static> Middleware<T> for RetryMiddleware {
    async fn call(&self, next: &dyn Operation<T>) -> AnyResult<T> {
        with_retry(&self.0, || next.call()).await
    }
}

/// Bounds the wrapped call's running time
pub struct TimeoutMiddleware(pub Duration);

#[async_trait]
impl<T: Send + Sync + 'static> Middleware<T> for TimeoutMiddleware {
    async fn call(&self, next: &dyn Operation<T>) -> AnyResult<T> {
        with_timeout(self.0, next.call())
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

/// Rejects the wrapped call while the underlying [`CircuitBreaker`] is open
pub struct CircuitBreakerMiddleware(pub CircuitBreaker);

#[async_trait]
impl<T: Send + Sync + 'static> Middleware<T> for CircuitBreakerMiddleware {
    async fn call(&self, next: &dyn Operation<T>) -> AnyResult<T> {
        self.0
            .call(|| next.call())
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

/// Bounds the wrapped call's concurrency via a [`Bulkhead`]
pub struct BulkheadMiddleware {
    /// Bulkhead shared across every call guarded by this layer
    pub bulkhead: Bulkhead,
    /// Priority assigned to calls entering this layer
    pub priority: Priority,
}

#[async_trait]
impl<T: Send + Sync + 'static> Middleware<T> for BulkheadMiddleware {
    async fn call(&self, next: &dyn Operation<T>) -> AnyResult<T> {
        self.bulkhead
            .run(self.priority, || next.call())
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

/// Coalesces concurrent calls that share a key
pub struct DedupMiddleware<T> {
    dedup: Deduplicator<T, String>,
    key_fn: Arc<dyn Fn() -> String + Send + Sync>,
}

impl<T: Clone + Send + Sync + 'static> DedupMiddleware<T> {
    /// Create a dedup layer that derives each call's cache key via `key_fn`
    pub fn new(dedup: Deduplicator<T, String>, key_fn: Arc<dyn Fn() -> String + Send + Sync>) -> Self {
        Self { dedup, key_fn }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Middleware<T> for DedupMiddleware<T> {
    async fn call(&self, next: &dyn Operation<T>) -> AnyResult<T> {
        let key = (self.key_fn)();
        self.dedup
            .run(key, || async { next.call().await.map_err(|e| e.to_string()) })
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::bulkhead::BulkheadConfig;
    use crate::middleware::circuit_breaker::CircuitBreakerConfig;
    use crate::middleware::dedup::DeduplicatorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_base(calls: Arc<AtomicUsize>) -> Arc<dyn Operation<usize>> {
        Arc::new(FnOperation(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(calls.load(Ordering::SeqCst))
            }
        }))
    }

    #[tokio::test]
    async fn test_single_layer_passthrough() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = counting_base(calls.clone());
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(60)));
        let composed = compose(
            vec![Arc::new(CircuitBreakerMiddleware(breaker)) as Arc<dyn Middleware<usize>>],
            base,
        );

        let result = composed.call().await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_wraps_timeout() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let base: Arc<dyn Operation<usize>> = Arc::new(FnOperation({
            let attempts = attempts.clone();
            move || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        anyhow::bail!("not yet")
                    } else {
                        Ok(n)
                    }
                }
            }
        }));

        let policy = RetryPolicy::new(5).with_initial_interval(0.001).with_jitter(false);
        let composed = compose(
            vec![
                Arc::new(RetryMiddleware(policy)) as Arc<dyn Middleware<usize>>,
                Arc::new(TimeoutMiddleware(Duration::from_secs(1))) as Arc<dyn Middleware<usize>>,
            ],
            base,
        );

        let result = composed.call().await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dedup_layer_coalesces_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = counting_base(calls.clone());
        let dedup = Deduplicator::<usize, String>::new(DeduplicatorConfig::new());
        let layer = DedupMiddleware::new(dedup, Arc::new(|| "fixed-key".to_string()));
        let composed = compose(vec![Arc::new(layer) as Arc<dyn Middleware<usize>>], base);

        let first = composed.call().await.unwrap();
        let second = composed.call().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bulkhead_layer_limits_concurrency() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = counting_base(calls.clone());
        let bulkhead = Bulkhead::new(BulkheadConfig::new(4, 4));
        let layer = BulkheadMiddleware {
            bulkhead,
            priority: Priority::Normal,
        };
        let composed = compose(vec![Arc::new(layer) as Arc<dyn Middleware<usize>>], base);

        let result = composed.call().await;
        assert!(result.is_ok());
    }
}
