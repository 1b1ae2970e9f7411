//! Generic async connection pool
//!
//! Bounds the number of live resources between `min` and `max`, blocks
//! acquires past `max` up to `acquire_timeout`, and evicts idle or unhealthy
//! resources in the background. The resource type is generic so the same
//! pool shape covers database connections, HTTP clients, or any other
//! expensive-to-create handle.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout as tokio_timeout;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Factory<R> = Arc<dyn Fn() -> BoxFuture<anyhow::Result<R>> + Send + Sync>;
type HealthCheck<R> = Arc<dyn Fn(&R) -> BoxFuture<bool> + Send + Sync>;

/// Error returned by pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No resource became available before `acquire_timeout` elapsed
    #[error("timed out waiting for a pooled resource")]
    AcquireTimeout,
    /// The pool is draining and rejects new acquires
    #[error("pool is draining")]
    Draining,
    /// The resource factory failed to create a new resource
    #[error("failed to create resource: {0}")]
    CreateFailed(anyhow::Error),
    /// A `Handle` was released twice
    #[error("resource released more than once")]
    DoubleRelease,
}

/// Bounds and timing for a [`Pool`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Resources kept alive even when idle
    pub min: usize,
    /// Hard cap on concurrently live resources
    pub max: usize,
    /// How long `acquire` blocks before giving up
    pub acquire_timeout: Duration,
    /// How long a resource may sit idle before eviction
    pub idle_timeout: Duration,
}

impl PoolConfig {
    /// Construct a config, clamping `min` to `max` if it's given larger
    pub fn new(min: usize, max: usize, acquire_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            min: min.min(max),
            max,
            acquire_timeout,
            idle_timeout,
        }
    }
}

/// Point-in-time pool metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetrics {
    /// Resources currently alive (idle + acquired)
    pub size: usize,
    /// Resources sitting idle, ready to acquire
    pub available: usize,
    /// Resources currently checked out
    pub acquired: usize,
    /// Total resources created over the pool's lifetime
    pub created: u64,
    /// Total resources destroyed (idle-evicted, unhealthy, or drained)
    pub destroyed: u64,
    /// Total health checks that passed
    pub health_pass: u64,
    /// Total health checks that failed
    pub health_fail: u64,
}

struct Entry<R> {
    resource: R,
    idle_since: Instant,
}

struct PoolState<R> {
    idle: VecDeque<Entry<R>>,
    acquired: usize,
    draining: bool,
}

struct MetricsInner {
    created: AtomicU64,
    destroyed: AtomicU64,
    health_pass: AtomicU64,
    health_fail: AtomicU64,
}

impl Default for MetricsInner {
    fn default() -> Self {
        Self {
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            health_pass: AtomicU64::new(0),
            health_fail: AtomicU64::new(0),
        }
    }
}

/// A bounded, health-checked pool of resources of type `R`
#[derive(Clone)]
pub struct Pool<R: Send + 'static> {
    config: PoolConfig,
    state: Arc<Mutex<PoolState<R>>>,
    notify: Arc<Notify>,
    factory: Factory<R>,
    health_check: HealthCheck<R>,
    metrics: Arc<MetricsInner>,
}

impl<R: Send + 'static> Pool<R> {
    /// Create a new pool. `min` resources are not created eagerly; they are
    /// simply the floor below which idle eviction won't shrink the pool.
    pub fn new(config: PoolConfig, factory: Factory<R>, health_check: HealthCheck<R>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(PoolState {
                idle: VecDeque::new(),
                acquired: 0,
                draining: false,
            })),
            notify: Arc::new(Notify::new()),
            factory,
            health_check,
            metrics: Arc::new(MetricsInner::default()),
        }
    }

    /// Check out a resource, blocking up to `acquire_timeout` if the pool is
    /// at `max` capacity and nothing is idle.
    pub async fn acquire(&self) -> Result<Handle<R>, PoolError> {
        tokio_timeout(self.config.acquire_timeout, self.acquire_inner())
            .await
            .map_err(|_| PoolError::AcquireTimeout)?
    }

    async fn acquire_inner(&self) -> Result<Handle<R>, PoolError> {
        loop {
            {
                let mut guard = self.state.lock().await;
                if guard.draining {
                    return Err(PoolError::Draining);
                }

                if let Some(entry) = guard.idle.pop_front() {
                    guard.acquired += 1;
                    return Ok(Handle::new(self.clone(), entry.resource));
                }

                if guard.acquired + guard.idle.len() < self.config.max {
                    guard.acquired += 1;
                    drop(guard);

                    return match (self.factory)().await {
                        Ok(resource) => {
                            self.metrics.created.fetch_add(1, Ordering::Relaxed);
                            Ok(Handle::new(self.clone(), resource))
                        }
                        Err(e) => {
                            let mut guard = self.state.lock().await;
                            guard.acquired -= 1;
                            drop(guard);
                            self.notify.notify_waiters();
                            Err(PoolError::CreateFailed(e))
                        }
                    };
                }
            }

            self.notify.notified().await;
        }
    }

    /// Return a resource to the pool after `health_check` has confirmed it's
    /// still usable. Unhealthy resources are dropped instead.
    async fn release(&self, resource: R) {
        let healthy = (self.health_check)(&resource).await;
        if healthy {
            self.metrics.health_pass.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.health_fail.fetch_add(1, Ordering::Relaxed);
        }

        let mut guard = self.state.lock().await;
        guard.acquired -= 1;

        if healthy && !guard.draining {
            guard.idle.push_back(Entry {
                resource,
                idle_since: Instant::now(),
            });
        } else {
            self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
        }

        drop(guard);
        self.notify.notify_waiters();
    }

    /// Refuse new acquires and wait for every checked-out resource to be
    /// released. Idle resources are destroyed immediately.
    pub async fn drain(&self) {
        let mut guard = self.state.lock().await;
        guard.draining = true;
        let evicted = guard.idle.len() as u64;
        guard.idle.clear();
        self.metrics.destroyed.fetch_add(evicted, Ordering::Relaxed);
        drop(guard);

        loop {
            {
                let guard = self.state.lock().await;
                if guard.acquired == 0 {
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Destroy every resource immediately, acquired or idle, and reset the
    /// pool so it can be reused.
    pub async fn clear(&self) {
        let mut guard = self.state.lock().await;
        let evicted = guard.idle.len() as u64;
        guard.idle.clear();
        guard.acquired = 0;
        guard.draining = false;
        self.metrics.destroyed.fetch_add(evicted, Ordering::Relaxed);
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Evict idle resources that have been sitting longer than
    /// `idle_timeout`, never shrinking below `min` total resources.
    pub async fn sweep_idle(&self) {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let floor = self.config.min;

        let mut kept = VecDeque::new();
        let mut evicted = 0u64;
        while let Some(entry) = guard.idle.pop_front() {
            let total_after_this = guard.acquired + kept.len() + guard.idle.len() + 1;
            if now.duration_since(entry.idle_since) >= self.config.idle_timeout && total_after_this > floor {
                evicted += 1;
            } else {
                kept.push_back(entry);
            }
        }
        guard.idle = kept;
        self.metrics.destroyed.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Run `health_check` against every idle resource, destroying and (up to
    /// `min`) replacing any that fail.
    pub async fn run_health_checks(&self) {
        let idle: Vec<Entry<R>> = {
            let mut guard = self.state.lock().await;
            std::mem::take(&mut guard.idle).into_iter().collect()
        };

        let mut survivors = VecDeque::new();
        for entry in idle {
            if (self.health_check)(&entry.resource).await {
                self.metrics.health_pass.fetch_add(1, Ordering::Relaxed);
                survivors.push_back(entry);
            } else {
                self.metrics.health_fail.fetch_add(1, Ordering::Relaxed);
                self.metrics.destroyed.fetch_add(1, Ordering::Relaxed);
            }
        }

        {
            let mut guard = self.state.lock().await;
            for entry in survivors {
                guard.idle.push_back(entry);
            }
        }

        self.replenish_to_min().await;
    }

    async fn replenish_to_min(&self) {
        loop {
            let should_create = {
                let guard = self.state.lock().await;
                !guard.draining && guard.acquired + guard.idle.len() < self.config.min
            };
            if !should_create {
                return;
            }

            match (self.factory)().await {
                Ok(resource) => {
                    self.metrics.created.fetch_add(1, Ordering::Relaxed);
                    let mut guard = self.state.lock().await;
                    guard.idle.push_back(Entry {
                        resource,
                        idle_since: Instant::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to replenish pool to minimum size");
                    return;
                }
            }
        }
    }

    /// Spawn a background task that periodically sweeps idle resources and
    /// runs health checks until the pool is dropped.
    pub fn spawn_maintenance(&self, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        R: 'static,
    {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                pool.sweep_idle().await;
                pool.run_health_checks().await;
            }
        })
    }

    /// Run `operation` against a checked-out resource. The handle releases
    /// itself back to the pool when dropped, so this covers early returns
    /// and panics inside `operation` as well as the normal exit path.
    pub async fn with_resource<F, Fut, T>(&self, operation: F) -> Result<T, PoolError>
    where
        F: FnOnce(&mut R) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut handle = self.acquire().await?;
        Ok(operation(&mut handle).await)
    }

    /// Point-in-time metrics snapshot
    pub async fn metrics(&self) -> PoolMetrics {
        let guard = self.state.lock().await;
        PoolMetrics {
            size: guard.acquired + guard.idle.len(),
            available: guard.idle.len(),
            acquired: guard.acquired,
            created: self.metrics.created.load(Ordering::Relaxed),
            destroyed: self.metrics.destroyed.load(Ordering::Relaxed),
            health_pass: self.metrics.health_pass.load(Ordering::Relaxed),
            health_fail: self.metrics.health_fail.load(Ordering::Relaxed),
        }
    }
}

/// A checked-out resource. Its health-checked release back to the pool
/// happens on drop (spawned as a background task, since `Drop` can't be
/// `async`), so a caller that forgets to call [`Handle::release`] explicitly
/// — including one that panics mid-use — still returns the resource instead
/// of leaking the pool's accounting.
pub struct Handle<R: Send + 'static> {
    pool: Pool<R>,
    resource: Option<R>,
}

impl<R: Send + 'static> Handle<R> {
    fn new(pool: Pool<R>, resource: R) -> Self {
        Self {
            pool,
            resource: Some(resource),
        }
    }

    /// Release the resource back to the pool. Calling this twice on handles
    /// derived from the same acquire is rejected by the type system (the
    /// resource is consumed), but a caller holding a bare `Option<R>` they
    /// extracted via [`Handle::take`] and then wrapped a second time would
    /// hit this at runtime.
    pub async fn release(mut self) -> Result<(), PoolError> {
        match self.resource.take() {
            Some(resource) => {
                self.pool.release(resource).await;
                Ok(())
            }
            None => Err(PoolError::DoubleRelease),
        }
    }

    /// Take the resource out without releasing it back to the pool. The
    /// caller is responsible for the resource's fate afterward; the pool's
    /// accounting still considers the slot acquired until dropped.
    pub fn take(mut self) -> R {
        self.resource.take().expect("handle resource already taken")
    }
}

impl<R: Send + 'static> Drop for Handle<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release(resource).await;
            });
        }
    }
}

impl<R: Send + 'static> std::ops::Deref for Handle<R> {
    type Target = R;
    fn deref(&self) -> &R {
        self.resource.as_ref().expect("handle resource already taken")
    }
}

impl<R: Send + 'static> std::ops::DerefMut for Handle<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("handle resource already taken")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_factory(counter: Arc<AtomicUsize>) -> Factory<usize> {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                let id = counter.fetch_add(1, Ordering::SeqCst);
                Ok(id)
            })
        })
    }

    fn always_healthy() -> HealthCheck<usize> {
        Arc::new(|_r| Box::pin(async { true }))
    }

    fn always_unhealthy() -> HealthCheck<usize> {
        Arc::new(|_r| Box::pin(async { false }))
    }

    #[tokio::test]
    async fn test_acquire_creates_up_to_max() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(0, 2, Duration::from_millis(100), Duration::from_secs(60)),
            counting_factory(counter),
            always_healthy(),
        );

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.metrics().await.acquired, 2);

        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn test_acquire_times_out_at_capacity() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(0, 1, Duration::from_millis(30), Duration::from_secs(60)),
            counting_factory(counter),
            always_healthy(),
        );

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(PoolError::AcquireTimeout)));
    }

    #[tokio::test]
    async fn test_release_returns_resource_for_reuse() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(0, 1, Duration::from_millis(100), Duration::from_secs(60)),
            counting_factory(counter.clone()),
            always_healthy(),
        );

        let handle = pool.acquire().await.unwrap();
        handle.release().await.unwrap();

        let _handle2 = pool.acquire().await.unwrap();
        // Only one resource was ever created; the second acquire reused it.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_release_is_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(0, 1, Duration::from_millis(100), Duration::from_secs(60)),
            counting_factory(counter),
            always_healthy(),
        );

        let handle = pool.acquire().await.unwrap();
        let resource = handle.take();
        // Re-wrapping an already-taken handle and releasing it again must fail.
        let ghost = Handle::<usize> {
            pool: pool.clone(),
            resource: None,
        };
        let _ = resource;
        assert!(matches!(ghost.release().await, Err(PoolError::DoubleRelease)));
    }

    #[tokio::test]
    async fn test_unhealthy_release_is_destroyed_not_reused() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(0, 1, Duration::from_millis(100), Duration::from_secs(60)),
            counting_factory(counter.clone()),
            always_unhealthy(),
        );

        let handle = pool.acquire().await.unwrap();
        handle.release().await.unwrap();

        let _handle2 = pool.acquire().await.unwrap();
        // The first resource was unhealthy and destroyed, so a second had to be created.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(pool.metrics().await.destroyed, 1);
    }

    #[tokio::test]
    async fn test_drain_rejects_new_acquires_and_waits_for_release() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(0, 2, Duration::from_millis(100), Duration::from_secs(60)),
            counting_factory(counter),
            always_healthy(),
        );

        let handle = pool.acquire().await.unwrap();
        let pool_for_drain = pool.clone();
        let drain_task = tokio::spawn(async move { pool_for_drain.drain().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(pool.acquire().await, Err(PoolError::Draining)));

        handle.release().await.unwrap();
        drain_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_idle_respects_min() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(1, 3, Duration::from_millis(100), Duration::from_millis(10)),
            counting_factory(counter),
            always_healthy(),
        );

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        a.release().await.unwrap();
        b.release().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.sweep_idle().await;

        // min=1, so one idle resource must survive the sweep.
        assert_eq!(pool.metrics().await.size, 1);
    }

    #[tokio::test]
    async fn test_clear_destroys_everything() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = Pool::new(
            PoolConfig::new(0, 2, Duration::from_millis(100), Duration::from_secs(60)),
            counting_factory(counter),
            always_healthy(),
        );

        let handle = pool.acquire().await.unwrap();
        handle.release().await.unwrap();
        pool.clear().await;

        assert_eq!(pool.metrics().await.size, 0);
    }
}
