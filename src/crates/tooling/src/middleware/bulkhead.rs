//! Bulkhead concurrency limiter
//!
//! Bounds the number of concurrently in-flight executions. Callers that
//! arrive once the bound is saturated wait in a bounded, priority-ordered
//! queue rather than running unbounded in parallel.

use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout as tokio_timeout;

/// Priority of a queued task
///
/// Higher-priority tasks are dispatched before lower-priority ones; tasks of
/// equal priority are dispatched FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Dispatched last
    Low,
    /// Default priority
    Normal,
    /// Dispatched first
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Error returned by [`Bulkhead::run`]
#[derive(Debug)]
pub enum BulkheadError<E> {
    /// The wrapped operation ran and failed
    OperationFailed(E),
    /// The wait queue was already at `max_queue_size`
    QueueFull,
    /// The task was queued but `queue_timeout` elapsed before a slot freed up
    QueueTimeout,
}

impl<E: std::fmt::Display> std::fmt::Display for BulkheadError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkheadError::OperationFailed(e) => write!(f, "operation failed: {e}"),
            BulkheadError::QueueFull => write!(f, "bulkhead queue is full"),
            BulkheadError::QueueTimeout => write!(f, "task timed out waiting in the bulkhead queue"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BulkheadError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BulkheadError::OperationFailed(e) => Some(e),
            BulkheadError::QueueFull | BulkheadError::QueueTimeout => None,
        }
    }
}

/// Configuration for a [`Bulkhead`]
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum number of concurrently in-flight executions
    pub max_concurrent: usize,
    /// Maximum number of tasks allowed to wait in the queue
    pub max_queue_size: usize,
    /// Optional per-task ceiling on time spent waiting in the queue
    pub queue_timeout: Option<Duration>,
}

impl BulkheadConfig {
    /// Create a new configuration with the given concurrency and queue bounds
    pub fn new(max_concurrent: usize, max_queue_size: usize) -> Self {
        Self {
            max_concurrent,
            max_queue_size,
            queue_timeout: None,
        }
    }

    /// Set a per-task ceiling on time spent waiting in the queue
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }
}

/// A waiter's place in line, ordered by (priority, arrival order)
#[derive(Clone, Copy)]
struct Ticket {
    priority: Priority,
    sequence: u64,
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for Ticket {}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first; for equal priority, earlier sequence (smaller
        // number) first. BinaryHeap is a max-heap, so reverse the sequence
        // comparison to get FIFO order among equal priorities.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct BulkheadState {
    queue: BinaryHeap<Ticket>,
    next_sequence: u64,
    active: usize,
}

/// Bounds concurrent in-flight executions, queueing the rest by priority
///
/// Cheaply cloneable; a single [`Bulkhead`] is meant to be shared across
/// every caller of the guarded operation.
///
/// # Example
///
/// ```rust
/// use tooling::middleware::bulkhead::{Bulkhead, BulkheadConfig, Priority};
///
/// # #[tokio::main]
/// # async fn main() {
/// let bulkhead = Bulkhead::new(BulkheadConfig::new(2, 10));
///
/// let result = bulkhead
///     .run(Priority::Normal, || async { Ok::<_, String>("done") })
///     .await;
/// assert!(result.is_ok());
/// # }
/// ```
#[derive(Clone)]
pub struct Bulkhead {
    config: BulkheadConfig,
    state: Arc<Mutex<BulkheadState>>,
    notify: Arc<Notify>,
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BulkheadState {
                queue: BinaryHeap::new(),
                next_sequence: 0,
                active: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Number of executions currently in flight
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active
    }

    /// Number of tasks currently waiting for a slot
    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Run `operation` once a concurrency slot is available
    ///
    /// If the bulkhead is saturated, the caller waits in the priority queue.
    /// Returns [`BulkheadError::QueueFull`] immediately if the queue is
    /// already at capacity, or [`BulkheadError::QueueTimeout`] if
    /// `queue_timeout` elapses first.
    pub async fn run<F, Fut, T, E>(&self, priority: Priority, operation: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire_slot(priority).await.map_err(|e| match e {
            BulkheadError::QueueFull => BulkheadError::QueueFull,
            BulkheadError::QueueTimeout => BulkheadError::QueueTimeout,
            BulkheadError::OperationFailed(()) => unreachable!("acquire_slot never fails the operation"),
        })?;

        let result = operation().await;
        self.release_slot().await;

        result.map_err(BulkheadError::OperationFailed)
    }

    async fn acquire_slot(&self, priority: Priority) -> Result<(), BulkheadError<()>> {
        let ticket = {
            let mut guard = self.state.lock().await;

            if guard.active < self.config.max_concurrent && guard.queue.is_empty() {
                guard.active += 1;
                return Ok(());
            }

            if guard.queue.len() >= self.config.max_queue_size {
                return Err(BulkheadError::QueueFull);
            }

            let sequence = guard.next_sequence;
            guard.next_sequence += 1;
            let ticket = Ticket { priority, sequence };
            guard.queue.push(ticket);
            ticket
        };

        let wait_for_turn = async {
            loop {
                let notified = self.notify.notified();
                {
                    let mut guard = self.state.lock().await;
                    if guard.active < self.config.max_concurrent
                        && guard.queue.peek().copied() == Some(ticket)
                    {
                        guard.queue.pop();
                        guard.active += 1;
                        return;
                    }
                }
                notified.await;
            }
        };

        match self.config.queue_timeout {
            Some(d) => match tokio_timeout(d, wait_for_turn).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    // Our wait lost the race; drop our ticket so a stale
                    // entry at the head of the heap never blocks everyone
                    // behind it forever.
                    let mut guard = self.state.lock().await;
                    let remaining: BinaryHeap<Ticket> =
                        guard.queue.drain().filter(|t| *t != ticket).collect();
                    guard.queue = remaining;
                    drop(guard);
                    self.notify.notify_waiters();
                    Err(BulkheadError::QueueTimeout)
                }
            },
            None => {
                wait_for_turn.await;
                Ok(())
            }
        }
    }

    async fn release_slot(&self) {
        let mut guard = self.state.lock().await;
        guard.active = guard.active.saturating_sub(1);
        drop(guard);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_within_capacity() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(2, 5));
        let result = bulkhead.run(Priority::Normal, || async { Ok::<_, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_queue_full_is_rejected() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(1, 0));

        let held = bulkhead.clone();
        let handle = tokio::spawn(async move {
            held.run(Priority::Normal, || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, String>(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = bulkhead.run(Priority::Normal, || async { Ok::<_, String>(()) }).await;
        assert!(matches!(result, Err(BulkheadError::QueueFull)));

        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_queued_task_eventually_runs() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(1, 5));

        let held = bulkhead.clone();
        let first = tokio::spawn(async move {
            held.run(Priority::Normal, || async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, String>(1)
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = bulkhead.run(Priority::Normal, || async { Ok::<_, String>(2) }).await;

        assert_eq!(second.unwrap(), 2);
        assert_eq!(first.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_higher_priority_dispatched_first() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(1, 5));
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = bulkhead.clone();
        let blocker = tokio::spawn(async move {
            held.run(Priority::Normal, || async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, String>(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let low_bulkhead = bulkhead.clone();
        let low_order = order.clone();
        let low = tokio::spawn(async move {
            low_bulkhead
                .run(Priority::Low, || async {
                    low_order.lock().await.push("low");
                    Ok::<_, String>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let high_bulkhead = bulkhead.clone();
        let high_order = order.clone();
        let high = tokio::spawn(async move {
            high_bulkhead
                .run(Priority::High, || async {
                    high_order.lock().await.push("high");
                    Ok::<_, String>(())
                })
                .await
        });

        let _ = blocker.await;
        let _ = tokio::join!(low, high);

        let finished_order = order.lock().await.clone();
        assert_eq!(finished_order, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_queue_timeout_rejects_stale_waiter() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(1, 5).with_queue_timeout(Duration::from_millis(20)));

        let held = bulkhead.clone();
        let handle = tokio::spawn(async move {
            held.run(Priority::Normal, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, String>(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = bulkhead.run(Priority::Normal, || async { Ok::<_, String>(()) }).await;
        assert!(matches!(result, Err(BulkheadError::QueueTimeout)));

        let _ = handle.await;
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
