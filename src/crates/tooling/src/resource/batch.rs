//! Size- or time-triggered batching of individual work items
//!
//! Mirrors the client-event-batching shape used elsewhere in the stack:
//! items accumulate until either `max_size` is reached or `max_wait` has
//! elapsed since the oldest pending item, then the whole batch flushes
//! through a user-supplied processor. Each caller gets back its own item's
//! result (or the batch-level error, if the processor fails wholesale and no
//! per-item fallback recovers it).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Processor<T, R> = Arc<dyn Fn(Vec<T>) -> BoxFuture<Vec<anyhow::Result<R>>> + Send + Sync>;
type ItemFallback<T, R> = Arc<dyn Fn(&T) -> anyhow::Result<R> + Send + Sync>;

struct Pending<T, R> {
    item: T,
    reply: oneshot::Sender<anyhow::Result<R>>,
}

struct BatchState<T, R> {
    items: Vec<Pending<T, R>>,
    oldest_at: Option<Instant>,
}

impl<T, R> Default for BatchState<T, R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            oldest_at: None,
        }
    }
}

/// Config for a [`BatchProcessor`]
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush as soon as this many items are pending
    pub max_size: usize,
    /// Flush this long after the oldest pending item arrived, regardless of size
    pub max_wait: Duration,
}

/// Accumulates items and flushes them together through a batch processor
pub struct BatchProcessor<T: Clone + Send + 'static, R: Send + 'static> {
    config: BatchConfig,
    state: Arc<Mutex<BatchState<T, R>>>,
    processor: Processor<T, R>,
    item_fallback: Option<ItemFallback<T, R>>,
}

impl<T: Clone + Send + 'static, R: Send + 'static> BatchProcessor<T, R> {
    /// Build a processor. `processor` receives the full batch of items (in
    /// submission order) and must return one result per item, in the same
    /// order. `item_fallback`, if set, recovers a per-item result when the
    /// processor itself returns `Err` for the whole batch.
    pub fn new(config: BatchConfig, processor: Processor<T, R>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BatchState::default())),
            processor,
            item_fallback: None,
        }
    }

    /// Attach a per-item fallback used when the batch processor call fails outright
    pub fn with_item_fallback(mut self, fallback: ItemFallback<T, R>) -> Self {
        self.item_fallback = Some(fallback);
        self
    }

    /// Submit an item. Resolves once the batch containing it has been
    /// flushed, with this item's individual result.
    pub async fn submit(&self, item: T) -> anyhow::Result<R> {
        let (tx, rx) = oneshot::channel();
        let should_flush_now = {
            let mut guard = self.state.lock().await;
            guard.items.push(Pending { item, reply: tx });
            if guard.oldest_at.is_none() {
                guard.oldest_at = Some(Instant::now());
            }
            guard.items.len() >= self.config.max_size
        };

        if should_flush_now {
            self.flush().await;
        }

        rx.await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("batch processor dropped this item's reply channel")))
    }

    /// Force an immediate flush of whatever is currently pending, regardless
    /// of size or wait elapsed. No-op if nothing is pending.
    pub async fn flush(&self) {
        let pending = {
            let mut guard = self.state.lock().await;
            guard.oldest_at = None;
            std::mem::take(&mut guard.items)
        };

        if pending.is_empty() {
            return;
        }

        let (items, replies): (Vec<T>, Vec<oneshot::Sender<anyhow::Result<R>>>) =
            pending.into_iter().map(|p| (p.item, p.reply)).unzip();

        match (self.processor)(items.clone()).await {
            Ok(results) if results.len() == replies.len() => {
                for (reply, result) in replies.into_iter().zip(results.into_iter()) {
                    let _ = reply.send(result);
                }
            }
            Ok(results) => {
                tracing::warn!(
                    expected = replies.len(),
                    got = results.len(),
                    "batch processor returned a mismatched result count"
                );
                for reply in replies {
                    let _ = reply.send(Err(anyhow::anyhow!("batch processor returned a mismatched result count")));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch processor call failed");
                if let Some(fallback) = &self.item_fallback {
                    for (reply, item) in replies.into_iter().zip(items.iter()) {
                        let _ = reply.send(fallback(item));
                    }
                } else {
                    for reply in replies {
                        let _ = reply.send(Err(anyhow::anyhow!("batch processor call failed: {e}")));
                    }
                }
            }
        }
    }

    /// Whether the oldest pending item has been waiting at least `max_wait`
    pub async fn should_flush_on_wait(&self) -> bool {
        let guard = self.state.lock().await;
        match guard.oldest_at {
            Some(at) => at.elapsed() >= self.config.max_wait,
            None => false,
        }
    }

    /// Number of items currently pending
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Spawn a background task that calls [`BatchProcessor::flush`] whenever
    /// [`BatchProcessor::should_flush_on_wait`] becomes true, polling at the
    /// given interval.
    pub fn spawn_wait_flusher(self: &Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let processor = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if processor.should_flush_on_wait().await {
                    processor.flush().await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_flush_triggers_at_max_size() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let processor: Processor<i32, i32> = Arc::new(move |items: Vec<i32>| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { items.into_iter().map(Ok).collect() })
        });

        let batch = BatchProcessor::new(
            BatchConfig {
                max_size: 2,
                max_wait: Duration::from_secs(60),
            },
            processor,
        );

        let a = batch.submit(1);
        let b = batch.submit(2);
        let (ra, rb) = tokio::join!(a, b);

        assert_eq!(ra.unwrap(), 1);
        assert_eq!(rb.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_flush_delivers_partial_batch() {
        let processor: Processor<i32, i32> = Arc::new(|items: Vec<i32>| {
            Box::pin(async move { items.into_iter().map(|i| Ok(i * 10)).collect() })
        });

        let batch = Arc::new(BatchProcessor::new(
            BatchConfig {
                max_size: 10,
                max_wait: Duration::from_secs(60),
            },
            processor,
        ));

        let batch2 = batch.clone();
        let submit_task = tokio::spawn(async move { batch2.submit(5).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(batch.pending_count().await, 1);
        batch.flush().await;

        let result = submit_task.await.unwrap();
        assert_eq!(result.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_wholesale_processor_failure_propagates_to_every_item() {
        let processor: Processor<i32, i32> =
            Arc::new(|_items: Vec<i32>| Box::pin(async move { Err(anyhow::anyhow!("downstream unavailable")) }));

        let batch = BatchProcessor::new(
            BatchConfig {
                max_size: 2,
                max_wait: Duration::from_secs(60),
            },
            processor,
        );

        let a = batch.submit(1);
        let b = batch.submit(2);
        let (ra, rb) = tokio::join!(a, b);

        assert!(ra.is_err());
        assert!(rb.is_err());
    }

    #[tokio::test]
    async fn test_item_fallback_recovers_after_wholesale_failure() {
        let processor: Processor<i32, i32> =
            Arc::new(|_items: Vec<i32>| Box::pin(async move { Err(anyhow::anyhow!("downstream unavailable")) }));
        let fallback: ItemFallback<i32, i32> = Arc::new(|item: &i32| Ok(*item));

        let batch = BatchProcessor::new(
            BatchConfig {
                max_size: 2,
                max_wait: Duration::from_secs(60),
            },
            processor,
        )
        .with_item_fallback(fallback);

        let a = batch.submit(7);
        let b = batch.submit(8);
        let (ra, rb) = tokio::join!(a, b);

        assert_eq!(ra.unwrap(), 7);
        assert_eq!(rb.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_should_flush_on_wait_after_interval_elapses() {
        let processor: Processor<i32, i32> =
            Arc::new(|items: Vec<i32>| Box::pin(async move { items.into_iter().map(Ok).collect() }));

        let batch = BatchProcessor::new(
            BatchConfig {
                max_size: 100,
                max_wait: Duration::from_millis(20),
            },
            processor,
        );

        // nothing pending yet
        assert!(!batch.should_flush_on_wait().await);

        let _ = batch.pending_count().await;
        let handle = {
            let (tx, _rx) = oneshot::channel::<anyhow::Result<i32>>();
            let mut guard = batch.state.lock().await;
            guard.items.push(Pending { item: 1, reply: tx });
            guard.oldest_at = Some(Instant::now());
        };
        let _ = handle;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(batch.should_flush_on_wait().await);
    }
}
