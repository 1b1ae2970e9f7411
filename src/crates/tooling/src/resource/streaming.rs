//! Chunked, backpressured streaming of large result sets
//!
//! A [`StreamingExecutor`] pages through rows produced by a fetcher in
//! `chunk_size`-sized batches, awaiting a caller-supplied `on_chunk` handler
//! between pages so a slow consumer naturally throttles the producer. An
//! optional sample cap and abort signal let a caller bound total work
//! without waiting for the fetcher to run dry.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A page of rows and whether more remain
pub struct Page<Row> {
    /// Rows returned in this page
    pub rows: Vec<Row>,
    /// Whether the fetcher has more rows after this page
    pub has_more: bool,
}

/// Fetches the next page given an opaque cursor (`None` for the first call)
pub type Fetcher<Row, Cursor> = Arc<dyn Fn(Option<Cursor>) -> BoxFuture<anyhow::Result<(Page<Row>, Option<Cursor>)>> + Send + Sync>;

/// Called once per page; the executor awaits this before fetching the next
/// page, which is how a slow consumer applies backpressure to the fetcher.
pub type ChunkHandler<Row> = Arc<dyn Fn(Vec<Row>) -> BoxFuture<()> + Send + Sync>;

/// A cooperative abort flag shared between a caller and a running stream
#[derive(Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Create a fresh, un-tripped signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the stream stop after its current page
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether abort has been requested
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a completed (or aborted) stream run
#[derive(Debug, Clone, Default)]
pub struct StreamReport {
    /// Total rows delivered to `on_chunk`
    pub row_count: usize,
    /// Number of pages fetched
    pub chunk_count: usize,
    /// Whether the run stopped early due to [`AbortSignal::abort`]
    pub cancelled: bool,
    /// True if `sample_size` capped the run before the fetcher ran dry
    pub sampled: bool,
}

/// Config for a [`StreamingExecutor`] run
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Upper bound on total rows delivered across the whole run
    pub sample_size: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { sample_size: None }
    }
}

/// Pages through a row source with backpressure and an optional sample cap
pub struct StreamingExecutor<Row, Cursor> {
    fetcher: Fetcher<Row, Cursor>,
    config: StreamConfig,
}

impl<Row: Send + 'static, Cursor: Send + 'static> StreamingExecutor<Row, Cursor> {
    /// Build an executor around `fetcher`
    pub fn new(fetcher: Fetcher<Row, Cursor>, config: StreamConfig) -> Self {
        Self { fetcher, config }
    }

    /// Run the stream, delivering each page to `on_chunk` and awaiting it
    /// before requesting the next page. Stops when the fetcher reports no
    /// more rows, the sample cap is reached, or `abort` is tripped.
    pub async fn run(&self, on_chunk: ChunkHandler<Row>, abort: &AbortSignal) -> anyhow::Result<StreamReport> {
        let mut report = StreamReport::default();
        let mut cursor: Option<Cursor> = None;

        loop {
            if abort.is_aborted() {
                report.cancelled = true;
                break;
            }

            let (page, next_cursor) = (self.fetcher)(cursor).await?;
            let mut rows = page.rows;

            if let Some(cap) = self.config.sample_size {
                let remaining = cap.saturating_sub(report.row_count);
                if rows.len() > remaining {
                    rows.truncate(remaining);
                    report.sampled = true;
                }
            }

            let delivered = rows.len();
            report.row_count += delivered;
            report.chunk_count += 1;

            on_chunk(rows).await;

            let cap_reached = self
                .config
                .sample_size
                .is_some_and(|cap| report.row_count >= cap);

            if cap_reached {
                report.sampled = report.sampled || cap_reached;
                break;
            }

            if !page.has_more {
                break;
            }

            cursor = next_cursor;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    fn paged_fetcher(total: usize, page_size: usize) -> Fetcher<usize, usize> {
        Arc::new(move |cursor: Option<usize>| {
            Box::pin(async move {
                let start = cursor.unwrap_or(0);
                let end = (start + page_size).min(total);
                let rows: Vec<usize> = (start..end).collect();
                let has_more = end < total;
                Ok((Page { rows, has_more }, Some(end)))
            })
        })
    }

    #[tokio::test]
    async fn test_pages_through_all_rows() {
        let executor = StreamingExecutor::new(paged_fetcher(10, 3), StreamConfig::default());
        let collected = Arc::new(TokioMutex::new(Vec::new()));
        let collected_clone = collected.clone();
        let handler: ChunkHandler<usize> = Arc::new(move |rows: Vec<usize>| {
            let collected = collected_clone.clone();
            Box::pin(async move {
                collected.lock().await.extend(rows);
            })
        });

        let report = executor.run(handler, &AbortSignal::new()).await.unwrap();

        assert_eq!(report.row_count, 10);
        assert_eq!(report.chunk_count, 4);
        assert!(!report.cancelled);
        assert_eq!(collected.lock().await.len(), 10);
    }

    #[tokio::test]
    async fn test_sample_size_caps_total_rows() {
        let executor = StreamingExecutor::new(
            paged_fetcher(100, 10),
            StreamConfig { sample_size: Some(25) },
        );
        let handler: ChunkHandler<usize> = Arc::new(|_rows: Vec<usize>| Box::pin(async {}));

        let report = executor.run(handler, &AbortSignal::new()).await.unwrap();

        assert_eq!(report.row_count, 25);
        assert!(report.sampled);
    }

    #[tokio::test]
    async fn test_abort_stops_before_next_page() {
        let abort = AbortSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let abort_clone = abort.clone();

        let fetcher: Fetcher<usize, usize> = Arc::new(move |cursor: Option<usize>| {
            let calls = calls_clone.clone();
            let abort = abort_clone.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 1 {
                    abort.abort();
                }
                let start = cursor.unwrap_or(0);
                Ok((
                    Page {
                        rows: vec![start],
                        has_more: true,
                    },
                    Some(start + 1),
                ))
            })
        });

        let executor = StreamingExecutor::new(fetcher, StreamConfig::default());
        let handler: ChunkHandler<usize> = Arc::new(|_rows: Vec<usize>| Box::pin(async {}));

        let report = executor.run(handler, &abort).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.chunk_count, 2);
    }

    #[tokio::test]
    async fn test_fetcher_error_propagates() {
        let fetcher: Fetcher<usize, usize> =
            Arc::new(|_cursor: Option<usize>| Box::pin(async { Err(anyhow::anyhow!("connection reset")) }));
        let executor = StreamingExecutor::new(fetcher, StreamConfig::default());
        let handler: ChunkHandler<usize> = Arc::new(|_rows: Vec<usize>| Box::pin(async {}));

        let result = executor.run(handler, &AbortSignal::new()).await;
        assert!(result.is_err());
    }
}
