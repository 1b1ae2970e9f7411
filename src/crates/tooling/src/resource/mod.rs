//! Pooled, batched, and streamed access to external resources
//!
//! Three pieces that compose with the middleware stack rather than replace
//! it: a bounded [`pool::Pool`] for expensive handles (database connections,
//! HTTP clients), a [`batch::BatchProcessor`] for coalescing many small
//! calls into fewer round trips, and a [`streaming::StreamingExecutor`] for
//! paging through result sets too large to hold in memory at once. Wrap any
//! of the three in `middleware::circuit_breaker` or `middleware::bulkhead`
//! the same way a plain tool call would be wrapped.

pub mod batch;
pub mod pool;
pub mod streaming;

pub use batch::{BatchConfig, BatchProcessor};
pub use pool::{Handle, Pool, PoolConfig, PoolError, PoolMetrics};
pub use streaming::{AbortSignal, ChunkHandler, Fetcher, Page, StreamConfig, StreamReport, StreamingExecutor};
