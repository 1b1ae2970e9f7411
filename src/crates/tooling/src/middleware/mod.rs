//! Composable resilience middleware for guarding node and tool calls
//!
//! Each submodule wraps an async operation with a single concern — retrying,
//! timing out, circuit-breaking, limiting concurrency, or deduplicating calls
//! in flight. [`compose`] chains several of them into one guarded call.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod compose;
pub mod dedup;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError, Priority};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use compose::{compose, Middleware};
pub use dedup::{Deduplicator, DeduplicatorConfig};
