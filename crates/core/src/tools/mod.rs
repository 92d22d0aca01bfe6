//! # Capability Adapters
//!
//! - `retrieval` - the `Retriever` capability consumed by question executors
//! - `searxng` - SearXNG-backed retriever
//! - `retry` - per-call timeout and exponential backoff shared by all capability calls

pub mod retrieval;
pub mod retry;
pub mod searxng;

pub use retrieval::{Retrieval, Retriever};
pub use retry::{with_retry, RetryPolicy, Retryable};
pub use searxng::SearxngRetriever;
