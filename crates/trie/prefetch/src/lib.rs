//! Warms the state trie node cache ahead of block execution.
//!
//! Before a block is executed, [`TriePrefetcher::prefetch`] is fed the account
//! addresses and storage slots its transactions are expected to touch. Worker
//! threads then walk the relevant tries concurrently, so that the intermediate
//! nodes are resident in the store's node cache by the time the executor
//! performs its own, sequential descents.
//!
//! Prefetching is purely advisory: it never writes, fetched values are
//! discarded, and aborting it at any point leaves the executor correct, just
//! colder.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod limiter;
pub use limiter::{RequestLimiter, RequestPermit};

#[cfg(feature = "metrics")]
mod metrics;

mod multi_trie;

mod prefetcher;
pub use prefetcher::TriePrefetcher;

mod subfetcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Soft target of queued keys per worker. A chunk pushing the backlog above
/// this ratio makes the subfetcher spawn additional workers.
pub const TARGET_TASKS_PER_WORKER: usize = 8;

/// Cap on concurrent backend reads across all subfetchers of one prefetcher.
pub const MAX_CONCURRENT_READS: usize = 32;

/// Cap on the number of workers a single subfetcher may run. Every worker
/// holds its own copy of the trie, so this also bounds per-trie memory.
pub const SUBFETCHER_MAX_CONCURRENCY: usize = 16;

/// Capacity hint for a batch of scheduled keys.
pub const DEFAULT_TASK_LENGTH: usize = 32;

/// Depth of the per-subfetcher queue of scheduled key batches.
pub const TASK_CHUNK_QUEUE_DEPTH: usize = 1024;
