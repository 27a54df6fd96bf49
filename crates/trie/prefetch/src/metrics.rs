use metrics::{counter, Counter};

/// Prefix under which all prefetcher metrics are published.
const TRIE_PREFETCH_METRICS_PREFIX: &str = "trie/prefetch/";

/// Counter handles for one prefetcher namespace.
///
/// Snapshots made with [`TriePrefetcher::snapshot`] share the handles of the
/// prefetcher they were copied from.
///
/// [`TriePrefetcher::snapshot`]: crate::TriePrefetcher::snapshot
#[derive(Clone, Debug)]
pub(crate) struct TriePrefetcherMetrics {
    /// A snapshot was asked for a trie it never carried.
    pub(crate) deliverymiss_copy: Counter,
    /// A trie was asked for that no prefetch was ever requested on.
    pub(crate) deliverymiss_request: Counter,
    /// A subfetcher existed but had no trie to deliver after draining.
    pub(crate) deliverymiss_wait: Counter,
    /// Distinct account keys scheduled for warming.
    pub(crate) account_load: Counter,
    /// Account keys scheduled more than once.
    pub(crate) account_dup: Counter,
    /// Warmed account keys the executor never read back.
    pub(crate) account_waste: Counter,
    /// Distinct storage keys scheduled for warming.
    pub(crate) storage_load: Counter,
    /// Storage keys scheduled more than once.
    pub(crate) storage_dup: Counter,
    /// Warmed storage keys the executor never read back.
    pub(crate) storage_waste: Counter,
}

impl TriePrefetcherMetrics {
    /// Registers the counters for the given namespace.
    pub(crate) fn new(namespace: &str) -> Self {
        let prefix = format!("{TRIE_PREFETCH_METRICS_PREFIX}{namespace}");
        Self {
            deliverymiss_copy: counter!(format!("{prefix}/deliverymiss/copy")),
            deliverymiss_request: counter!(format!("{prefix}/deliverymiss/request")),
            deliverymiss_wait: counter!(format!("{prefix}/deliverymiss/wait")),
            account_load: counter!(format!("{prefix}/account/load")),
            account_dup: counter!(format!("{prefix}/account/dup")),
            account_waste: counter!(format!("{prefix}/account/waste")),
            storage_load: counter!(format!("{prefix}/storage/load")),
            storage_dup: counter!(format!("{prefix}/storage/dup")),
            storage_waste: counter!(format!("{prefix}/storage/waste")),
        }
    }
}
