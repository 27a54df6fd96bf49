#[cfg(feature = "metrics")]
use crate::metrics::TriePrefetcherMetrics;
use crate::{limiter::RequestLimiter, subfetcher::Subfetcher, MAX_CONCURRENT_READS};
use alloy_primitives::{Address, Bytes, B256};
use ember_trie_common::{TrieId, TrieStore};
use std::collections::HashMap;

/// Warms the node cache of the tries an upcoming block is going to touch.
///
/// The prefetcher receives batches of account addresses and storage slots
/// ahead of execution and fans them out to one [`Subfetcher`] per trie. The
/// goal is to get as much useful content into the store's caches as possible
/// before the executor performs its own descents.
///
/// The API is single-producer: exactly one caller thread drives
/// [`Self::prefetch`], [`Self::trie`] and [`Self::used`]. Only the fetch
/// pipelines below run in parallel.
#[derive(Debug)]
pub struct TriePrefetcher<S: TrieStore> {
    store: S,
    /// Root of the account trie. Subfetchers on any other root warm storage
    /// tries, which matters only for the effectiveness split.
    root: B256,
    mode: Mode<S>,
    #[cfg(feature = "metrics")]
    metrics: TriePrefetcherMetrics,
}

/// An active prefetcher runs subfetchers; a snapshot made with
/// [`TriePrefetcher::snapshot`] merely carries copies of whatever they had
/// warmed by the time the snapshot was taken.
#[derive(Debug)]
enum Mode<S: TrieStore> {
    /// Live prefetcher with one subfetcher per trie.
    Active {
        fetchers: HashMap<TrieId, Subfetcher<S>>,
        limiter: RequestLimiter,
    },
    /// Passive copy; scheduling on it is a no-op.
    Inactive {
        fetches: HashMap<TrieId, S::Trie>,
    },
}

impl<S: TrieStore> TriePrefetcher<S> {
    /// Creates an active prefetcher for the state identified by `root`,
    /// publishing metrics under the given namespace.
    pub fn new(store: S, root: B256, #[cfg(feature = "metrics")] namespace: &str) -> Self {
        Self {
            store,
            root,
            mode: Mode::Active {
                fetchers: HashMap::default(),
                limiter: RequestLimiter::new(MAX_CONCURRENT_READS),
            },
            #[cfg(feature = "metrics")]
            metrics: TriePrefetcherMetrics::new(namespace),
        }
    }

    /// Schedules a batch of trie keys for warming.
    ///
    /// The first batch for a given `(owner, root)` spawns the subfetcher and
    /// fixes the account `address` its storage lookups are issued with. On a
    /// snapshot this is a no-op.
    pub fn prefetch(&mut self, owner: B256, root: B256, address: Address, keys: &[Bytes]) {
        let Mode::Active { fetchers, limiter } = &mut self.mode else { return };
        let fetcher = fetchers.entry(TrieId::new(owner, root)).or_insert_with(|| {
            Subfetcher::new(self.store.clone(), self.root, owner, root, address, limiter.clone())
        });
        fetcher.schedule(keys);
    }

    /// Returns the trie matching `(owner, root)`, or `None` if the prefetcher
    /// does not have it.
    ///
    /// On an active prefetcher this waits for the subfetcher to drain first.
    /// The returned trie is an independent copy, still backed by the warmed
    /// node cache, so the caller may use it freely. Callers must fall back to
    /// opening the trie themselves on `None`.
    pub fn trie(&mut self, owner: B256, root: B256) -> Option<S::Trie> {
        let id = TrieId::new(owner, root);
        match &mut self.mode {
            Mode::Inactive { fetches } => match fetches.get(&id) {
                Some(trie) => Some(self.store.copy_trie(trie)),
                None => {
                    #[cfg(feature = "metrics")]
                    self.metrics.deliverymiss_copy.increment(1);
                    None
                }
            },
            Mode::Active { fetchers, .. } => {
                let Some(fetcher) = fetchers.get_mut(&id) else {
                    #[cfg(feature = "metrics")]
                    self.metrics.deliverymiss_request.increment(1);
                    return None
                };
                fetcher.wait();

                let trie = fetcher.peek();
                #[cfg(feature = "metrics")]
                if trie.is_none() {
                    self.metrics.deliverymiss_wait.increment(1);
                }
                trie
            }
        }
    }

    /// Records which of the scheduled keys the executor actually read, so the
    /// effectiveness statistics can tell useful warming from wasted warming.
    /// Unknown ids are ignored.
    pub fn used(&mut self, owner: B256, root: B256, used: Vec<Bytes>) {
        if let Mode::Active { fetchers, .. } = &mut self.mode {
            if let Some(fetcher) = fetchers.get_mut(&TrieId::new(owner, root)) {
                fetcher.mark_used(used);
            }
        }
    }

    /// Creates a deep-but-inactive copy of this prefetcher.
    ///
    /// Trie data already warmed is carried over in whatever partial state it
    /// is in, but no workers run on the copy and scheduling on it is a no-op.
    /// This serves speculative execution over a state that the live
    /// prefetcher keeps warming for the main executor. Metric handles are
    /// shared with the original.
    pub fn snapshot(&self) -> Self {
        let fetches = match &self.mode {
            Mode::Inactive { fetches } => fetches
                .iter()
                .map(|(id, trie)| (*id, self.store.copy_trie(trie)))
                .collect(),
            Mode::Active { fetchers, .. } => fetchers
                .iter()
                .filter_map(|(id, fetcher)| Some((*id, fetcher.peek()?)))
                .collect(),
        };
        Self {
            store: self.store.clone(),
            root: self.root,
            mode: Mode::Inactive { fetches },
            #[cfg(feature = "metrics")]
            metrics: self.metrics.clone(),
        }
    }

    /// Aborts every subfetcher and reports the effectiveness statistics.
    ///
    /// Returns only once no worker is running anymore. Consumes the
    /// prefetcher; per-block lifecycles create a fresh one for the next
    /// block.
    pub fn close(self) {
        let Mode::Active { fetchers, .. } = self.mode else { return };
        for (_, mut fetcher) in fetchers {
            fetcher.abort();

            #[cfg(feature = "metrics")]
            {
                let (loaded, dups, wasted) = fetcher.effectiveness();
                if fetcher.root() == self.root {
                    self.metrics.account_load.increment(loaded);
                    self.metrics.account_dup.increment(dups);
                    self.metrics.account_waste.increment(wasted);
                } else {
                    self.metrics.storage_load.increment(loaded);
                    self.metrics.storage_dup.increment(dups);
                    self.metrics.storage_waste.increment(wasted);
                }
            }
        }
    }
}
