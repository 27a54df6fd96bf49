use crate::{limiter::RequestLimiter, multi_trie::MultiTrie, DEFAULT_TASK_LENGTH};
use alloy_primitives::{Address, Bytes, B256};
use crossbeam_channel::{bounded, Sender};
use ember_trie_common::TrieStore;
use std::collections::HashSet;

/// Fetch engine for a single trie.
///
/// A subfetcher is spawned the first time a key is scheduled against a trie
/// root and lives until the prefetcher is closed or the warmed trie is
/// retrieved. It deduplicates the scheduled keys and owns the [`MultiTrie`]
/// performing the actual reads.
///
/// The front end (`schedule`, `wait`, `abort` and the accounting fields)
/// belongs to the prefetcher's caller thread; worker threads never touch it.
#[derive(Debug)]
pub(crate) struct Subfetcher<S: TrieStore> {
    /// Root hash of the trie being warmed.
    root: B256,
    /// `None` if opening the trie failed; every operation except the
    /// accounting degenerates into a no-op then.
    multi_trie: Option<MultiTrie<S>>,
    /// Sender half of the stop channel. Taken by [`Self::abort`]; the drop
    /// interrupts every select the router and workers block on.
    stop_tx: Option<Sender<()>>,
    /// Every key ever scheduled on this trie.
    seen: HashSet<Bytes>,
    /// Scheduled keys dropped as duplicates.
    dups: u64,
    /// Keys the executor reported as actually read.
    used: Vec<Bytes>,
}

impl<S: TrieStore> Subfetcher<S> {
    /// Creates the subfetcher and starts its fetch pipeline.
    pub(crate) fn new(
        store: S,
        state: B256,
        owner: B256,
        root: B256,
        address: Address,
        limiter: RequestLimiter,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded(0);
        let multi_trie = MultiTrie::new(store, state, owner, root, address, limiter, stop_rx);
        Self {
            root,
            multi_trie,
            stop_tx: Some(stop_tx),
            seen: HashSet::default(),
            dups: 0,
            used: Vec::new(),
        }
    }

    /// Queues a batch of keys, dropping every key this subfetcher has been
    /// asked for before.
    pub(crate) fn schedule(&mut self, keys: &[Bytes]) {
        let mut tasks = Vec::with_capacity(keys.len().min(DEFAULT_TASK_LENGTH));
        for key in keys {
            if self.seen.contains(key) {
                self.dups += 1;
                continue
            }
            self.seen.insert(key.clone());
            tasks.push(key.clone());
        }
        if let Some(multi_trie) = &self.multi_trie {
            multi_trie.enqueue(tasks);
        }
    }

    /// Returns a copy of the trie in whatever state of warming it currently
    /// is. Does not wait.
    pub(crate) fn peek(&self) -> Option<S::Trie> {
        self.multi_trie.as_ref().map(MultiTrie::copy_base)
    }

    /// Blocks until every scheduled key has been fetched or the subfetcher
    /// was aborted. Idempotent.
    pub(crate) fn wait(&mut self) {
        if let Some(multi_trie) = &mut self.multi_trie {
            multi_trie.wait();
        }
    }

    /// Interrupts fetching and blocks until every worker has exited. Safe to
    /// call repeatedly, also after [`Self::wait`].
    pub(crate) fn abort(&mut self) {
        // Without a fetch pipeline no loop was ever started.
        let Some(multi_trie) = &self.multi_trie else { return };
        self.stop_tx.take();
        multi_trie.join();
    }

    /// Records the keys the executor ended up reading, for waste accounting.
    pub(crate) fn mark_used(&mut self, used: Vec<Bytes>) {
        self.used = used;
    }

    /// Root hash of the trie this subfetcher warms.
    pub(crate) const fn root(&self) -> B256 {
        self.root
    }

    /// Effectiveness counters: distinct keys loaded, duplicate schedules, and
    /// loaded keys the executor never read back.
    pub(crate) fn effectiveness(&self) -> (u64, u64, u64) {
        let used: HashSet<&Bytes> = self.used.iter().collect();
        let wasted = self.seen.iter().filter(|key| !used.contains(key)).count();
        (self.seen.len() as u64, self.dups, wasted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{account_keys, MockTrieStore},
        MAX_CONCURRENT_READS,
    };

    fn account_subfetcher(store: &MockTrieStore, root: B256) -> Subfetcher<MockTrieStore> {
        Subfetcher::new(
            store.clone(),
            root,
            B256::ZERO,
            root,
            Address::ZERO,
            RequestLimiter::new(MAX_CONCURRENT_READS),
        )
    }

    #[test]
    fn deduplicates_scheduled_keys() {
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(1);
        let mut fetcher = account_subfetcher(&store, root);

        let a = Bytes::copy_from_slice(&[0x11; 20]);
        let b = Bytes::copy_from_slice(&[0x22; 20]);
        fetcher.schedule(&[a.clone(), a.clone(), b.clone()]);
        fetcher.schedule(&[a.clone(), b.clone()]);
        fetcher.wait();

        assert_eq!(store.reads_for(&a), 1);
        assert_eq!(store.reads_for(&b), 1);
        // Two distinct keys, three duplicate schedules, nothing marked used.
        assert_eq!(fetcher.effectiveness(), (2, 3, 2));
        fetcher.abort();
    }

    #[test]
    fn dedup_holds_for_random_key_batches() {
        use rand::{seq::SliceRandom, Rng};

        let mut rng = rand::thread_rng();
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(6);
        let mut fetcher = account_subfetcher(&store, root);

        // Schedule random batches drawn with repetition from a fixed key
        // pool; only the first occurrence of a key may reach the backend.
        let pool = account_keys(200);
        let mut scheduled = 0u64;
        for _ in 0..50 {
            let batch: Vec<Bytes> = (0..rng.gen_range(1usize..=32))
                .map(|_| pool.choose(&mut rng).expect("key pool is not empty").clone())
                .collect();
            scheduled += batch.len() as u64;
            fetcher.schedule(&batch);
        }
        fetcher.wait();

        let (loaded, dups, _) = fetcher.effectiveness();
        assert_eq!(loaded + dups, scheduled);
        assert_eq!(store.total_reads() as u64, loaded);
        for key in &pool {
            assert!(store.reads_for(key) <= 1);
        }
    }

    #[test]
    fn wait_then_peek_returns_warmed_trie() {
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(2);
        let mut fetcher = account_subfetcher(&store, root);

        let keys: Vec<Bytes> = (0..100u8).map(|i| Bytes::copy_from_slice(&[i; 20])).collect();
        fetcher.schedule(&keys);
        fetcher.wait();

        assert_eq!(store.total_reads(), 100);
        let trie = fetcher.peek().expect("trie was opened");
        assert_eq!(trie.root(), root);

        // The drain close is single-fire; repeating it must not block.
        fetcher.wait();
        fetcher.abort();
        fetcher.abort();
    }

    #[test]
    fn read_failures_do_not_poison_the_pipeline() {
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(3);
        let poisoned = Bytes::copy_from_slice(&[0xbb; 20]);
        store.fail_key(poisoned.clone());
        let mut fetcher = account_subfetcher(&store, root);

        let keys: Vec<Bytes> = vec![
            Bytes::copy_from_slice(&[0xaa; 20]),
            poisoned,
            Bytes::copy_from_slice(&[0xcc; 20]),
        ];
        fetcher.schedule(&keys);
        fetcher.wait();

        assert_eq!(store.total_reads(), 3);
        assert!(fetcher.peek().is_some());
    }

    #[test]
    fn open_failure_degenerates_but_keeps_accounting() {
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(4);
        store.fail_root(root);
        let mut fetcher = account_subfetcher(&store, root);

        let key = Bytes::copy_from_slice(&[0x11; 20]);
        fetcher.schedule(&[key.clone(), key.clone()]);
        fetcher.wait();
        assert!(fetcher.peek().is_none());
        fetcher.abort();
        fetcher.abort();

        assert_eq!(store.total_reads(), 0);
        assert_eq!(fetcher.effectiveness(), (1, 1, 1));
    }

    #[test]
    fn used_keys_reduce_waste() {
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(5);
        let mut fetcher = account_subfetcher(&store, root);

        let a = Bytes::copy_from_slice(&[0x11; 20]);
        let b = Bytes::copy_from_slice(&[0x22; 20]);
        fetcher.schedule(&[a.clone(), b.clone()]);
        fetcher.wait();
        fetcher.mark_used(vec![a]);

        assert_eq!(fetcher.effectiveness(), (2, 0, 1));
    }
}
