//! Mock trie store implementations for testing the prefetcher.

use alloy_primitives::{Address, Bytes, B256, U256};
use ember_trie_common::{Account, Trie, TrieStore, TrieStoreError};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// An in-memory [`TrieStore`] recording every access, for asserting on the
/// prefetcher's observable behavior.
///
/// Clones share their counters, the way real store handles share a node
/// cache.
#[derive(Clone, Debug, Default)]
pub struct MockTrieStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Reads per key; account lookups are recorded under the address bytes.
    reads: Mutex<HashMap<Bytes, usize>>,
    /// Addresses storage lookups were issued for.
    storage_addresses: Mutex<HashSet<Address>>,
    account_reads: AtomicUsize,
    storage_reads: AtomicUsize,
    reads_in_flight: AtomicUsize,
    max_reads_in_flight: AtomicUsize,
    copies: AtomicUsize,
    /// Roots which fail to open.
    missing_roots: Mutex<HashSet<B256>>,
    /// Keys whose reads fail.
    failing_keys: Mutex<HashSet<Bytes>>,
    /// While set, every read blocks on the latch.
    latched: Mutex<bool>,
    latch: Condvar,
}

impl StoreInner {
    fn record_read(&self, key: &Bytes) -> Result<(), TrieStoreError> {
        let in_flight = self.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_reads_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        {
            let mut latched = self.latched.lock();
            while *latched {
                self.latch.wait(&mut latched);
            }
        }

        *self.reads.lock().entry(key.clone()).or_default() += 1;
        self.reads_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_keys.lock().contains(key) {
            return Err(TrieStoreError::Database("injected read failure".to_string()))
        }
        Ok(())
    }
}

impl MockTrieStore {
    /// Makes opening any trie with this root fail.
    pub fn fail_root(&self, root: B256) {
        self.inner.missing_roots.lock().insert(root);
    }

    /// Makes every read of this key fail.
    pub fn fail_key(&self, key: Bytes) {
        self.inner.failing_keys.lock().insert(key);
    }

    /// While latched, every read blocks; releasing the latch wakes them all.
    pub fn set_latched(&self, latched: bool) {
        *self.inner.latched.lock() = latched;
        self.inner.latch.notify_all();
    }

    /// Number of reads recorded for the given key.
    pub fn reads_for(&self, key: &Bytes) -> usize {
        self.inner.reads.lock().get(key).copied().unwrap_or_default()
    }

    /// Total number of backend reads issued so far.
    pub fn total_reads(&self) -> usize {
        self.account_reads() + self.storage_reads()
    }

    /// Number of account lookups issued so far.
    pub fn account_reads(&self) -> usize {
        self.inner.account_reads.load(Ordering::SeqCst)
    }

    /// Number of storage lookups issued so far.
    pub fn storage_reads(&self) -> usize {
        self.inner.storage_reads.load(Ordering::SeqCst)
    }

    /// Number of reads currently executing.
    pub fn reads_in_flight(&self) -> usize {
        self.inner.reads_in_flight.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently executing reads.
    pub fn max_reads_in_flight(&self) -> usize {
        self.inner.max_reads_in_flight.load(Ordering::SeqCst)
    }

    /// Number of trie handles copied off another handle.
    pub fn copy_count(&self) -> usize {
        self.inner.copies.load(Ordering::SeqCst)
    }

    /// Addresses storage lookups were issued for.
    pub fn storage_addresses(&self) -> HashSet<Address> {
        self.inner.storage_addresses.lock().clone()
    }
}

impl TrieStore for MockTrieStore {
    type Trie = MockTrie;

    fn open_trie(&self, root: B256) -> Result<MockTrie, TrieStoreError> {
        if self.inner.missing_roots.lock().contains(&root) {
            return Err(TrieStoreError::RootNotFound(root))
        }
        Ok(MockTrie { store: Arc::clone(&self.inner), root, warmed: Arc::default() })
    }

    fn open_storage_trie(
        &self,
        _state_root: B256,
        owner: B256,
        root: B256,
    ) -> Result<MockTrie, TrieStoreError> {
        if self.inner.missing_roots.lock().contains(&root) {
            return Err(TrieStoreError::StorageRootNotFound { owner, root })
        }
        Ok(MockTrie { store: Arc::clone(&self.inner), root, warmed: Arc::default() })
    }

    fn copy_trie(&self, trie: &MockTrie) -> MockTrie {
        self.inner.copies.fetch_add(1, Ordering::SeqCst);
        MockTrie {
            store: Arc::clone(&trie.store),
            root: trie.root,
            warmed: Arc::clone(&trie.warmed),
        }
    }
}

/// A [`Trie`] handle produced by [`MockTrieStore`].
#[derive(Debug)]
pub struct MockTrie {
    store: Arc<StoreInner>,
    root: B256,
    /// Stands in for the node cache: shared by every copy of this trie.
    warmed: Arc<Mutex<HashSet<Bytes>>>,
}

impl MockTrie {
    /// Root hash this trie was opened with.
    pub const fn root(&self) -> B256 {
        self.root
    }

    /// The keys resolved through this trie or any copy of it.
    pub fn warmed_keys(&self) -> HashSet<Bytes> {
        self.warmed.lock().clone()
    }
}

impl Trie for MockTrie {
    fn get_account(&mut self, address: Address) -> Result<Option<Account>, TrieStoreError> {
        let key = Bytes::copy_from_slice(address.as_slice());
        self.store.account_reads.fetch_add(1, Ordering::SeqCst);
        self.store.record_read(&key)?;
        self.warmed.lock().insert(key);
        Ok(Some(Account::default()))
    }

    fn get_storage(
        &mut self,
        address: Address,
        key: &[u8],
    ) -> Result<Option<U256>, TrieStoreError> {
        let key = Bytes::copy_from_slice(key);
        self.store.storage_reads.fetch_add(1, Ordering::SeqCst);
        self.store.storage_addresses.lock().insert(address);
        self.store.record_read(&key)?;
        self.warmed.lock().insert(key);
        Ok(Some(U256::ZERO))
    }
}

/// Generates `n` distinct address-wide keys, dispatched as account lookups.
pub fn account_keys(n: usize) -> Vec<Bytes> {
    (0..n)
        .map(|i| {
            let mut key = [0u8; 20];
            key[12..].copy_from_slice(&(i as u64).to_be_bytes());
            Bytes::copy_from_slice(&key)
        })
        .collect()
}

/// Generates `n` distinct hash-wide keys, dispatched as storage lookups.
pub fn storage_keys(n: usize) -> Vec<Bytes> {
    (0..n)
        .map(|i| {
            let mut key = [0u8; 32];
            key[24..].copy_from_slice(&(i as u64).to_be_bytes());
            Bytes::copy_from_slice(&key)
        })
        .collect()
}

/// Polls `predicate` until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true
        }
        thread::sleep(Duration::from_millis(1));
    }
    predicate()
}
