use crate::{
    limiter::RequestLimiter, SUBFETCHER_MAX_CONCURRENCY, TARGET_TASKS_PER_WORKER,
    TASK_CHUNK_QUEUE_DEPTH,
};
use alloy_primitives::{Address, Bytes, B256};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use ember_trie_common::{Trie, TrieStore};
use parking_lot::Mutex;
use std::{sync::Arc, thread};
use tracing::{error, warn};

/// Read parallelism for a single trie.
///
/// A router thread consumes scheduled key chunks in FIFO order, grows the
/// worker pool whenever the backlog per worker exceeds
/// [`TARGET_TASKS_PER_WORKER`] and republishes the chunk's keys for the
/// workers to race on. Every worker descends through its own copy of the base
/// trie; all copies share the store's node cache, so any worker warming a path
/// warms it for the others and for the copies later handed out by
/// [`Self::copy_base`].
#[derive(Debug)]
pub(crate) struct MultiTrie<S: TrieStore> {
    store: S,
    /// The trie as opened at construction. Reserved for [`Self::copy_base`];
    /// workers never touch it.
    base: Arc<Mutex<S::Trie>>,
    /// Sender half of the chunk queue. Taken on the drain path; the drop is
    /// the single-fire close that lets the pipeline run dry.
    chunk_tx: Option<Sender<Vec<Bytes>>>,
    /// Disconnects once the router and every worker have exited.
    term: Receiver<()>,
}

impl<S: TrieStore> MultiTrie<S> {
    /// Opens the account trie at `root`, or the storage trie of `owner` when
    /// `owner` is nonzero, and starts the router and the primary worker.
    ///
    /// Returns `None` if the trie cannot be opened; the subfetcher degenerates
    /// into a no-op in that case.
    pub(crate) fn new(
        store: S,
        state: B256,
        owner: B256,
        root: B256,
        address: Address,
        limiter: RequestLimiter,
        stop: Receiver<()>,
    ) -> Option<Self> {
        let opened = if owner.is_zero() {
            store.open_trie(root)
        } else {
            store.open_storage_trie(state, owner, root)
        };
        let base = match opened {
            Ok(base) => base,
            Err(err) => {
                warn!(target: "trie::prefetch", %root, %err, "Failed opening trie for prefetching");
                return None
            }
        };

        let primary = store.copy_trie(&base);
        let base = Arc::new(Mutex::new(base));

        let (chunk_tx, chunk_rx) = bounded(TASK_CHUNK_QUEUE_DEPTH);
        let (task_tx, task_rx) = bounded(0);
        let (term_tx, term_rx) = bounded::<()>(0);

        let mut router = Router {
            shared: WorkerShared { address, root, stop, tasks: task_rx, limiter },
            store: store.clone(),
            base: Arc::clone(&base),
            chunks: chunk_rx,
            task_tx,
            term: term_tx,
            workers: 0,
        };
        router.spawn_worker(primary);
        spawn_thread("trie-prefetch-router".to_string(), move || router.run());

        Some(Self { store, base, chunk_tx: Some(chunk_tx), term: term_rx })
    }

    /// Returns an independent copy of the base trie, backed by whatever part
    /// of the node cache the workers have warmed so far.
    pub(crate) fn copy_base(&self) -> S::Trie {
        self.store.copy_trie(&self.base.lock())
    }

    /// Queues a batch of keys for fetching. Blocks only if the chunk queue is
    /// saturated.
    pub(crate) fn enqueue(&self, tasks: Vec<Bytes>) {
        if tasks.is_empty() {
            return
        }
        if let Some(chunk_tx) = &self.chunk_tx {
            // Fails only once the router is gone; nothing left to warm then.
            let _ = chunk_tx.send(tasks);
        }
    }

    /// Closes the pipeline and blocks until the queues have run dry and every
    /// worker has exited. Idempotent.
    pub(crate) fn wait(&mut self) {
        self.chunk_tx.take();
        let _ = self.term.recv();
    }

    /// Blocks until the router and every worker have exited. Unlike
    /// [`Self::wait`] this leaves the queues open; it is the stop path's half
    /// of termination, with the interrupt delivered through the subfetcher's
    /// stop channel.
    pub(crate) fn join(&self) {
        let _ = self.term.recv();
    }
}

/// State shared by the router and every worker of one [`MultiTrie`].
#[derive(Clone)]
struct WorkerShared {
    /// The account owning the trie, for dispatching storage lookups.
    address: Address,
    /// Root hash of the trie being warmed, for log context.
    root: B256,
    /// Disconnects when the subfetcher is aborted.
    stop: Receiver<()>,
    /// Rendezvous queue of individual keys, raced on by all workers.
    tasks: Receiver<Bytes>,
    limiter: RequestLimiter,
}

/// Consumes scheduled chunks, scales the worker pool and republishes the
/// chunk's keys onto the task queue.
struct Router<S: TrieStore> {
    shared: WorkerShared,
    store: S,
    base: Arc<Mutex<S::Trie>>,
    chunks: Receiver<Vec<Bytes>>,
    task_tx: Sender<Bytes>,
    /// Held by the router and every worker, never sent on; the subfetcher
    /// observes termination through its disconnect.
    term: Sender<()>,
    workers: usize,
}

impl<S: TrieStore> Router<S> {
    fn run(mut self) {
        let stop = self.shared.stop.clone();
        let chunks = self.chunks.clone();
        let task_tx = self.task_tx.clone();
        loop {
            let chunk = select! {
                recv(stop) -> _ => return,
                recv(chunks) -> chunk => match chunk {
                    Ok(chunk) => chunk,
                    // The drain close fired and the backlog is exhausted.
                    Err(_) => return,
                },
            };
            // Not done on the scheduling side because spawning may block on a
            // trie copy.
            self.scale_up(chunk.len());
            for key in chunk {
                select! {
                    recv(stop) -> _ => return,
                    send(task_tx, key) -> res => if res.is_err() { return },
                }
            }
        }
    }

    /// Spawns workers until the backlog settles around
    /// [`TARGET_TASKS_PER_WORKER`] keys per worker, within the
    /// [`SUBFETCHER_MAX_CONCURRENCY`] bound. Workers are never retired; the
    /// pool only lives for a single block.
    fn scale_up(&mut self, tasks: usize) {
        for _ in 0..extra_workers(tasks, self.workers) {
            if self.workers + 1 > SUBFETCHER_MAX_CONCURRENCY {
                break
            }
            let copy = self.store.copy_trie(&self.base.lock());
            self.spawn_worker(copy);
        }
    }

    /// Starts one worker bound to the given trie handle.
    fn spawn_worker(&mut self, trie: S::Trie) {
        self.workers += 1;
        let worker = Worker { shared: self.shared.clone(), trie, _term: self.term.clone() };
        let name = format!("trie-prefetch-worker-{}", self.workers);
        if !spawn_thread(name, move || worker.run()) {
            self.workers -= 1;
        }
    }
}

/// How many workers a chunk of `tasks` keys asks for on top of the `workers`
/// already running.
fn extra_workers(tasks: usize, workers: usize) -> usize {
    let workers = workers.max(1);
    let tasks_per_worker = tasks / workers;
    if tasks_per_worker <= TARGET_TASKS_PER_WORKER {
        return 0
    }
    (tasks_per_worker - TARGET_TASKS_PER_WORKER) * workers / TARGET_TASKS_PER_WORKER
}

fn spawn_thread(name: String, f: impl FnOnce() + Send + 'static) -> bool {
    match thread::Builder::new().name(name).spawn(f) {
        Ok(_) => true,
        Err(err) => {
            error!(target: "trie::prefetch", %err, "Failed spawning trie prefetch thread");
            false
        }
    }
}

/// A single fetch worker bound to its own copy of the trie.
struct Worker<T: Trie> {
    shared: WorkerShared,
    trie: T,
    /// Dropped on exit; the last drop disconnects the subfetcher's `term`.
    _term: Sender<()>,
}

impl<T: Trie> Worker<T> {
    fn run(mut self) {
        let stop = self.shared.stop.clone();
        let tasks = self.shared.tasks.clone();
        let free_permits = self.shared.limiter.free();
        loop {
            let key = select! {
                recv(stop) -> _ => return,
                recv(tasks) -> key => match key {
                    Ok(key) => key,
                    // Queue closed and run dry.
                    Err(_) => return,
                },
            };
            // One permit per read keeps the global cap honest; it rides along
            // until the fetch returns.
            let _permit = select! {
                recv(stop) -> _ => return,
                recv(free_permits) -> permit => match permit {
                    Ok(()) => self.shared.limiter.claim(),
                    Err(_) => return,
                },
            };
            self.fetch(&key);
        }
    }

    /// Fetches a single entry, dispatching on the key width: address-wide
    /// keys are account lookups, anything else is a storage slot.
    fn fetch(&mut self, key: &Bytes) {
        let result = if key.len() == Address::len_bytes() {
            self.trie.get_account(Address::from_slice(key)).map(drop)
        } else {
            self.trie.get_storage(self.shared.address, key).map(drop)
        };
        if let Err(err) = result {
            error!(target: "trie::prefetch", root = %self.shared.root, %err, "Failed prefetching trie entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{account_keys, storage_keys, wait_until, MockTrieStore},
        MAX_CONCURRENT_READS,
    };
    use std::time::Duration;

    fn new_multi_trie(
        store: &MockTrieStore,
        owner: B256,
        root: B256,
        address: Address,
        stop: Receiver<()>,
    ) -> Option<MultiTrie<MockTrieStore>> {
        MultiTrie::new(
            store.clone(),
            B256::ZERO,
            owner,
            root,
            address,
            RequestLimiter::new(MAX_CONCURRENT_READS),
            stop,
        )
    }

    #[test]
    fn scale_up_heuristic() {
        // Backlog at or below the target spawns nothing.
        assert_eq!(extra_workers(0, 1), 0);
        assert_eq!(extra_workers(8, 1), 0);
        assert_eq!(extra_workers(9, 1), 0);
        assert_eq!(extra_workers(32, 4), 0);

        assert_eq!(extra_workers(16, 1), 1);
        assert_eq!(extra_workers(64, 1), 7);
        assert_eq!(extra_workers(80, 2), 8);
        assert_eq!(extra_workers(10_000, 1), 1249);

        // A failed primary spawn must not divide by zero.
        assert_eq!(extra_workers(16, 0), 1);
    }

    #[test]
    fn drains_every_key_and_caps_the_pool() {
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(1);
        let (_stop_tx, stop_rx) = bounded::<()>(0);
        let mut multi_trie =
            new_multi_trie(&store, B256::ZERO, root, Address::ZERO, stop_rx).expect("trie opens");

        multi_trie.enqueue(account_keys(10_000));
        multi_trie.wait();

        assert_eq!(store.total_reads(), 10_000);
        // One copy for the primary worker and one per scaled-up secondary.
        assert_eq!(store.copy_count(), SUBFETCHER_MAX_CONCURRENCY);
    }

    #[test]
    fn storage_keys_dispatch_with_owner_address() {
        let store = MockTrieStore::default();
        let owner = B256::repeat_byte(0xaa);
        let root = B256::repeat_byte(2);
        let address = Address::repeat_byte(0x42);
        let (_stop_tx, stop_rx) = bounded::<()>(0);
        let mut multi_trie =
            new_multi_trie(&store, owner, root, address, stop_rx).expect("trie opens");

        multi_trie.enqueue(storage_keys(64));
        multi_trie.wait();

        assert_eq!(store.storage_reads(), 64);
        assert_eq!(store.account_reads(), 0);
        assert!(store.storage_addresses().contains(&address));
    }

    #[test]
    fn stop_interrupts_the_pipeline() {
        let store = MockTrieStore::default();
        store.set_latched(true);
        let root = B256::repeat_byte(3);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let multi_trie =
            new_multi_trie(&store, B256::ZERO, root, Address::ZERO, stop_rx).expect("trie opens");

        multi_trie.enqueue(account_keys(1_000));
        assert!(wait_until(Duration::from_secs(5), || store.reads_in_flight() > 0));

        drop(stop_tx);
        store.set_latched(false);
        multi_trie.join();

        assert!(store.total_reads() < 1_000);
    }

    #[test]
    fn wait_after_stop_returns_immediately() {
        let store = MockTrieStore::default();
        let root = B256::repeat_byte(4);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut multi_trie =
            new_multi_trie(&store, B256::ZERO, root, Address::ZERO, stop_rx).expect("trie opens");

        drop(stop_tx);
        multi_trie.join();
        multi_trie.wait();
        multi_trie.wait();
    }
}
