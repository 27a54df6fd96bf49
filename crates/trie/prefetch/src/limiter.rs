use crossbeam_channel::{bounded, Receiver, Sender};

/// Caps the number of concurrent backend reads issued by one prefetcher.
///
/// The limiter is a counting semaphore built on a pre-filled bounded channel,
/// so that acquisition can take part in a `select!` next to a cancellation
/// channel. Clones share the same permit pool.
#[derive(Clone, Debug)]
pub struct RequestLimiter {
    free: Receiver<()>,
    release: Sender<()>,
}

impl RequestLimiter {
    /// Creates a limiter handing out up to `permits` permits at a time.
    pub fn new(permits: usize) -> Self {
        let (release, free) = bounded(permits);
        for _ in 0..permits {
            release.send(()).expect("fresh channel has capacity for every permit");
        }
        Self { free, release }
    }

    /// Blocks until a permit is free.
    pub fn acquire(&self) -> RequestPermit {
        self.free.recv().expect("limiter holds its own release sender");
        self.claim()
    }

    /// The channel free permits are handed out on. A message received from it
    /// must be wrapped with [`Self::claim`] so the permit finds its way back.
    pub(crate) fn free(&self) -> Receiver<()> {
        self.free.clone()
    }

    /// Takes ownership of a permit previously received from [`Self::free`].
    pub(crate) fn claim(&self) -> RequestPermit {
        RequestPermit { release: self.release.clone() }
    }
}

/// Permission for a single in-flight read, returned to the [`RequestLimiter`]
/// on drop.
#[derive(Debug)]
pub struct RequestPermit {
    release: Sender<()>,
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        // Permits are conserved, so the pool channel always has room; the send
        // only fails once the limiter itself is gone.
        let _ = self.release.try_send(());
    }
}
