use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::StreamError;

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counting gate over records submitted but not yet resolved.
///
/// Capacity is handed out as [`InflightPermit`]s. A permit lives in the
/// pending table next to its record and is dropped exactly once, when the
/// record becomes durable or fails; dropping it is what frees the slot.
pub struct InflightTracker {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl InflightTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait for a free slot. Fails with `StreamClosed` once the tracker is closed.
    pub async fn acquire(&self) -> Result<InflightPermit, StreamError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StreamError::StreamClosed)?;
        Ok(self.register(permit))
    }

    /// Take a slot without waiting.
    pub fn try_acquire(&self) -> Result<InflightPermit, StreamError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(self.register(permit)),
            Err(TryAcquireError::NoPermits) => Err(StreamError::Backpressure {
                max_inflight: self.capacity,
            }),
            Err(TryAcquireError::Closed) => Err(StreamError::StreamClosed),
        }
    }

    fn register(&self, permit: OwnedSemaphorePermit) -> InflightPermit {
        let now = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        InflightPermit {
            _permit: permit,
            counters: self.counters.clone(),
        }
    }

    /// Wake every waiter with `StreamClosed` and refuse new acquisitions.
    /// Permits already handed out stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed so far.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One slot of in-flight capacity.
pub struct InflightPermit {
    // Returned to the semaphore after `Drop::drop` has decremented the
    // counter, so the count never exceeds capacity.
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for InflightPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InflightPermit")
    }
}
