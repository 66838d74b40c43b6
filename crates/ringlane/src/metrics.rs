use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items accepted by `offer`.
    pub offered: u64,
    /// Items rejected because their lane was full. Monotonic.
    pub dropped: u64,
    /// Items rejected because the channel was closed.
    pub rejected_closed: u64,
    /// Items handed to the consumer.
    pub drained: u64,
    /// Non-empty drain calls.
    pub drain_batches: u64,
}

// Relaxed everywhere: these counters guard no data and nothing branches on them.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    offered: AtomicU64,
    dropped: AtomicU64,
    rejected_closed: AtomicU64,
    drained: AtomicU64,
    drain_batches: AtomicU64,
}

impl Metrics {
    #[inline]
    pub(crate) fn add_offered(&self, n: u64) {
        self.offered.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_rejected_closed(&self, n: u64) {
        self.rejected_closed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_drained(&self, n: u64) {
        self.drained.fetch_add(n, Ordering::Relaxed);
        self.drain_batches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            offered: self.offered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected_closed: self.rejected_closed.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            drain_batches: self.drain_batches.load(Ordering::Relaxed),
        }
    }
}
