use crate::invariants::debug_assert_single_consumer;
use crate::lane::Lane;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::{Config, ConfigError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Error types for channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Another `Consumer` handle is still alive.
    #[error("consumer already taken")]
    ConsumerTaken,
}

/// What happened to an offered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    /// The lane was full; the item was dropped and counted.
    Full,
    /// The channel was closed; the item was rejected.
    Closed,
}

impl OfferOutcome {
    #[inline]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

static NEXT_LANE_HINT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    // Threads are spread over lanes round-robin on first use.
    static LANE_HINT: usize = NEXT_LANE_HINT.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn lane_hint() -> usize {
    LANE_HINT.with(|hint| *hint)
}

/// Multi-lane, fixed-capacity, drop-on-full channel.
///
/// Producers never wait: an offer into a full lane is dropped and counted.
/// Each producing thread sticks to one lane, which keeps unrelated threads off
/// each other's cache lines. A single [`Consumer`] drains all lanes.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

struct ChannelInner<T> {
    lanes: Box<[Lane<T>]>,
    closed: AtomicBool,
    consumer_taken: AtomicBool,
    config: Config,
    metrics: Metrics,
}

impl<T> Channel<T> {
    /// Creates a new channel. Fails on a zero lane count or zero lane capacity.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let lanes = (0..config.lanes)
            .map(|_| Lane::new(config.lane_capacity))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            inner: Arc::new(ChannelInner {
                lanes,
                closed: AtomicBool::new(false),
                consumer_taken: AtomicBool::new(false),
                config,
                metrics: Metrics::default(),
            }),
        })
    }

    /// Offer an item into the calling thread's lane.
    ///
    /// Returns `false` if the lane is full (the item is dropped and the drop
    /// counter incremented) or the channel is closed. Never blocks.
    #[inline]
    pub fn offer(&self, item: T) -> bool {
        self.try_offer_to(lane_hint(), item).is_accepted()
    }

    /// Offer an item into a specific lane (`lane` is taken modulo the lane count).
    #[inline]
    pub fn offer_to(&self, lane: usize, item: T) -> bool {
        self.try_offer_to(lane, item).is_accepted()
    }

    /// Like [`Channel::offer`], but tells a full lane apart from a closed channel.
    #[inline]
    pub fn try_offer(&self, item: T) -> OfferOutcome {
        self.try_offer_to(lane_hint(), item)
    }

    /// Like [`Channel::offer_to`], but tells a full lane apart from a closed channel.
    pub fn try_offer_to(&self, lane: usize, item: T) -> OfferOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            self.inner.metrics.add_rejected_closed(1);
            return OfferOutcome::Closed;
        }

        let lane = &self.inner.lanes[lane % self.inner.lanes.len()];
        match lane.try_push(item) {
            Ok(()) => {
                if self.inner.config.enable_metrics {
                    self.inner.metrics.add_offered(1);
                }
                OfferOutcome::Accepted
            }
            Err(_dropped) => {
                self.inner.metrics.add_dropped(1);
                OfferOutcome::Full
            }
        }
    }

    /// Take the single consumer handle.
    ///
    /// Fails while another handle is alive. Dropping the handle allows it to be
    /// taken again.
    pub fn consumer(&self) -> Result<Consumer<T>, ChannelError> {
        if self
            .inner
            .consumer_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ChannelError::ConsumerTaken);
        }

        Ok(Consumer {
            inner: Arc::clone(&self.inner),
            cursor: 0,
        })
    }

    /// Number of items dropped on full lanes since creation.
    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.inner.metrics.dropped()
    }

    /// Approximate number of buffered items across all lanes.
    pub fn len(&self) -> usize {
        self.inner.lanes.iter().map(Lane::len).sum()
    }

    /// Returns true if no lane holds an item.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate number of buffered items in one lane.
    pub fn lane_len(&self, lane: usize) -> usize {
        self.inner.lanes[lane % self.inner.lanes.len()].len()
    }

    /// Number of lanes.
    #[inline]
    pub fn lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Slots per lane.
    #[inline]
    pub fn lane_capacity(&self) -> usize {
        self.inner.lanes[0].capacity()
    }

    /// Returns the channel configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Counter snapshot. `dropped` is always maintained; the other counters
    /// only when `enable_metrics` is set.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Close the channel; later offers are rejected. Buffered items stay
    /// drainable.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Returns true if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("dropped", &self.dropped_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The single draining handle of a [`Channel`].
///
/// Not `Clone`: two consumers popping the same lane would break the lane's
/// single-reader protocol.
pub struct Consumer<T> {
    inner: Arc<ChannelInner<T>>,
    /// Lane the next drain starts from, rotated so no lane is starved
    cursor: usize,
}

impl<T> Consumer<T> {
    /// Drain up to `max_batch` items, visiting lanes round-robin.
    pub fn drain(&mut self, max_batch: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(max_batch.min(self.inner.config.total_capacity()));
        self.drain_into(max_batch, |item| batch.push(item));
        batch
    }

    /// Drain up to `max_batch` items, transferring ownership to `handler`.
    ///
    /// Within a lane items arrive in offer order; there is no ordering across
    /// lanes.
    pub fn drain_into<F>(&mut self, max_batch: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let lanes = &self.inner.lanes;
        let mut total = 0;

        for step in 0..lanes.len() {
            if total >= max_batch {
                break;
            }
            let lane = &lanes[(self.cursor + step) % lanes.len()];
            while total < max_batch {
                match lane.pop() {
                    Some(item) => {
                        handler(item);
                        total += 1;
                    }
                    None => break,
                }
            }
        }

        self.cursor = (self.cursor + 1) % lanes.len();

        if total > 0 && self.inner.config.enable_metrics {
            self.inner.metrics.add_drained(total as u64);
        }

        total
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        let was_taken = self.inner.consumer_taken.swap(false, Ordering::AcqRel);
        // INV-CH-01: exactly one live consumer
        debug_assert_single_consumer!(was_taken);
    }
}
