use crate::invariants::{
    debug_assert_bounded_count, debug_assert_filled_stamp, debug_assert_monotonic,
};
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// SLOT STAMP PROTOCOL
// =============================================================================
//
// A lane is a bounded multi-producer single-consumer ring. Producers on many
// threads may share a lane, so a slot cannot be published by a single tail
// store as in an SPSC ring. Each slot carries its own stamp instead.
//
// ## Positions
//
// `tail` and `head` are unbounded u64 positions. The slot for position `p` is
// `p % capacity`. Wrap of u64 is not a practical concern.
//
// ## Stamps
//
// For position `p` the slot stamp moves through:
//
//   2p          free, position p may be claimed
//   2p + 1      filled, the consumer may read position p
//   2(p + cap)  free again, for position p + cap on the next lap
//
// The doubling keeps "filled at p" and "free for p + cap" distinct even when
// capacity is 1.
//
// ## Producer (try_push)
// 1. Load `tail` (Relaxed) and the slot stamp (Acquire, pairs with consumer release)
// 2. stamp == 2*tail: CAS `tail` to claim the position, write, store 2*tail+1 (Release)
// 3. stamp <  2*tail: the previous lap was not consumed, the lane is full
// 4. stamp >  2*tail: another producer got there first, reload `tail` and retry
//
// A failed CAS is retried with a short spin. No producer ever parks or sleeps.
//
// ## Consumer (pop)
// 1. Load `head` (Relaxed, single writer) and the slot stamp (Acquire, pairs
//    with the producer's release)
// 2. stamp != 2*head+1: nothing readable (empty, or claimed and not yet written)
// 3. Read the value, advance `head`, store 2*(head+cap) (Release)
//
// A claimed-but-unwritten slot stops the consumer at that position, so order
// within a lane stays FIFO.
//
// =============================================================================

struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// One fixed-capacity lane.
///
/// Any number of producers, exactly one consumer (enforced by
/// [`Consumer`](crate::Consumer)).
pub(crate) struct Lane<T> {
    /// Next position producers claim
    tail: CachePadded<AtomicU64>,
    /// Next position the consumer reads
    head: CachePadded<AtomicU64>,
    slots: Box<[Slot<T>]>,
    capacity: usize,
}

// Safety: slots are handed between threads only through the stamp protocol
// above, which gives each position exactly one writer then one reader.
unsafe impl<T: Send> Send for Lane<T> {}
unsafe impl<T: Send> Sync for Lane<T> {}

impl<T> Lane<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                stamp: AtomicU64::new(2 * i as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            slots,
            capacity,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos % self.capacity as u64) as usize]
    }

    /// Approximate number of items (claimed slots count as present).
    #[inline]
    pub(crate) fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        (tail.saturating_sub(head) as usize).min(self.capacity)
    }

    /// Single non-blocking insert attempt. Hands the item back when full.
    pub(crate) fn try_push(&self, item: T) -> Result<(), T> {
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(tail);
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == 2 * tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // INV-LANE-01: the acquire on the stamp makes the
                        // consumer's head advance for the previous lap visible
                        debug_assert_bounded_count!(
                            (tail + 1).saturating_sub(self.head.load(Ordering::Relaxed)),
                            self.capacity
                        );

                        // SAFETY: the CAS made this thread the only owner of
                        // position `tail`; the consumer will not touch the slot
                        // until it observes the filled stamp stored below.
                        unsafe {
                            (*slot.value.get()).write(item);
                        }
                        slot.stamp.store(2 * tail + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        tail = current;
                        backoff.spin();
                    }
                }
            } else if stamp < 2 * tail {
                return Err(item);
            } else {
                backoff.spin();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the oldest item. Must only be called by the lane's single consumer.
    pub(crate) fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = self.slot(head);
        let stamp = slot.stamp.load(Ordering::Acquire);

        if stamp != 2 * head + 1 {
            return None;
        }

        // INV-LANE-03: the filled stamp is the only readable state
        debug_assert_filled_stamp!(stamp, head);

        // SAFETY: the filled stamp was stored with Release after the producer
        // wrote the value; our Acquire load synchronizes with it. Only the
        // single consumer reads slots, and the slot is not reusable until the
        // free stamp below is published.
        let item = unsafe { (*slot.value.get()).assume_init_read() };

        let new_head = head + 1;
        // INV-LANE-02: head only increases
        debug_assert_monotonic!("head", head, new_head);
        self.head.store(new_head, Ordering::Relaxed);
        slot.stamp
            .store(2 * (head + self.capacity as u64), Ordering::Release);

        Some(item)
    }
}

impl<T> Drop for Lane<T> {
    fn drop(&mut self) {
        // Exclusive access: every claimed slot has been written by now.
        while self.pop().is_some() {}
    }
}
