//! Loom-based concurrency tests for the slot stamp protocol.
//!
//! Run with: `cargo test -p ringlane --features loom --test loom_tests --release`
//!
//! Loom explores thread interleavings exhaustively, so the protocol is modelled
//! here with loom's atomics and a tiny capacity to keep the state space small.

#![cfg(feature = "loom")]

use loom::cell::UnsafeCell;
use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;

struct LoomLane {
    tail: AtomicU64,
    head: AtomicU64,
    stamps: [AtomicU64; 2],
    values: [UnsafeCell<u64>; 2],
}

unsafe impl Send for LoomLane {}
unsafe impl Sync for LoomLane {}

const CAP: u64 = 2;

impl LoomLane {
    fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            head: AtomicU64::new(0),
            stamps: [AtomicU64::new(0), AtomicU64::new(2)],
            values: [UnsafeCell::new(0), UnsafeCell::new(0)],
        }
    }

    fn push(&self, value: u64) -> bool {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let idx = (tail % CAP) as usize;
            let stamp = self.stamps[idx].load(Ordering::Acquire);
            if stamp == 2 * tail {
                match self.tail.compare_exchange(
                    tail,
                    tail + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        self.values[idx].with_mut(|v| unsafe { *v = value });
                        self.stamps[idx].store(2 * tail + 1, Ordering::Release);
                        return true;
                    }
                    Err(current) => tail = current,
                }
            } else if stamp < 2 * tail {
                return false;
            } else {
                loom::thread::yield_now();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    fn pop(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let idx = (head % CAP) as usize;
        let stamp = self.stamps[idx].load(Ordering::Acquire);
        if stamp != 2 * head + 1 {
            return None;
        }
        let value = self.values[idx].with(|v| unsafe { *v });
        self.head.store(head + 1, Ordering::Relaxed);
        self.stamps[idx].store(2 * (head + CAP), Ordering::Release);
        Some(value)
    }
}

/// Two producers race for slots; every accepted value is read exactly once
/// and never torn.
#[test]
fn loom_two_producers_one_consumer() {
    loom::model(|| {
        let lane = Arc::new(LoomLane::new());

        let producers: Vec<_> = (1..=2u64)
            .map(|p| {
                let lane = Arc::clone(&lane);
                thread::spawn(move || u64::from(lane.push(p * 10)))
            })
            .collect();

        let mut seen = Vec::new();
        if let Some(v) = lane.pop() {
            seen.push(v);
        }

        let accepted: u64 = producers.into_iter().map(|h| h.join().unwrap()).sum();
        while let Some(v) = lane.pop() {
            seen.push(v);
        }

        assert_eq!(seen.len() as u64, accepted);
        for v in seen {
            assert!(v == 10 || v == 20, "torn value {}", v);
        }
    });
}

/// A full lane rejects instead of overwriting an unread slot.
#[test]
fn loom_full_lane_rejects() {
    loom::model(|| {
        let lane = Arc::new(LoomLane::new());
        assert!(lane.push(1));
        assert!(lane.push(2));

        let producer = {
            let lane = Arc::clone(&lane);
            thread::spawn(move || lane.push(3))
        };

        let first = lane.pop();
        let third_accepted = producer.join().unwrap();

        assert_eq!(first, Some(1));
        let mut rest = Vec::new();
        while let Some(v) = lane.pop() {
            rest.push(v);
        }
        if third_accepted {
            assert_eq!(rest, vec![2, 3]);
        } else {
            assert_eq!(rest, vec![2]);
        }
    });
}
