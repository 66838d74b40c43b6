//! Debug assertion macros for lane invariants.
//!
//! Only active in debug builds (`debug_assert!`), so release builds pay nothing.

// =============================================================================
// INV-LANE-01: Bounded Count
// =============================================================================

/// Assert that the number of committed items does not exceed lane capacity.
///
/// **Invariant**: `0 ≤ (tail - head) ≤ capacity`
///
/// Used in: `Lane::try_push()` after a slot claim succeeds
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity as u64,
            "INV-LANE-01 violated: count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// INV-LANE-02: Monotonic Progress
// =============================================================================

/// Assert that a position counter only increases.
///
/// Used in: `Lane::pop()` for head
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old,
            "INV-LANE-02 violated: {} went from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-LANE-03: Stamp Protocol
// =============================================================================

/// Assert that a slot being released by the consumer carries the "filled"
/// stamp for the position being read.
///
/// **Invariant**: slot for position `p` is free at `2p`, filled at `2p + 1`,
/// and free for the next lap at `2(p + capacity)`.
///
/// Used in: `Lane::pop()` before `assume_init_read()`
macro_rules! debug_assert_filled_stamp {
    ($stamp:expr, $pos:expr) => {
        debug_assert!(
            $stamp == 2 * $pos + 1,
            "INV-LANE-03 violated: reading position {} with stamp {}",
            $pos,
            $stamp
        )
    };
}

// =============================================================================
// INV-CH-01: Single Consumer
// =============================================================================

/// Assert that at most one consumer handle is live.
///
/// Used in: `Consumer::drop()` before releasing the consumer flag
macro_rules! debug_assert_single_consumer {
    ($was_taken:expr) => {
        debug_assert!(
            $was_taken,
            "INV-CH-01 violated: consumer released while not marked taken"
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_filled_stamp;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_single_consumer;
