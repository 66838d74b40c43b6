//! Segment admission: fixed-window sampling and suffix exclusion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Length of one sampling window.
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(3);

#[inline]
const fn pack(window: u32, count: u32) -> u64 {
    ((window as u64) << 32) | count as u64
}

#[inline]
const fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

/// Admits at most `limit` new segments per 3-second window.
///
/// The window index and the admitted count share one `AtomicU64`, so rolling
/// into a new window and counting the first admission in it is one CAS. Nothing
/// carries over from one window to the next.
#[derive(Debug)]
pub struct SegmentSampler {
    limit: i32,
    epoch: Instant,
    state: AtomicU64,
    rejected: AtomicU64,
}

impl SegmentSampler {
    /// `limit <= 0` admits every segment.
    pub fn new(limit: i32) -> Self {
        Self {
            limit,
            epoch: Instant::now(),
            state: AtomicU64::new(pack(0, 0)),
            rejected: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    #[inline]
    pub fn limit(&self) -> i32 {
        self.limit
    }

    fn current_window(&self) -> u32 {
        let elapsed = Instant::now().saturating_duration_since(self.epoch);
        (elapsed.as_millis() / SAMPLE_WINDOW.as_millis()) as u32
    }

    /// Called once per new top-level segment.
    ///
    /// The admission that would take the window past the limit is rejected.
    pub fn try_admit(&self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let limit = self.limit as u32;
        let now = self.current_window();

        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (window, count) = unpack(current);
            // Another thread may already have rolled into a later window.
            let (window, count) = if window >= now {
                (window, count)
            } else {
                (now, 0)
            };

            if count >= limit {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }

            match self.state.compare_exchange_weak(
                current,
                pack(window, count + 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug_assert!(
                        count < limit,
                        "sampler admitted {} segments with limit {}",
                        count + 1,
                        limit
                    );
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Admissions counted in the current window.
    pub fn current_count(&self) -> u32 {
        let (window, count) = unpack(self.state.load(Ordering::Acquire));
        if window >= self.current_window() {
            count
        } else {
            0
        }
    }

    /// Segments rejected since creation.
    #[inline]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Matches root operation names that end with a listed suffix.
///
/// Suffixes are compared as plain text, so `.min.js` and `/healthz` work as
/// well as single extensions like `.png`.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSuffixFilter {
    suffixes: Vec<String>,
}

impl IgnoreSuffixFilter {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut suffixes: Vec<String> = suffixes.into_iter().map(Into::into).collect();
        suffixes.retain(|s| !s.is_empty());
        suffixes.sort_unstable();
        suffixes.dedup();
        Self { suffixes }
    }

    /// Builds a filter from a comma-separated list such as `".jpg,.css"`.
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        )
    }

    pub fn is_ignored(&self, operation_name: &str) -> bool {
        self.suffixes
            .iter()
            .any(|suffix| operation_name.ends_with(suffix.as_str()))
    }
}
