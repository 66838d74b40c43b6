//! Bounded string-to-code dictionary.
//!
//! Repeated service and endpoint names are replaced by small integer codes
//! before a segment leaves the process. Codes are handed out sequentially from
//! 1, never reused and never evicted. Once the configured capacity is spent
//! every unseen name maps to [`NULL_CODE`] and travels as a raw string instead.
//!
//! Names that came back NULL wait in a bounded backlog until the collector
//! registers them. The code the collector returns is then kept in a separate
//! remote table ([`DictionaryCache::adopt`]) and used from then on, so a
//! repaired name is encoded as a code and never queued again.
//!
//! # Hot path
//!
//! A hit takes one shared read lock on one shard. A miss takes that shard's
//! write lock, re-checks, and allocates the next code with a CAS against the
//! capacity, so two threads racing on one name always agree on its code and
//! the issued count can never pass the capacity.

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Code returned once the dictionary is full.
pub const NULL_CODE: u32 = 0;

const SHARDS: usize = 16;

type Shard = CachePadded<RwLock<HashMap<Arc<str>, u32>>>;

/// Names that resolved to [`NULL_CODE`], kept for re-registration.
#[derive(Default)]
struct Backlog {
    order: VecDeque<Arc<str>>,
    members: HashSet<Arc<str>>,
}

/// Concurrent, append-only name dictionary with a fixed code budget.
pub struct DictionaryCache {
    label: &'static str,
    shards: Box<[Shard]>,
    hasher: RandomState,
    capacity: u32,
    issued: AtomicU32,
    exhausted: AtomicU64,
    backlog: Mutex<Backlog>,
    backlog_capacity: usize,
    backlog_overflow: AtomicU64,
    /// Codes the collector assigned to names the local budget could not cover
    remote: RwLock<HashMap<Arc<str>, u32>>,
}

impl DictionaryCache {
    /// Creates a dictionary that issues at most `capacity` codes.
    ///
    /// Capacities beyond the 32-bit code space are limited to it.
    pub fn new(label: &'static str, capacity: usize, unresolved_backlog: usize) -> Self {
        let shards = (0..SHARDS)
            .map(|_| CachePadded::new(RwLock::new(HashMap::new())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            label,
            shards,
            hasher: RandomState::new(),
            capacity: u32::try_from(capacity).unwrap_or(u32::MAX),
            issued: AtomicU32::new(0),
            exhausted: AtomicU64::new(0),
            backlog: Mutex::new(Backlog::default()),
            backlog_capacity: unresolved_backlog,
            backlog_overflow: AtomicU64::new(0),
            remote: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    fn shard(&self, name: &str) -> &Shard {
        let hash = self.hasher.hash_one(name);
        &self.shards[(hash as usize) % SHARDS]
    }

    /// Returns the code for `name`, allocating one on first sight.
    ///
    /// Returns [`NULL_CODE`] when the name is new, the capacity is spent and
    /// the collector has not assigned it a code yet.
    pub fn resolve(&self, name: &str) -> u32 {
        let shard = self.shard(name);

        if let Some(&code) = shard.read().get(name) {
            return code;
        }
        if let Some(&code) = self.remote.read().get(name) {
            return code;
        }

        let mut map = shard.write();
        if let Some(&code) = map.get(name) {
            return code;
        }

        match self.allocate() {
            Some(code) => {
                map.insert(Arc::from(name), code);
                code
            }
            None => {
                drop(map);
                self.record_exhausted(name);
                NULL_CODE
            }
        }
    }

    /// Returns the code for `name` if one was issued. Never allocates.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.shard(name)
            .read()
            .get(name)
            .copied()
            .or_else(|| self.remote.read().get(name).copied())
    }

    /// Records the code the collector assigned to an unresolved name.
    ///
    /// Later resolutions of `name` return `code` instead of [`NULL_CODE`].
    /// [`NULL_CODE`] itself is ignored.
    pub fn adopt(&self, name: Arc<str>, code: u32) {
        if code == NULL_CODE {
            return;
        }
        self.remote.write().insert(name, code);
    }

    fn allocate(&self) -> Option<u32> {
        let capacity = self.capacity;
        self.issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |issued| {
                (issued < capacity).then_some(issued + 1)
            })
            .ok()
            .map(|previous| {
                let code = previous + 1;
                debug_assert!(
                    code <= capacity,
                    "dictionary {} issued code {} past capacity {}",
                    self.label,
                    code,
                    capacity
                );
                code
            })
    }

    fn record_exhausted(&self, name: &str) {
        if self.exhausted.fetch_add(1, Ordering::Relaxed) == 0 {
            trace!(dictionary = self.label, capacity = self.capacity, "dictionary exhausted");
        }

        let mut backlog = self.backlog.lock();
        if backlog.members.contains(name) || self.remote.read().contains_key(name) {
            return;
        }
        if backlog.order.len() >= self.backlog_capacity {
            self.backlog_overflow.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let name: Arc<str> = Arc::from(name);
        backlog.members.insert(Arc::clone(&name));
        backlog.order.push_back(name);
    }

    /// Removes up to `max` names from the unresolved backlog, oldest first.
    pub fn take_unresolved(&self, max: usize) -> Vec<Arc<str>> {
        let mut backlog = self.backlog.lock();
        let n = max.min(backlog.order.len());
        let taken: Vec<Arc<str>> = backlog.order.drain(..n).collect();
        for name in &taken {
            backlog.members.remove(name);
        }
        taken
    }

    /// Puts names back at the front of the backlog after a failed re-send.
    ///
    /// Names that no longer fit are counted as overflow.
    pub fn requeue_unresolved(&self, names: Vec<Arc<str>>) {
        let mut backlog = self.backlog.lock();
        let remote = self.remote.read();
        for name in names.into_iter().rev() {
            if backlog.members.contains(&name) || remote.contains_key(&name) {
                continue;
            }
            if backlog.order.len() >= self.backlog_capacity {
                self.backlog_overflow.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            backlog.members.insert(Arc::clone(&name));
            backlog.order.push_front(name);
        }
    }

    /// Names currently waiting for re-registration.
    pub fn unresolved_len(&self) -> usize {
        self.backlog.lock().order.len()
    }

    /// Names repaired with a collector-assigned code.
    pub fn repaired_len(&self) -> usize {
        self.remote.read().len()
    }

    /// Number of codes issued locally so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.issued.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Resolutions that returned [`NULL_CODE`].
    #[inline]
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Unresolved names that did not fit in the backlog.
    #[inline]
    pub fn backlog_overflow_count(&self) -> u64 {
        self.backlog_overflow.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl std::fmt::Debug for DictionaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictionaryCache")
            .field("label", &self.label)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("exhausted", &self.exhausted_count())
            .field("repaired", &self.repaired_len())
            .finish_non_exhaustive()
    }
}
