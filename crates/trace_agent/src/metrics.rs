//! Agent counters and the observable snapshot.

use crate::channel_manager::ChannelState;
use crate::dictionary::DictionaryCache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters shared by producer threads and background tasks.
///
/// All counters use `Relaxed`: each one is an independent tally read for
/// reporting, and nothing synchronizes through them.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    segments_ignored: AtomicU64,
    segments_sampled_out: AtomicU64,
    segments_enqueued: AtomicU64,
    segments_dropped: AtomicU64,
    rejected_closed: AtomicU64,
    placeholder_spans: AtomicU64,
    discarded_disconnected: AtomicU64,
    batches_sent: AtomicU64,
    segments_sent: AtomicU64,
    transmit_failures: AtomicU64,
    segments_failed: AtomicU64,
    registration_failures: AtomicU64,
    reconnects: AtomicU64,
    last_transmit_millis: AtomicU64,
}

impl AgentMetrics {
    pub(crate) fn record_ignored(&self) {
        self.segments_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sampled_out(&self) {
        self.segments_sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueued(&self, placeholders: usize) {
        self.segments_enqueued.fetch_add(1, Ordering::Relaxed);
        self.placeholder_spans
            .fetch_add(placeholders as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.segments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_closed(&self) {
        self.rejected_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, segments: usize) {
        self.discarded_disconnected
            .fetch_add(segments as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, segments: usize, at_millis: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.segments_sent.fetch_add(segments as u64, Ordering::Relaxed);
        self.last_transmit_millis
            .fetch_max(at_millis, Ordering::Relaxed);
    }

    pub(crate) fn record_transmit_failure(&self, segments: usize) {
        self.transmit_failures.fetch_add(1, Ordering::Relaxed);
        self.segments_failed
            .fetch_add(segments as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_registration_failure(&self) {
        self.registration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn segments_enqueued(&self) -> u64 {
        self.segments_enqueued.load(Ordering::Relaxed)
    }

    pub fn segments_sent(&self) -> u64 {
        self.segments_sent.load(Ordering::Relaxed)
    }

    pub fn discarded_disconnected(&self) -> u64 {
        self.discarded_disconnected.load(Ordering::Relaxed)
    }

    pub fn transmit_failures(&self) -> u64 {
        self.transmit_failures.load(Ordering::Relaxed)
    }

    /// Unix millis of the last acknowledged batch; 0 if none yet.
    pub fn last_transmit_millis(&self) -> u64 {
        self.last_transmit_millis.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the agent, for logs and health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub channel_state: ChannelState,
    pub service_code: u32,
    pub instance_code: u32,
    /// Unix millis of the last acknowledged batch; 0 if none yet
    pub last_transmit_millis: u64,
    pub segments_ignored: u64,
    pub segments_sampled_out: u64,
    pub segments_enqueued: u64,
    /// Segments lost to a full lane
    pub buffer_overflow: u64,
    /// Segments finished after shutdown began
    pub rejected_closed: u64,
    pub placeholder_spans: u64,
    pub buffered: usize,
    pub discarded_disconnected: u64,
    pub batches_sent: u64,
    pub segments_sent: u64,
    pub transmit_failures: u64,
    pub segments_failed: u64,
    pub registration_failures: u64,
    pub reconnects: u64,
    pub service_dictionary_len: usize,
    pub service_dictionary_exhausted: u64,
    /// Names coded by the collector after local exhaustion
    pub service_dictionary_repaired: usize,
    pub endpoint_dictionary_len: usize,
    pub endpoint_dictionary_exhausted: u64,
    pub endpoint_dictionary_repaired: usize,
}

/// Values the metrics struct does not own, gathered by the caller.
pub(crate) struct SnapshotContext {
    pub channel_state: ChannelState,
    pub service_code: u32,
    pub instance_code: u32,
    pub buffered: usize,
    pub service_dictionary: DictionaryStats,
    pub endpoint_dictionary: DictionaryStats,
}

/// Fill, exhaustion and repair figures of one dictionary.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DictionaryStats {
    pub len: usize,
    pub exhausted: u64,
    pub repaired: usize,
}

impl DictionaryStats {
    pub(crate) fn of(dictionary: &DictionaryCache) -> Self {
        Self {
            len: dictionary.len(),
            exhausted: dictionary.exhausted_count(),
            repaired: dictionary.repaired_len(),
        }
    }
}

impl AgentMetrics {
    pub(crate) fn snapshot(&self, ctx: SnapshotContext) -> AgentSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        AgentSnapshot {
            channel_state: ctx.channel_state,
            service_code: ctx.service_code,
            instance_code: ctx.instance_code,
            last_transmit_millis: load(&self.last_transmit_millis),
            segments_ignored: load(&self.segments_ignored),
            segments_sampled_out: load(&self.segments_sampled_out),
            segments_enqueued: load(&self.segments_enqueued),
            buffer_overflow: load(&self.segments_dropped),
            rejected_closed: load(&self.rejected_closed),
            placeholder_spans: load(&self.placeholder_spans),
            buffered: ctx.buffered,
            discarded_disconnected: load(&self.discarded_disconnected),
            batches_sent: load(&self.batches_sent),
            segments_sent: load(&self.segments_sent),
            transmit_failures: load(&self.transmit_failures),
            segments_failed: load(&self.segments_failed),
            registration_failures: load(&self.registration_failures),
            reconnects: load(&self.reconnects),
            service_dictionary_len: ctx.service_dictionary.len,
            service_dictionary_exhausted: ctx.service_dictionary.exhausted,
            service_dictionary_repaired: ctx.service_dictionary.repaired,
            endpoint_dictionary_len: ctx.endpoint_dictionary.len,
            endpoint_dictionary_exhausted: ctx.endpoint_dictionary.exhausted,
            endpoint_dictionary_repaired: ctx.endpoint_dictionary.repaired,
        }
    }
}
