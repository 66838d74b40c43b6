//! Backend channel management.
//!
//! The manager owns the collector connection and runs three independent
//! loops over it:
//!
//! - **health**: reconnects while disconnected, otherwise probes the
//!   collector and walks the [`ChannelState`] machine
//! - **registration**: registers the service and instance, sends heartbeats,
//!   and registers names the dictionaries could not encode, keeping the
//!   returned codes so those names are encoded from then on
//! - **transmit**: the single ring buffer consumer, shipping batches
//!
//! # State machine
//!
//! ```text
//! DISCONNECTED --connect--> CONNECTING --ok--> CONNECTED
//!      ^                        |                 |  ^
//!      |                      fail        3 fails |  | probe ok
//!      +------------------------+                 v  |
//!      +------------ probe/send fail ---------- DEGRADED
//! ```
//!
//! A failed send demotes the state one step (CONNECTED to DEGRADED, DEGRADED
//! to DISCONNECTED) and is never retried. Everything here is absorbed and
//! logged; no collector failure reaches application threads.

use crate::client::{CollectorClient, CollectorError};
use crate::config::AgentConfig;
use crate::dictionary::{DictionaryCache, NULL_CODE};
use crate::pipeline::Pipeline;
use crate::segment::{now_millis, EncodedSegment, SegmentBatch};
use parking_lot::Mutex;
use ringlane::Consumer;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Consecutive probe failures that move CONNECTED to DEGRADED.
pub const PROBE_FAILURE_THRESHOLD: u32 = 3;

/// Unresolved names re-sent per dictionary per registration tick.
const RESEND_PER_TICK: usize = 100;

/// Connection state shared by all manager loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ChannelState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Degraded = 3,
}

impl ChannelState {
    /// Whether batches are sent (rather than discarded) in this state.
    #[inline]
    pub fn can_transmit(self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Degraded,
            _ => Self::Disconnected,
        }
    }
}

/// Lock-free mirror of the current state for readers.
#[derive(Debug)]
pub struct AtomicChannelState(AtomicU8);

impl AtomicChannelState {
    pub fn new(state: ChannelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    fn store(&self, state: ChannelState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    ConnectStarted,
    ConnectSucceeded,
    ConnectFailed,
    ProbeSucceeded,
    /// A failed or timed-out probe
    ProbeFailed,
    TransmitFailed,
}

/// Pure channel state machine.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    state: ChannelState,
    consecutive_failures: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            consecutive_failures: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[inline]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Applies one event and returns the resulting state.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn apply(&mut self, event: HealthEvent) -> ChannelState {
        use ChannelState as S;
        use HealthEvent as E;

        self.state = match (self.state, event) {
            (S::Disconnected, E::ConnectStarted) => S::Connecting,
            (S::Connecting, E::ConnectSucceeded) => {
                self.consecutive_failures = 0;
                S::Connected
            }
            (S::Connecting, E::ConnectFailed) => S::Disconnected,

            (S::Connected | S::Degraded, E::ProbeSucceeded) => {
                self.consecutive_failures = 0;
                S::Connected
            }
            (S::Connected, E::ProbeFailed) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= PROBE_FAILURE_THRESHOLD {
                    S::Degraded
                } else {
                    S::Connected
                }
            }
            (S::Connected, E::TransmitFailed) => {
                self.consecutive_failures = PROBE_FAILURE_THRESHOLD;
                S::Degraded
            }
            (S::Degraded, E::ProbeFailed | E::TransmitFailed) => {
                self.consecutive_failures = 0;
                S::Disconnected
            }

            (state, _) => state,
        };

        // INV-CM-01: CONNECTED never holds a failure streak at the threshold
        debug_assert!(
            self.state != S::Connected || self.consecutive_failures < PROBE_FAILURE_THRESHOLD,
            "INV-CM-01: connected with {} consecutive failures",
            self.consecutive_failures
        );
        self.state
    }
}

/// Codes the collector assigned to this process.
#[derive(Debug, Clone, Copy, Default)]
struct Identity {
    /// Bumped on every successful connect
    epoch: u64,
    service_code: u32,
    instance_code: u32,
}

/// Per-call summary of [`ChannelManager::transmit_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitReport {
    pub drained: usize,
    pub sent: usize,
    pub discarded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum NameKind {
    /// Remote peers, registered as services
    Peer,
    Endpoint,
}

/// Owns the collector connection. Shared by the manager loops via `Arc`.
pub struct ChannelManager<C> {
    client: Arc<C>,
    pipeline: Arc<Pipeline>,
    health: Mutex<HealthTracker>,
    state: AtomicChannelState,
    identity: Mutex<Identity>,
    addresses: Vec<String>,
    next_address: AtomicUsize,
    ever_connected: AtomicBool,
    service_name: String,
    instance_uuid: String,
    authentication: Option<String>,
    probe_timeout: Duration,
    max_batch: usize,
}

impl<C: CollectorClient> ChannelManager<C> {
    pub fn new(
        config: &AgentConfig,
        instance_uuid: String,
        pipeline: Arc<Pipeline>,
        client: Arc<C>,
    ) -> Self {
        let authentication = Some(config.agent.authentication.clone()).filter(|a| !a.is_empty());
        Self {
            client,
            pipeline,
            health: Mutex::new(HealthTracker::new()),
            state: AtomicChannelState::new(ChannelState::Disconnected),
            identity: Mutex::new(Identity::default()),
            addresses: config.collector.backend_service.clone(),
            next_address: AtomicUsize::new(0),
            ever_connected: AtomicBool::new(false),
            service_name: config.qualified_service_name(),
            instance_uuid,
            authentication,
            probe_timeout: config.collector.probe_timeout,
            max_batch: config.collector.max_batch,
        }
    }

    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state.load()
    }

    /// `0` until the collector has assigned one.
    pub fn service_code(&self) -> u32 {
        self.identity.lock().service_code
    }

    /// `0` until the collector has assigned one.
    pub fn instance_code(&self) -> u32 {
        self.identity.lock().instance_code
    }

    pub fn instance_uuid(&self) -> &str {
        &self.instance_uuid
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Feeds one event to the state machine and publishes the result.
    pub fn apply(&self, event: HealthEvent) -> ChannelState {
        let (from, to) = {
            let mut health = self.health.lock();
            let from = health.state();
            let to = health.apply(event);
            self.state.store(to);
            (from, to)
        };

        if from != to {
            match to {
                ChannelState::Disconnected | ChannelState::Degraded => {
                    warn!(from = ?from, to = ?to, event = ?event, "collector channel state changed");
                }
                _ => info!(from = ?from, to = ?to, "collector channel state changed"),
            }
        }
        to
    }

    fn next_address(&self) -> &str {
        let idx = self.next_address.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        &self.addresses[idx]
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// One health tick: reconnect while disconnected, probe otherwise.
    pub async fn check_health(&self) -> ChannelState {
        match self.state() {
            ChannelState::Disconnected => self.reconnect().await,
            // A connect attempt is already in flight.
            ChannelState::Connecting => ChannelState::Connecting,
            ChannelState::Connected | ChannelState::Degraded => {
                match time::timeout(self.probe_timeout, self.client.probe_health()).await {
                    Ok(Ok(())) => self.apply(HealthEvent::ProbeSucceeded),
                    Ok(Err(e)) => {
                        debug!(error = %e, "health probe failed");
                        self.apply(HealthEvent::ProbeFailed)
                    }
                    Err(_) => {
                        debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "health probe timed out");
                        self.apply(HealthEvent::ProbeFailed)
                    }
                }
            }
        }
    }

    async fn reconnect(&self) -> ChannelState {
        let address = self.next_address();
        self.apply(HealthEvent::ConnectStarted);

        let result = time::timeout(self.probe_timeout, self.client.connect(address)).await;
        match result {
            Ok(Ok(())) => {
                {
                    // The collector may have restarted and forgotten us.
                    let mut identity = self.identity.lock();
                    *identity = Identity {
                        epoch: identity.epoch + 1,
                        ..Identity::default()
                    };
                }
                if self.ever_connected.swap(true, Ordering::Relaxed) {
                    self.pipeline.metrics.record_reconnect();
                }
                info!(address, client = self.client.name(), "connected to collector");
                self.apply(HealthEvent::ConnectSucceeded)
            }
            Ok(Err(e)) => {
                warn!(address, error = %e, "collector connect failed");
                self.apply(HealthEvent::ConnectFailed)
            }
            Err(_) => {
                warn!(address, "collector connect timed out");
                self.apply(HealthEvent::ConnectFailed)
            }
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// One registration tick.
    ///
    /// Skipped unless the channel can transmit. Registers whatever part of
    /// the identity is missing, heartbeats once the instance is known, then
    /// re-sends names stuck in the dictionaries' unresolved backlogs.
    pub async fn register_once(&self) -> Result<(), CollectorError> {
        if !self.state().can_transmit() {
            return Ok(());
        }

        let current = *self.identity.lock();
        let epoch = current.epoch;

        let service_code = if current.service_code == NULL_CODE {
            let code = self.client.register_service(&self.service_name).await?;
            if code == NULL_CODE || !self.store_identity(epoch, |id| id.service_code = code) {
                return Ok(());
            }
            info!(service = %self.service_name, code, "service registered");
            code
        } else {
            current.service_code
        };

        let instance_code = if current.instance_code == NULL_CODE {
            let code = self
                .client
                .register_instance(service_code, &self.instance_uuid)
                .await?;
            if code == NULL_CODE || !self.store_identity(epoch, |id| id.instance_code = code) {
                return Ok(());
            }
            info!(instance = %self.instance_uuid, code, "instance registered");
            code
        } else {
            current.instance_code
        };

        self.client.heartbeat(instance_code).await?;

        self.resend_unresolved(&self.pipeline.services, NameKind::Peer, service_code)
            .await?;
        self.resend_unresolved(&self.pipeline.endpoints, NameKind::Endpoint, service_code)
            .await
    }

    /// Stores into the identity unless a reconnect happened meanwhile.
    fn store_identity(&self, epoch: u64, update: impl FnOnce(&mut Identity)) -> bool {
        let mut identity = self.identity.lock();
        if identity.epoch != epoch {
            return false;
        }
        update(&mut identity);
        true
    }

    async fn resend_unresolved(
        &self,
        dictionary: &DictionaryCache,
        kind: NameKind,
        service_code: u32,
    ) -> Result<(), CollectorError> {
        let names = dictionary.take_unresolved(RESEND_PER_TICK);
        if names.is_empty() {
            return Ok(());
        }

        let mut pending = Vec::new();
        let mut acknowledged = 0usize;
        let mut names = names.into_iter();

        while let Some(name) = names.next() {
            let result = match kind {
                NameKind::Peer => self.client.register_service(&name).await,
                NameKind::Endpoint => self.client.register_endpoint(service_code, &name).await,
            };
            match result {
                Ok(NULL_CODE) => pending.push(name),
                Ok(code) => {
                    dictionary.adopt(name, code);
                    acknowledged += 1;
                }
                Err(e) => {
                    pending.push(name);
                    pending.extend(names);
                    dictionary.requeue_unresolved(pending);
                    return Err(e);
                }
            }
        }

        debug!(
            dictionary = dictionary.label(),
            acknowledged,
            pending = pending.len(),
            "unresolved names re-sent"
        );
        dictionary.requeue_unresolved(pending);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------

    fn build_batch(&self, segments: Vec<EncodedSegment>) -> SegmentBatch {
        let identity = *self.identity.lock();
        SegmentBatch {
            service_code: identity.service_code,
            instance_code: identity.instance_code,
            authentication: self.authentication.clone(),
            segments,
        }
    }

    /// One transmit tick.
    ///
    /// Drains up to `max_batch` segments and keeps draining while batches
    /// come back full. Batches drained while the channel cannot transmit are
    /// discarded.
    pub async fn transmit_once(&self, consumer: &mut Consumer<EncodedSegment>) -> TransmitReport {
        let mut report = TransmitReport::default();
        let max_rounds = self.pipeline.channel.config().total_capacity() / self.max_batch + 1;

        for _ in 0..max_rounds {
            let segments = consumer.drain(self.max_batch);
            if segments.is_empty() {
                break;
            }
            let count = segments.len();
            let full = count == self.max_batch;
            report.drained += count;

            if self.state().can_transmit() {
                let batch = self.build_batch(segments);
                match self.client.send_batch(batch).await {
                    Ok(ack) => {
                        self.pipeline.metrics.record_sent(ack.accepted, now_millis());
                        report.sent += ack.accepted;
                    }
                    Err(e) => {
                        self.pipeline.metrics.record_transmit_failure(count);
                        report.failed += count;
                        warn!(segments = count, error = %e, "batch transmit failed");
                        self.apply(HealthEvent::TransmitFailed);
                    }
                }
            } else {
                self.pipeline.metrics.record_discarded(count);
                report.discarded += count;
            }

            if !full {
                break;
            }
        }

        if report.discarded > 0 {
            debug!(segments = report.discarded, "segments discarded while disconnected");
        }
        report
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    /// Health loop. The first tick fires immediately, so the agent connects
    /// at start-up.
    pub async fn run_health(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.check_health().await;
                }
            }
        }
        debug!("health loop stopped");
    }

    /// Registration loop.
    pub async fn run_registration(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.register_once().await {
                        self.pipeline.metrics.record_registration_failure();
                        warn!(error = %e, "registration failed");
                    }
                }
            }
        }
        debug!("registration loop stopped");
    }

    /// Transmit loop. On shutdown it makes one final drain before returning.
    pub async fn run_transmit(
        self: Arc<Self>,
        mut consumer: Consumer<EncodedSegment>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.transmit_once(&mut consumer).await;
                }
            }
        }

        let last = self.transmit_once(&mut consumer).await;
        debug!(
            sent = last.sent,
            discarded = last.discarded,
            failed = last.failed,
            "transmit loop stopped after final drain"
        );
    }
}

impl<C> std::fmt::Debug for ChannelManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("state", &self.state.load())
            .field("service_name", &self.service_name)
            .field("instance_uuid", &self.instance_uuid)
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}
