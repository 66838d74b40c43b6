//! The collector seam.
//!
//! The agent talks to its collector only through [`CollectorClient`]. A real
//! deployment plugs in a streaming RPC client; tests plug in scripted fakes.

use crate::segment::SegmentBatch;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced by a collector client. Absorbed by the channel manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// Transport-layer error (network, RPC)
    #[error("transport error: {0}")]
    Transport(String),
    /// No connection is established
    #[error("not connected")]
    NotConnected,
    /// The collector refused the request
    #[error("rejected by collector: {0}")]
    Rejected(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("collector call timed out")]
    Timeout,
}

/// Acknowledgement for one transmitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    /// Segments the collector accepted
    pub accepted: usize,
}

/// Outbound interface to a trace collector.
///
/// Uses native async fn in traits instead of `#[async_trait]`. Registration
/// calls return `0` when the collector has not assigned a code yet; the
/// caller asks again on its next tick.
pub trait CollectorClient: Send + Sync {
    /// Opens (or reopens) the stream to `address`.
    fn connect(&self, address: &str) -> impl Future<Output = Result<(), CollectorError>> + Send;

    fn register_service(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<u32, CollectorError>> + Send;

    fn register_instance(
        &self,
        service_code: u32,
        instance_uuid: &str,
    ) -> impl Future<Output = Result<u32, CollectorError>> + Send;

    fn heartbeat(&self, instance_code: u32) -> impl Future<Output = Result<(), CollectorError>> + Send;

    fn register_endpoint(
        &self,
        service_code: u32,
        name: &str,
    ) -> impl Future<Output = Result<u32, CollectorError>> + Send;

    fn send_batch(
        &self,
        batch: SegmentBatch,
    ) -> impl Future<Output = Result<Ack, CollectorError>> + Send;

    fn probe_health(&self) -> impl Future<Output = Result<(), CollectorError>> + Send;

    /// Client name for logs.
    fn name(&self) -> &str;
}

/// Collector that accepts everything and logs it through `tracing`.
///
/// Useful for local runs without a collector. Codes are handed out
/// sequentially per call, so repeated registrations get fresh codes.
#[derive(Debug, Default)]
pub struct LoggingCollector {
    connected: AtomicBool,
    next_code: AtomicU32,
}

impl LoggingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign(&self) -> u32 {
        self.next_code.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn ensure_connected(&self) -> Result<(), CollectorError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CollectorError::NotConnected)
        }
    }
}

impl CollectorClient for LoggingCollector {
    async fn connect(&self, address: &str) -> Result<(), CollectorError> {
        info!(address, "logging collector connected");
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn register_service(&self, name: &str) -> Result<u32, CollectorError> {
        self.ensure_connected()?;
        let code = self.assign();
        info!(service = name, code, "service registered");
        Ok(code)
    }

    async fn register_instance(
        &self,
        service_code: u32,
        instance_uuid: &str,
    ) -> Result<u32, CollectorError> {
        self.ensure_connected()?;
        let code = self.assign();
        info!(service_code, instance_uuid, code, "instance registered");
        Ok(code)
    }

    async fn heartbeat(&self, instance_code: u32) -> Result<(), CollectorError> {
        self.ensure_connected()?;
        debug!(instance_code, "heartbeat");
        Ok(())
    }

    async fn register_endpoint(&self, service_code: u32, name: &str) -> Result<u32, CollectorError> {
        self.ensure_connected()?;
        let code = self.assign();
        debug!(service_code, endpoint = name, code, "endpoint registered");
        Ok(code)
    }

    async fn send_batch(&self, batch: SegmentBatch) -> Result<Ack, CollectorError> {
        self.ensure_connected()?;
        let bytes = serde_json::to_vec(&batch)
            .map_err(|e| CollectorError::Serialization(e.to_string()))?
            .len();
        debug!(
            segments = batch.len(),
            spans = batch.span_count(),
            bytes,
            "batch received"
        );
        Ok(Ack {
            accepted: batch.len(),
        })
    }

    async fn probe_health(&self) -> Result<(), CollectorError> {
        self.ensure_connected()
    }

    fn name(&self) -> &str {
        "logging"
    }
}
