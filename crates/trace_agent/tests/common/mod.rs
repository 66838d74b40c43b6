#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use trace_agent::{Ack, CollectorClient, CollectorError, SegmentBatch, SegmentId, TraceAgent};

/// Collector fake whose behaviour is switched by flags and which records
/// every call it receives.
pub struct ScriptedCollector {
    pub connect_ok: AtomicBool,
    pub probe_ok: AtomicBool,
    pub send_ok: AtomicBool,
    /// Probes never complete
    pub hang_probe: AtomicBool,
    /// Sends never complete
    pub hang_send: AtomicBool,
    /// Service and instance registration answer "not yet"
    pub pending_codes: AtomicBool,
    /// Endpoint registration answers "not yet"
    pub pending_endpoints: AtomicBool,
    next_code: AtomicU32,
    pub send_attempts: AtomicUsize,
    pub connects: Mutex<Vec<String>>,
    pub services: Mutex<Vec<String>>,
    pub instances: Mutex<Vec<(u32, String)>>,
    pub heartbeats: Mutex<Vec<u32>>,
    pub endpoints: Mutex<Vec<(u32, String)>>,
    pub batches: Mutex<Vec<SegmentBatch>>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self {
            connect_ok: AtomicBool::new(true),
            probe_ok: AtomicBool::new(true),
            send_ok: AtomicBool::new(true),
            hang_probe: AtomicBool::new(false),
            hang_send: AtomicBool::new(false),
            pending_codes: AtomicBool::new(false),
            pending_endpoints: AtomicBool::new(false),
            next_code: AtomicU32::new(0),
            send_attempts: AtomicUsize::new(0),
            connects: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            instances: Mutex::new(Vec::new()),
            heartbeats: Mutex::new(Vec::new()),
            endpoints: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    fn assign(&self, pending: &AtomicBool) -> u32 {
        if pending.load(Ordering::SeqCst) {
            0
        } else {
            self.next_code.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    pub fn received_segments(&self) -> usize {
        self.batches.lock().unwrap().iter().map(SegmentBatch::len).sum()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(SegmentBatch::len).collect()
    }
}

impl CollectorClient for ScriptedCollector {
    async fn connect(&self, address: &str) -> Result<(), CollectorError> {
        self.connects.lock().unwrap().push(address.to_owned());
        if self.connect_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CollectorError::Transport("connection refused".into()))
        }
    }

    async fn register_service(&self, name: &str) -> Result<u32, CollectorError> {
        self.services.lock().unwrap().push(name.to_owned());
        Ok(self.assign(&self.pending_codes))
    }

    async fn register_instance(
        &self,
        service_code: u32,
        instance_uuid: &str,
    ) -> Result<u32, CollectorError> {
        self.instances
            .lock()
            .unwrap()
            .push((service_code, instance_uuid.to_owned()));
        Ok(self.assign(&self.pending_codes))
    }

    async fn heartbeat(&self, instance_code: u32) -> Result<(), CollectorError> {
        self.heartbeats.lock().unwrap().push(instance_code);
        Ok(())
    }

    async fn register_endpoint(&self, service_code: u32, name: &str) -> Result<u32, CollectorError> {
        self.endpoints
            .lock()
            .unwrap()
            .push((service_code, name.to_owned()));
        Ok(self.assign(&self.pending_endpoints))
    }

    async fn send_batch(&self, batch: SegmentBatch) -> Result<Ack, CollectorError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang_send.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.send_ok.load(Ordering::SeqCst) {
            return Err(CollectorError::Transport("stream reset".into()));
        }
        let accepted = batch.len();
        self.batches.lock().unwrap().push(batch);
        Ok(Ack { accepted })
    }

    async fn probe_health(&self) -> Result<(), CollectorError> {
        if self.hang_probe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CollectorError::Transport("probe failed".into()))
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Records one single-span segment per name.
pub fn produce<C: CollectorClient + 'static>(agent: &TraceAgent<C>, names: &[&str]) {
    let mut assembler = agent.assembler();
    for name in names {
        let span = assembler.on_span_start(name, SegmentId::random());
        assembler.on_span_end(span, Vec::new());
    }
}
