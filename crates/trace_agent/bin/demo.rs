//! Simulates instrumented worker threads reporting to a flaky collector.
//!
//! ```text
//! RUST_LOG=trace_agent=debug cargo run -p trace_agent --features demo --bin demo
//! ```

use anyhow::Context;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trace_agent::{
    Ack, AgentConfig, CollectorClient, CollectorError, LoggingCollector, SegmentBatch, SegmentId,
    Tag, TraceAgent,
};
use tracing_subscriber::EnvFilter;

const WORKERS: usize = 4;
const REQUESTS_PER_WORKER: usize = 2_000;

/// Logging collector that fails a share of calls and can be taken offline.
struct FlakyCollector {
    inner: LoggingCollector,
    failure_rate: f64,
    offline: AtomicBool,
}

impl FlakyCollector {
    fn new(failure_rate: f64) -> Self {
        Self {
            inner: LoggingCollector::new(),
            failure_rate,
            offline: AtomicBool::new(false),
        }
    }

    fn roll(&self) -> Result<(), CollectorError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(CollectorError::Transport("collector offline".into()));
        }
        if rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(CollectorError::Transport("injected failure".into()));
        }
        Ok(())
    }
}

impl CollectorClient for FlakyCollector {
    async fn connect(&self, address: &str) -> Result<(), CollectorError> {
        self.roll()?;
        self.inner.connect(address).await
    }

    async fn register_service(&self, name: &str) -> Result<u32, CollectorError> {
        self.inner.register_service(name).await
    }

    async fn register_instance(
        &self,
        service_code: u32,
        instance_uuid: &str,
    ) -> Result<u32, CollectorError> {
        self.inner.register_instance(service_code, instance_uuid).await
    }

    async fn heartbeat(&self, instance_code: u32) -> Result<(), CollectorError> {
        self.inner.heartbeat(instance_code).await
    }

    async fn register_endpoint(&self, service_code: u32, name: &str) -> Result<u32, CollectorError> {
        self.inner.register_endpoint(service_code, name).await
    }

    async fn send_batch(&self, batch: SegmentBatch) -> Result<Ack, CollectorError> {
        self.roll()?;
        // Simulated network latency.
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.inner.send_batch(batch).await
    }

    async fn probe_health(&self) -> Result<(), CollectorError> {
        self.roll()?;
        self.inner.probe_health().await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn worker(agent: &TraceAgent<FlakyCollector>, id: usize) {
    let mut rng = rand::thread_rng();
    let mut assembler = agent.assembler();

    for request in 0..REQUESTS_PER_WORKER {
        let segment = SegmentId::random();
        let path = match request % 4 {
            0 => "/api/orders".to_owned(),
            1 => format!("/api/orders/{}", request % 50),
            2 => "/static/app.js".to_owned(),
            _ => "/api/cart".to_owned(),
        };

        let entry = assembler.on_span_start(&path, segment);
        for call in 0..rng.gen_range(1..6) {
            let child = assembler.on_span_start("SELECT orders", segment);
            assembler.set_peer(child, "postgres:5432");
            if rng.gen_bool(0.02) {
                assembler.mark_error(child);
            }
            assembler.on_span_end(child, vec![Tag::new("db.call", call.to_string())]);
        }
        assembler.on_span_end(entry, vec![Tag::new("worker", id.to_string())]);

        if request % 100 == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace_agent=info")),
        )
        .init();

    let config = AgentConfig::from_json_str(
        r#"{
            "agent": { "service_name": "demo-shop", "namespace": "local", "sample_n_per_3_secs": 5000 },
            "collector": {
                "backend_service": ["127.0.0.1:11800", "127.0.0.1:11801"],
                "channel_check_interval": 500,
                "register_check_interval": 300
            },
            "buffer": { "channel_size": 4, "buffer_size": 256 }
        }"#,
    )
    .context("demo configuration")?;

    let collector = Arc::new(FlakyCollector::new(0.05));
    let agent = Arc::new(TraceAgent::start(config, Arc::clone(&collector))?);

    let handles: Vec<_> = (0..WORKERS)
        .map(|id| {
            let agent = Arc::clone(&agent);
            thread::spawn(move || worker(&agent, id))
        })
        .collect();

    // Take the collector away for a while mid-run.
    tokio::time::sleep(Duration::from_millis(400)).await;
    collector.offline.store(true, Ordering::Relaxed);
    tracing::info!("collector taken offline");
    tokio::time::sleep(Duration::from_secs(2)).await;
    collector.offline.store(false, Ordering::Relaxed);
    tracing::info!("collector back online");

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))?;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let agent = Arc::try_unwrap(agent).map_err(|_| anyhow::anyhow!("agent still shared"))?;
    let snapshot = agent.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
