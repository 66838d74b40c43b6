//! The agent facade: wires the pipeline to a channel manager and runs it.

use crate::assembler::SegmentAssembler;
use crate::channel_manager::ChannelManager;
use crate::client::CollectorClient;
use crate::config::{AgentConfig, ConfigError};
use crate::metrics::{AgentSnapshot, DictionaryStats, SnapshotContext};
use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors raised while starting the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("ring buffer unavailable: {0}")]
    Channel(#[from] ringlane::ChannelError),
    /// `start` was called outside a tokio runtime
    #[error("no tokio runtime: {0}")]
    NoRuntime(String),
}

/// Generates an instance identity in the usual 8-4-4-4-12 hex layout.
pub fn generate_instance_uuid() -> String {
    let bits: u128 = rand::random();
    let hex = format!("{:032x}", bits);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// A running trace agent.
///
/// Producers get a [`SegmentAssembler`] each from [`TraceAgent::assembler`];
/// three background tasks (health, registration, transmit) run on the tokio
/// runtime that was current at [`TraceAgent::start`].
pub struct TraceAgent<C: CollectorClient + 'static> {
    pipeline: Arc<Pipeline>,
    manager: Arc<ChannelManager<C>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl<C: CollectorClient + 'static> TraceAgent<C> {
    /// Validates `config`, builds the pipeline and spawns the manager loops.
    pub fn start(config: AgentConfig, client: Arc<C>) -> Result<Self, AgentError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AgentError::NoRuntime(e.to_string()))?;

        let instance_uuid = if config.agent.instance_uuid.is_empty() {
            generate_instance_uuid()
        } else {
            config.agent.instance_uuid.clone()
        };

        let pipeline = Arc::new(Pipeline::new(&config)?);
        let consumer = pipeline.channel.consumer()?;
        let manager = Arc::new(ChannelManager::new(
            &config,
            instance_uuid,
            Arc::clone(&pipeline),
            client,
        ));

        let (shutdown, rx) = watch::channel(false);
        let collector = &config.collector;
        let tasks = vec![
            runtime.spawn(
                Arc::clone(&manager).run_health(collector.channel_check_interval, rx.clone()),
            ),
            runtime.spawn(
                Arc::clone(&manager)
                    .run_registration(collector.register_check_interval, rx.clone()),
            ),
            runtime.spawn(Arc::clone(&manager).run_transmit(
                consumer,
                collector.transmit_interval,
                rx,
            )),
        ];

        info!(
            service = manager.service_name(),
            instance = manager.instance_uuid(),
            lanes = config.buffer.channel_size,
            lane_capacity = config.buffer.buffer_size,
            "trace agent started"
        );

        Ok(Self {
            pipeline,
            manager,
            shutdown,
            tasks,
            shutdown_grace: collector.shutdown_grace,
        })
    }

    /// A fresh assembler for the calling thread.
    pub fn assembler(&self) -> SegmentAssembler {
        SegmentAssembler::new(Arc::clone(&self.pipeline))
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn manager(&self) -> &Arc<ChannelManager<C>> {
        &self.manager
    }

    /// Current counters, channel state and identity.
    pub fn observe(&self) -> AgentSnapshot {
        let pipeline = &self.pipeline;
        pipeline.metrics.snapshot(SnapshotContext {
            channel_state: self.manager.state(),
            service_code: self.manager.service_code(),
            instance_code: self.manager.instance_code(),
            buffered: pipeline.channel.len(),
            service_dictionary: DictionaryStats::of(&pipeline.services),
            endpoint_dictionary: DictionaryStats::of(&pipeline.endpoints),
        })
    }

    /// Stops the agent.
    ///
    /// Closes the ring buffer to new segments, signals the loops, lets the
    /// transmit loop finish its in-flight batch and make a final drain, and
    /// aborts whatever is still running once `shutdown_grace` has passed.
    pub async fn shutdown(mut self) -> AgentSnapshot {
        self.pipeline.channel.close();
        let _ = self.shutdown.send(true);

        let tasks = std::mem::take(&mut self.tasks);
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let join_all = async {
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "agent task ended abnormally");
                }
            }
        };

        if tokio::time::timeout(self.shutdown_grace, join_all).await.is_err() {
            warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "shutdown grace elapsed, aborting agent tasks"
            );
            for handle in aborts {
                handle.abort();
            }
        }

        let snapshot = self.observe();
        info!(
            sent = snapshot.segments_sent,
            buffered = snapshot.buffered,
            "trace agent stopped"
        );
        snapshot
    }
}

impl<C: CollectorClient + 'static> Drop for TraceAgent<C> {
    fn drop(&mut self) {
        // Dropped without shutdown(): let the loops wind down on their own.
        let _ = self.shutdown.send(true);
        self.pipeline.channel.close();
    }
}

impl<C: CollectorClient + 'static> std::fmt::Debug for TraceAgent<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceAgent")
            .field("manager", &self.manager)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
