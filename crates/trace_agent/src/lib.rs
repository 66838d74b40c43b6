//! In-process trace segment agent.
//!
//! Instrumented threads feed span lifecycle events into a per-thread
//! [`SegmentAssembler`]. Finished segments pass the [`SegmentSampler`], get
//! their names compressed through two [`DictionaryCache`]s, and land in a
//! [`ringlane`] channel. A [`ChannelManager`] drains that channel and ships
//! batches to a collector through the [`CollectorClient`] trait, keeping the
//! connection healthy and the service identity registered on the side.
//!
//! Application threads never block on the collector and never see its
//! errors: a full lane drops the segment, a dead collector discards batches,
//! and both are counted in [`AgentSnapshot`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trace_agent::{AgentConfig, LoggingCollector, SegmentId, TraceAgent};
//!
//! # async fn run() -> Result<(), trace_agent::AgentError> {
//! let agent = TraceAgent::start(AgentConfig::new("orders"), Arc::new(LoggingCollector::new()))?;
//!
//! let mut assembler = agent.assembler();
//! let segment = SegmentId::random();
//! let entry = assembler.on_span_start("/orders/place", segment);
//! let db = assembler.on_span_start("INSERT orders", segment);
//! assembler.set_peer(db, "postgres:5432");
//! assembler.on_span_end(db, Vec::new());
//! assembler.on_span_end(entry, Vec::new());
//!
//! let snapshot = agent.shutdown().await;
//! println!("{}", snapshot.segments_sent);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod assembler;
pub mod channel_manager;
pub mod client;
pub mod config;
pub mod dictionary;
pub mod metrics;
pub mod pipeline;
pub mod sampler;
pub mod segment;

pub use agent::{generate_instance_uuid, AgentError, TraceAgent};
pub use assembler::{DiscardReason, SegmentAssembler, SpanEndOutcome, SpanRef};
pub use channel_manager::{
    AtomicChannelState, ChannelManager, ChannelState, HealthEvent, HealthTracker, TransmitReport,
    PROBE_FAILURE_THRESHOLD,
};
pub use client::{Ack, CollectorClient, CollectorError, LoggingCollector};
pub use config::{AgentConfig, ConfigError};
pub use dictionary::{DictionaryCache, NULL_CODE};
pub use metrics::{AgentMetrics, AgentSnapshot};
pub use pipeline::Pipeline;
pub use sampler::{IgnoreSuffixFilter, SegmentSampler, SAMPLE_WINDOW};
pub use segment::{
    EncodedSegment, EncodedSpan, EndpointRef, SealedSegment, SegmentBatch, SegmentId, Span,
    SpanKind, SpanLayer, Tag, TraceSegment,
};
