//! Agent configuration.
//!
//! One immutable [`AgentConfig`] value is built (or parsed), validated once, and
//! handed to each component at construction. Nothing here is global: two agents
//! in one process (or two tests) can run with different settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Static-asset suffixes excluded from tracing by default.
pub const DEFAULT_IGNORE_SUFFIX: &str =
    ".jpg,.jpeg,.js,.css,.png,.bmp,.gif,.ico,.mp3,.mp4,.html,.svg";

/// Configuration errors, raised before any producer can observe the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("agent.service_name must not be blank")]
    MissingServiceName,
    #[error("agent.span_limit_per_segment must be at least 1")]
    ZeroSpanLimit,
    #[error("agent.ignore_suffix contains a blank entry")]
    BlankIgnoreSuffix,
    #[error("collector.backend_service must list at least one address")]
    NoBackendService,
    #[error("collector.backend_service contains a blank address")]
    BlankBackendAddress,
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },
    #[error("collector.max_batch must be at least 1")]
    ZeroMaxBatch,
    #[error("invalid buffer configuration: {0}")]
    Buffer(#[from] ringlane::ConfigError),
    #[error("invalid configuration document: {0}")]
    Parse(String),
}

/// Identity and per-segment limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Optional namespace, registered as `namespace/service_name`
    pub namespace: String,
    /// Logical service name shown by the collector
    pub service_name: String,
    /// Token forwarded with every batch; empty means none
    pub authentication: String,
    /// Segments admitted per 3-second window; `<= 0` disables sampling
    pub sample_n_per_3_secs: i32,
    /// Root operation name suffixes that are never traced
    pub ignore_suffix: Vec<String>,
    /// Real spans kept per segment before placeholders take over
    pub span_limit_per_segment: usize,
    /// Instance identity; generated at start when empty
    pub instance_uuid: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            service_name: String::new(),
            authentication: String::new(),
            sample_n_per_3_secs: -1,
            ignore_suffix: DEFAULT_IGNORE_SUFFIX
                .split(',')
                .map(str::to_owned)
                .collect(),
            span_limit_per_segment: 300,
            instance_uuid: String::new(),
        }
    }
}

/// Collector connection and reporting cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    /// Collector addresses, tried in rotation on reconnect
    pub backend_service: Vec<String>,
    #[serde(with = "duration_ms")]
    pub channel_check_interval: Duration,
    #[serde(with = "duration_ms")]
    pub register_check_interval: Duration,
    /// Upper bound for one health probe
    #[serde(with = "duration_ms")]
    pub probe_timeout: Duration,
    /// Transmit loop cadence
    #[serde(with = "duration_ms")]
    pub transmit_interval: Duration,
    /// Segments per transmitted batch
    pub max_batch: usize,
    /// Time allowed for the in-flight transmit on shutdown
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            backend_service: vec!["127.0.0.1:11800".to_owned()],
            channel_check_interval: Duration::from_secs(30),
            register_check_interval: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(5),
            transmit_interval: Duration::from_millis(20),
            max_batch: 1000,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Ring buffer sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    /// Number of lanes
    pub channel_size: usize,
    /// Slots per lane
    pub buffer_size: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            channel_size: 5,
            buffer_size: 300,
        }
    }
}

/// Dictionary capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionarySection {
    pub service_code_buffer_size: usize,
    pub endpoint_name_buffer_size: usize,
    /// Names remembered for re-registration after resolving to NULL
    pub unresolved_backlog: usize,
}

impl Default for DictionarySection {
    fn default() -> Self {
        Self {
            service_code_buffer_size: 10 * 10_000,
            endpoint_name_buffer_size: 1000 * 10_000,
            unresolved_backlog: 1000,
        }
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub collector: CollectorSection,
    pub buffer: BufferSection,
    pub dictionary: DictionarySection,
}

impl AgentConfig {
    /// Default configuration for the given service.
    pub fn new(service_name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.agent.service_name = service_name.into();
        config
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.service_name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }
        if self.agent.span_limit_per_segment == 0 {
            return Err(ConfigError::ZeroSpanLimit);
        }
        if self.agent.ignore_suffix.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::BlankIgnoreSuffix);
        }

        if self.collector.backend_service.is_empty() {
            return Err(ConfigError::NoBackendService);
        }
        if self
            .collector
            .backend_service
            .iter()
            .any(|addr| addr.trim().is_empty())
        {
            return Err(ConfigError::BlankBackendAddress);
        }
        let intervals = [
            ("collector.channel_check_interval", self.collector.channel_check_interval),
            ("collector.register_check_interval", self.collector.register_check_interval),
            ("collector.probe_timeout", self.collector.probe_timeout),
            ("collector.transmit_interval", self.collector.transmit_interval),
            ("collector.shutdown_grace", self.collector.shutdown_grace),
        ];
        for (field, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::ZeroInterval { field });
            }
        }
        if self.collector.max_batch == 0 {
            return Err(ConfigError::ZeroMaxBatch);
        }

        self.channel_config().validate()?;
        Ok(())
    }

    /// Lane channel settings derived from the buffer section.
    pub fn channel_config(&self) -> ringlane::Config {
        ringlane::Config::new(self.buffer.channel_size, self.buffer.buffer_size, true)
    }

    /// Service name as registered with the collector.
    pub fn qualified_service_name(&self) -> String {
        if self.agent.namespace.is_empty() {
            self.agent.service_name.clone()
        } else {
            format!("{}/{}", self.agent.namespace, self.agent.service_name)
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
