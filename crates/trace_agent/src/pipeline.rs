use crate::config::{AgentConfig, ConfigError};
use crate::dictionary::DictionaryCache;
use crate::metrics::AgentMetrics;
use crate::sampler::{IgnoreSuffixFilter, SegmentSampler};
use crate::segment::EncodedSegment;
use ringlane::Channel;

/// State shared by every producer thread and the channel manager.
#[derive(Debug)]
pub struct Pipeline {
    pub(crate) sampler: SegmentSampler,
    pub(crate) ignore: IgnoreSuffixFilter,
    pub(crate) services: DictionaryCache,
    pub(crate) endpoints: DictionaryCache,
    pub(crate) channel: Channel<EncodedSegment>,
    pub(crate) metrics: AgentMetrics,
    pub(crate) span_limit: usize,
}

impl Pipeline {
    pub fn new(config: &AgentConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            sampler: SegmentSampler::new(config.agent.sample_n_per_3_secs),
            ignore: IgnoreSuffixFilter::new(config.agent.ignore_suffix.iter().cloned()),
            services: DictionaryCache::new(
                "service",
                config.dictionary.service_code_buffer_size,
                config.dictionary.unresolved_backlog,
            ),
            endpoints: DictionaryCache::new(
                "endpoint",
                config.dictionary.endpoint_name_buffer_size,
                config.dictionary.unresolved_backlog,
            ),
            channel: Channel::new(config.channel_config())?,
            metrics: AgentMetrics::default(),
            span_limit: config.agent.span_limit_per_segment,
        })
    }

    pub fn sampler(&self) -> &SegmentSampler {
        &self.sampler
    }

    pub fn services(&self) -> &DictionaryCache {
        &self.services
    }

    pub fn endpoints(&self) -> &DictionaryCache {
        &self.endpoints
    }

    pub fn channel(&self) -> &Channel<EncodedSegment> {
        &self.channel
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }
}
