//! Segment and span data model.
//!
//! A [`TraceSegment`] is open while its entry span runs and can only grow.
//! Sealing consumes it into a [`SealedSegment`], which exposes no mutators, and
//! encoding turns that into the [`EncodedSegment`] that crosses the ring buffer.

use crate::dictionary::{DictionaryCache, NULL_CODE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identifier of one segment, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Position of a span in the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    /// First span of a segment, where the request entered the service
    Entry,
    Local,
    /// Outgoing call to a peer
    Exit,
}

/// Component family a span belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanLayer {
    #[default]
    Unknown,
    Database,
    RpcFramework,
    Http,
    Mq,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One timed operation inside a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Index within the segment, starting at 0
    pub span_id: i32,
    /// `-1` for the entry span
    pub parent_span_id: i32,
    pub operation_name: String,
    pub kind: SpanKind,
    pub layer: SpanLayer,
    /// Unix millis
    pub start_time: u64,
    /// Unix millis; 0 while the span is open
    pub end_time: u64,
    pub peer: Option<String>,
    pub is_error: bool,
    pub tags: Vec<Tag>,
}

impl Span {
    pub(crate) fn start(span_id: i32, parent_span_id: i32, operation_name: &str) -> Self {
        Self {
            span_id,
            parent_span_id,
            operation_name: operation_name.to_owned(),
            kind: if parent_span_id < 0 {
                SpanKind::Entry
            } else {
                SpanKind::Local
            },
            layer: SpanLayer::Unknown,
            start_time: now_millis(),
            end_time: 0,
            peer: None,
            is_error: false,
            tags: Vec::new(),
        }
    }

    pub(crate) fn finish(&mut self, tags: Vec<Tag>) {
        self.end_time = now_millis().max(self.start_time);
        self.tags.extend(tags);
    }

    /// Wall-clock duration in millis.
    pub fn duration_millis(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// A segment still collecting spans.
#[derive(Debug)]
pub struct TraceSegment {
    id: SegmentId,
    spans: Vec<Span>,
    ignored: bool,
}

impl TraceSegment {
    pub fn new(id: SegmentId, ignored: bool) -> Self {
        Self {
            id,
            spans: Vec::new(),
            ignored,
        }
    }

    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[inline]
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    #[inline]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub(crate) fn push(&mut self, span: Span) -> usize {
        self.spans.push(span);
        self.spans.len() - 1
    }

    pub(crate) fn span_mut(&mut self, index: usize) -> Option<&mut Span> {
        self.spans.get_mut(index)
    }

    /// Freezes the segment.
    pub fn seal(self) -> SealedSegment {
        SealedSegment {
            id: self.id,
            spans: self.spans,
            ignored: self.ignored,
        }
    }
}

/// A finished segment. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSegment {
    id: SegmentId,
    spans: Vec<Span>,
    ignored: bool,
}

impl SealedSegment {
    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[inline]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    #[inline]
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    /// Replaces endpoint and peer names with dictionary codes where available.
    pub fn encode(&self, endpoints: &DictionaryCache, services: &DictionaryCache) -> EncodedSegment {
        let spans = self
            .spans
            .iter()
            .map(|span| EncodedSpan {
                span_id: span.span_id,
                parent_span_id: span.parent_span_id,
                endpoint: EndpointRef::resolve(endpoints, &span.operation_name),
                peer: span
                    .peer
                    .as_deref()
                    .map(|peer| EndpointRef::resolve(services, peer)),
                kind: span.kind,
                layer: span.layer,
                start_time: span.start_time,
                end_time: span.end_time,
                is_error: span.is_error,
                tags: span.tags.clone(),
            })
            .collect();

        EncodedSegment {
            segment_id: self.id,
            spans,
        }
    }
}

/// A name either as its dictionary code or, while no code is known for it, raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRef {
    Code(u32),
    Name(String),
}

impl EndpointRef {
    fn resolve(dictionary: &DictionaryCache, name: &str) -> Self {
        match dictionary.resolve(name) {
            NULL_CODE => Self::Name(name.to_owned()),
            code => Self::Code(code),
        }
    }

    #[inline]
    pub fn is_code(&self) -> bool {
        matches!(self, Self::Code(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSpan {
    pub span_id: i32,
    pub parent_span_id: i32,
    pub endpoint: EndpointRef,
    pub peer: Option<EndpointRef>,
    pub kind: SpanKind,
    pub layer: SpanLayer,
    pub start_time: u64,
    pub end_time: u64,
    pub is_error: bool,
    pub tags: Vec<Tag>,
}

/// What producers hand to the ring buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSegment {
    pub segment_id: SegmentId,
    pub spans: Vec<EncodedSpan>,
}

/// One transmission unit sent to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentBatch {
    pub service_code: u32,
    pub instance_code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub segments: Vec<EncodedSegment>,
}

impl SegmentBatch {
    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn span_count(&self) -> usize {
        self.segments.iter().map(|s| s.spans.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_with_peer() -> SealedSegment {
        let mut segment = TraceSegment::new(SegmentId(7), false);
        let root = segment.push(Span::start(0, -1, "/orders"));
        let child = segment.push(Span::start(1, 0, "SELECT orders"));
        if let Some(span) = segment.span_mut(child) {
            span.peer = Some("db:5432".into());
            span.kind = SpanKind::Exit;
            span.finish(vec![Tag::new("db.type", "sql")]);
        }
        if let Some(span) = segment.span_mut(root) {
            span.finish(Vec::new());
        }
        segment.seal()
    }

    #[test]
    fn test_entry_span_kind_follows_parent() {
        assert_eq!(Span::start(0, -1, "a").kind, SpanKind::Entry);
        assert_eq!(Span::start(1, 0, "b").kind, SpanKind::Local);
    }

    #[test]
    fn test_encode_uses_codes() {
        let endpoints = DictionaryCache::new("endpoint", 10, 10);
        let services = DictionaryCache::new("service", 10, 10);
        let encoded = sealed_with_peer().encode(&endpoints, &services);

        assert_eq!(encoded.segment_id, SegmentId(7));
        assert_eq!(encoded.spans[0].endpoint, EndpointRef::Code(1));
        assert_eq!(encoded.spans[1].endpoint, EndpointRef::Code(2));
        assert_eq!(encoded.spans[1].peer, Some(EndpointRef::Code(1)));
        assert_eq!(encoded.spans[1].tags, vec![Tag::new("db.type", "sql")]);
    }

    #[test]
    fn test_encode_falls_back_to_raw_names() {
        let endpoints = DictionaryCache::new("endpoint", 1, 10);
        let services = DictionaryCache::new("service", 0, 10);
        let encoded = sealed_with_peer().encode(&endpoints, &services);

        assert_eq!(encoded.spans[0].endpoint, EndpointRef::Code(1));
        assert_eq!(
            encoded.spans[1].endpoint,
            EndpointRef::Name("SELECT orders".into())
        );
        assert_eq!(encoded.spans[1].peer, Some(EndpointRef::Name("db:5432".into())));
    }

    #[test]
    fn test_batch_json_shape() {
        let batch = SegmentBatch {
            service_code: 3,
            instance_code: 9,
            authentication: None,
            segments: vec![EncodedSegment {
                segment_id: SegmentId(1),
                spans: Vec::new(),
            }],
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["service_code"], 3);
        assert!(json.get("authentication").is_none());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.span_count(), 0);
    }
}
