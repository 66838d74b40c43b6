//! Per-thread segment assembly.
//!
//! Instrumentation calls [`SegmentAssembler::on_span_start`] and
//! [`SegmentAssembler::on_span_end`] in strict nesting order. The assembler
//! keeps one frame stack per open segment; when the entry span's frame is
//! popped the segment is sealed, encoded and offered to the ring buffer.
//!
//! Each thread owns its own assembler (`&mut self` everywhere), so nothing on
//! this path locks apart from a dictionary miss.

use crate::pipeline::Pipeline;
use crate::segment::{SegmentId, Span, SpanKind, SpanLayer, Tag, TraceSegment};
use ringlane::OfferOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Handle to a started span, passed back to [`SegmentAssembler::on_span_end`].
///
/// Each handle carries a sequence number unique within its assembler, so a
/// handle to a span that already ended never matches a later span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanRef {
    segment_id: SegmentId,
    seq: u64,
    span_id: Option<i32>,
}

impl SpanRef {
    #[inline]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// `None` for placeholder spans and spans of untraced segments.
    #[inline]
    pub fn span_id(&self) -> Option<i32> {
        self.span_id
    }

    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.span_id.is_none()
    }
}

/// Why a finished segment was not handed to the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Root operation name matched the suffix exclusion list
    Ignored,
    /// The sampler rejected the segment
    NotSampled,
}

/// Result of ending a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanEndOutcome {
    /// Enclosing spans of the segment are still open
    Open,
    /// Segment sealed and queued for transmission
    Enqueued { spans: usize, placeholders: usize },
    /// Segment sealed, but its lane was full
    Dropped,
    /// Segment sealed after the agent stopped accepting segments
    Closed,
    /// Segment sealed and thrown away
    Discarded(DiscardReason),
    /// The reference is not the innermost open span of an open segment
    Unmatched,
}

#[derive(Debug, Clone, Copy)]
enum FrameKind {
    /// Index into the segment's span list
    Real(usize),
    Placeholder,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    seq: u64,
    kind: FrameKind,
}

#[derive(Debug)]
struct ActiveSegment {
    segment: TraceSegment,
    traced: Option<DiscardReason>,
    stack: Vec<Frame>,
    placeholders: usize,
}

impl ActiveSegment {
    fn parent_span_id(&self) -> i32 {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| match frame.kind {
                FrameKind::Real(index) => Some(index as i32),
                FrameKind::Placeholder => None,
            })
            .unwrap_or(-1)
    }
}

/// Builds segments from span lifecycle events on one thread.
#[derive(Debug)]
pub struct SegmentAssembler {
    pipeline: Arc<Pipeline>,
    active: HashMap<SegmentId, ActiveSegment>,
    next_seq: u64,
}

impl SegmentAssembler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            active: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Starts a span in `segment_id`, opening the segment if it is new.
    ///
    /// The first span of a segment decides its fate: an ignored suffix or a
    /// sampler rejection keeps the frame stack but records nothing. Past the
    /// span limit, new spans become placeholders.
    pub fn on_span_start(&mut self, operation_name: &str, segment_id: SegmentId) -> SpanRef {
        let seq = self.next_seq;
        self.next_seq += 1;
        let pipeline = &self.pipeline;
        let active = self.active.entry(segment_id).or_insert_with(|| {
            let ignored = pipeline.ignore.is_ignored(operation_name);
            let traced = if ignored {
                pipeline.metrics.record_ignored();
                Some(DiscardReason::Ignored)
            } else if !pipeline.sampler.try_admit() {
                pipeline.metrics.record_sampled_out();
                Some(DiscardReason::NotSampled)
            } else {
                None
            };
            ActiveSegment {
                segment: TraceSegment::new(segment_id, ignored),
                traced,
                stack: Vec::new(),
                placeholders: 0,
            }
        });

        let real = active.traced.is_none()
            && active.segment.span_count() < pipeline.span_limit;

        let span_id = if real {
            let span_id = active.segment.span_count() as i32;
            let parent = active.parent_span_id();
            let index = active
                .segment
                .push(Span::start(span_id, parent, operation_name));
            active.stack.push(Frame {
                seq,
                kind: FrameKind::Real(index),
            });
            Some(span_id)
        } else {
            if active.traced.is_none() {
                active.placeholders += 1;
            }
            active.stack.push(Frame {
                seq,
                kind: FrameKind::Placeholder,
            });
            None
        };

        SpanRef {
            segment_id,
            seq,
            span_id,
        }
    }

    /// Ends the innermost open span. Tags on placeholders are dropped.
    pub fn on_span_end(&mut self, span_ref: SpanRef, tags: Vec<Tag>) -> SpanEndOutcome {
        let Some(active) = self.active.get_mut(&span_ref.segment_id) else {
            return SpanEndOutcome::Unmatched;
        };
        if active.stack.last().map(|frame| frame.seq) != Some(span_ref.seq) {
            trace!(
                segment = %span_ref.segment_id,
                seq = span_ref.seq,
                open = active.stack.len(),
                "span ended out of order"
            );
            return SpanEndOutcome::Unmatched;
        }

        if let Some(Frame {
            kind: FrameKind::Real(index),
            ..
        }) = active.stack.pop()
        {
            if let Some(span) = active.segment.span_mut(index) {
                span.finish(tags);
            }
        }

        if !active.stack.is_empty() {
            return SpanEndOutcome::Open;
        }

        match self.active.remove(&span_ref.segment_id) {
            Some(finished) => self.seal(finished),
            None => SpanEndOutcome::Unmatched,
        }
    }

    fn seal(&self, finished: ActiveSegment) -> SpanEndOutcome {
        if let Some(reason) = finished.traced {
            return SpanEndOutcome::Discarded(reason);
        }

        let sealed = finished.segment.seal();
        let encoded = sealed.encode(&self.pipeline.endpoints, &self.pipeline.services);
        let spans = encoded.spans.len();

        debug_assert!(
            spans <= self.pipeline.span_limit,
            "segment {} carries {} spans over limit {}",
            sealed.id(),
            spans,
            self.pipeline.span_limit
        );

        match self.pipeline.channel.try_offer(encoded) {
            OfferOutcome::Accepted => {
                self.pipeline.metrics.record_enqueued(finished.placeholders);
                SpanEndOutcome::Enqueued {
                    spans,
                    placeholders: finished.placeholders,
                }
            }
            OfferOutcome::Full => {
                self.pipeline.metrics.record_dropped();
                trace!(segment = %sealed.id(), "segment dropped, lane full");
                SpanEndOutcome::Dropped
            }
            OfferOutcome::Closed => {
                self.pipeline.metrics.record_rejected_closed();
                trace!(segment = %sealed.id(), "segment rejected, agent stopped");
                SpanEndOutcome::Closed
            }
        }
    }

    /// Records the remote peer of a span and marks it as an exit span.
    ///
    /// Returns `false` for placeholders and unknown references.
    pub fn set_peer(&mut self, span_ref: SpanRef, peer: &str) -> bool {
        self.with_span(span_ref, |span| {
            span.peer = Some(peer.to_owned());
            span.kind = SpanKind::Exit;
        })
    }

    pub fn set_layer(&mut self, span_ref: SpanRef, layer: SpanLayer) -> bool {
        self.with_span(span_ref, |span| span.layer = layer)
    }

    pub fn mark_error(&mut self, span_ref: SpanRef) -> bool {
        self.with_span(span_ref, |span| span.is_error = true)
    }

    fn with_span(&mut self, span_ref: SpanRef, f: impl FnOnce(&mut Span)) -> bool {
        let Some(span_id) = span_ref.span_id else {
            return false;
        };
        let Some(active) = self.active.get_mut(&span_ref.segment_id) else {
            return false;
        };
        if !active.stack.iter().any(|frame| frame.seq == span_ref.seq) {
            return false;
        }
        match active.segment.span_mut(span_id as usize) {
            Some(span) if span.end_time == 0 => {
                f(span);
                true
            }
            _ => false,
        }
    }

    /// Segments with at least one open span on this thread.
    pub fn active_segments(&self) -> usize {
        self.active.len()
    }
}
