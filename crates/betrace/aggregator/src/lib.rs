//! BeTrace Aggregator - groups spans into traces and decides completeness.
//!
//! Spans are correlated by trace id into per-trace entries held in a
//! sharded concurrent map; the entry for one trace id is only ever mutated
//! under its own shard lock. A trace becomes complete when its root span
//! has closed or when the idle window elapses, whichever comes first, and
//! completeness never flips back.

#![deny(unsafe_code)]

mod state;

pub use state::TraceState;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use betrace_types::{Span, SpanId, Trace, TraceId};

/// Default idle window after the last span before a trace is considered
/// complete. Tunable, not contractual.
pub const DEFAULT_IDLE_TIMEOUT_SECS: i64 = 30;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("malformed span: {reason}")]
    MalformedSpan { reason: String },

    #[error("unknown trace {0}")]
    UnknownTrace(TraceId),

    #[error("trace {0} is not complete")]
    NotComplete(TraceId),
}

struct TraceEntry {
    /// Keyed by span id: a duplicate span id replaces the earlier span
    /// (last-write-wins).
    spans: BTreeMap<SpanId, Span>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    state: TraceState,
    /// End time of the root span, once one has been observed.
    root_end: Option<DateTime<Utc>>,
}

impl TraceEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            spans: BTreeMap::new(),
            first_seen: now,
            last_seen: now,
            state: TraceState::Open,
            root_end: None,
        }
    }

    fn absorb(&mut self, span: Span, now: DateTime<Utc>) {
        if span.is_root() {
            self.root_end = Some(span.end_time);
        }
        self.spans.insert(span.span_id.clone(), span);
        self.last_seen = now;
    }

    /// Promote `Open -> Complete` when either completion condition holds.
    fn promote_if_complete(&mut self, idle_timeout: Duration, now: DateTime<Utc>) {
        if self.state != TraceState::Open {
            return;
        }
        let root_closed = self.root_end.is_some_and(|end| now >= end);
        let idle = now - self.last_seen >= idle_timeout;
        if (root_closed || idle) && self.state.can_advance_to(TraceState::Complete) {
            self.state = TraceState::Complete;
        }
    }

    fn into_trace(self, trace_id: TraceId) -> Trace {
        let mut spans: Vec<Span> = self.spans.into_values().collect();
        spans.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.span_id.cmp(&b.span_id))
        });
        Trace {
            trace_id,
            spans,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

/// Correlates incoming spans by trace id and hands completed traces to
/// rule evaluation via [`drain`](Self::drain).
pub struct TraceAggregator {
    entries: DashMap<TraceId, TraceEntry>,
    idle_timeout: Duration,
}

impl TraceAggregator {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn with_default_timeout() -> Self {
        Self::new(Duration::seconds(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Append a span to its in-progress trace, creating the entry if
    /// absent. Duplicate span ids are absorbed last-write-wins. A span
    /// arriving after its trace was drained starts a fresh trace entry.
    ///
    /// Logically inconsistent but well-formed spans (end before start) are
    /// stored as-is; relevance is the rule engine's call, not ours.
    pub fn add_span(&self, span: Span) -> Result<(), AggregatorError> {
        Self::validate_span(&span)?;

        let now = Utc::now();
        self.entries
            .entry(span.trace_id.clone())
            .or_insert_with(|| TraceEntry::new(now))
            .absorb(span, now);
        Ok(())
    }

    /// Boundary validation shared with ingestion callers: a span without
    /// a trace id or span id never enters the pipeline.
    pub fn validate_span(span: &Span) -> Result<(), AggregatorError> {
        if span.trace_id.is_empty() {
            return Err(AggregatorError::MalformedSpan {
                reason: "missing trace id".into(),
            });
        }
        if span.span_id.is_empty() {
            return Err(AggregatorError::MalformedSpan {
                reason: "missing span id".into(),
            });
        }
        Ok(())
    }

    /// True once the trace has reached `Complete`. Monotonic for the
    /// remainder of the trace's lifecycle.
    pub fn is_complete(&self, trace_id: &TraceId) -> bool {
        self.is_complete_at(trace_id, Utc::now())
    }

    pub fn is_complete_at(&self, trace_id: &TraceId, now: DateTime<Utc>) -> bool {
        let Some(mut entry) = self.entries.get_mut(trace_id) else {
            return false;
        };
        entry.promote_if_complete(self.idle_timeout, now);
        entry.state == TraceState::Complete
    }

    /// Promote every eligible trace and return the ids currently complete
    /// and awaiting drain. Driven by the pipeline's sweep ticker.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<TraceId> {
        let mut complete = Vec::new();
        for mut entry in self.entries.iter_mut() {
            entry.promote_if_complete(self.idle_timeout, now);
            if entry.state == TraceState::Complete {
                complete.push(entry.key().clone());
            }
        }
        complete.sort();
        complete
    }

    /// Remove and return the assembled trace for hand-off to rule
    /// evaluation. The entry transitions `Complete -> Drained` (terminal);
    /// subsequent spans for the same id start a fresh trace.
    pub fn drain(&self, trace_id: &TraceId) -> Result<Trace, AggregatorError> {
        match self
            .entries
            .remove_if(trace_id, |_, entry| entry.state == TraceState::Complete)
        {
            Some((id, entry)) => {
                debug!(trace_id = %id, spans = entry.spans.len(), "trace drained");
                Ok(entry.into_trace(id))
            }
            None => {
                if self.entries.contains_key(trace_id) {
                    Err(AggregatorError::NotComplete(trace_id.clone()))
                } else {
                    Err(AggregatorError::UnknownTrace(trace_id.clone()))
                }
            }
        }
    }

    /// Number of in-progress (not yet drained) traces.
    pub fn open_traces(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use betrace_types::AttrValue;
    use chrono::TimeZone;
    use std::collections::BTreeMap as Attrs;

    fn span(trace: &str, id: &str, parent: Option<&str>, start_ms: i64, end_ms: i64) -> Span {
        Span {
            trace_id: TraceId::from(trace),
            span_id: SpanId::from(id),
            parent_span_id: parent.map(SpanId::from),
            service_name: "checkout".into(),
            operation_name: "op".into(),
            start_time: Utc.timestamp_millis_opt(start_ms).unwrap(),
            end_time: Utc.timestamp_millis_opt(end_ms).unwrap(),
            attributes: Attrs::new(),
        }
    }

    #[test]
    fn root_and_child_complete_and_drain_two_spans() {
        let agg = TraceAggregator::with_default_timeout();
        agg.add_span(span("T1", "root", None, 0, 100)).unwrap();
        agg.add_span(span("T1", "child", Some("root"), 10, 90)).unwrap();

        // Root end time (epoch + 100ms) is long past.
        assert!(agg.is_complete(&TraceId::from("T1")));

        let trace = agg.drain(&TraceId::from("T1")).unwrap();
        assert_eq!(trace.span_count(), 2);
        assert_eq!(trace.spans[0].span_id, SpanId::from("root"));
        assert_eq!(trace.spans[1].span_id, SpanId::from("child"));
    }

    #[test]
    fn idle_timeout_completes_rootless_trace() {
        let agg = TraceAggregator::new(Duration::seconds(30));
        agg.add_span(span("T2", "a", Some("elsewhere"), 0, 50)).unwrap();

        let received = Utc::now();
        assert!(!agg.is_complete_at(&TraceId::from("T2"), received + Duration::seconds(5)));
        assert!(agg.is_complete_at(&TraceId::from("T2"), received + Duration::seconds(31)));
    }

    #[test]
    fn completeness_is_monotonic() {
        let agg = TraceAggregator::new(Duration::seconds(30));
        agg.add_span(span("T3", "root", None, 0, 100)).unwrap();
        assert!(agg.is_complete(&TraceId::from("T3")));

        // A straggler updates activity but never reopens the trace.
        agg.add_span(span("T3", "late", Some("root"), 20, 30)).unwrap();
        assert!(agg.is_complete(&TraceId::from("T3")));

        let trace = agg.drain(&TraceId::from("T3")).unwrap();
        assert_eq!(trace.span_count(), 2);
    }

    #[test]
    fn duplicate_span_id_is_last_write_wins() {
        let agg = TraceAggregator::with_default_timeout();
        agg.add_span(span("T4", "s", None, 0, 100)).unwrap();
        let mut replacement = span("T4", "s", None, 0, 100);
        replacement
            .attributes
            .insert("retry".into(), AttrValue::Bool(true));
        agg.add_span(replacement).unwrap();

        let trace = agg.drain(&TraceId::from("T4")).unwrap();
        assert_eq!(trace.span_count(), 1);
        assert_eq!(
            trace.spans[0].attribute("retry"),
            Some(&AttrValue::Bool(true))
        );
    }

    #[test]
    fn malformed_spans_are_rejected() {
        let agg = TraceAggregator::with_default_timeout();
        let err = agg.add_span(span("", "s", None, 0, 1)).unwrap_err();
        assert!(matches!(err, AggregatorError::MalformedSpan { .. }));

        let err = agg.add_span(span("T", "", None, 0, 1)).unwrap_err();
        assert!(matches!(err, AggregatorError::MalformedSpan { .. }));
        assert_eq!(agg.open_traces(), 0);
    }

    #[test]
    fn inconsistent_timestamps_are_stored_as_is() {
        let agg = TraceAggregator::with_default_timeout();
        // End before start: accepted, not our call to judge.
        agg.add_span(span("T5", "odd", None, 100, 10)).unwrap();
        assert_eq!(agg.open_traces(), 1);
    }

    #[test]
    fn drain_requires_completeness() {
        let agg = TraceAggregator::new(Duration::seconds(30));
        agg.add_span(span("T6", "a", Some("p"), 0, 50)).unwrap();

        assert_eq!(
            agg.drain(&TraceId::from("T6")),
            Err(AggregatorError::NotComplete(TraceId::from("T6")))
        );
        assert_eq!(
            agg.drain(&TraceId::from("nope")),
            Err(AggregatorError::UnknownTrace(TraceId::from("nope")))
        );
    }

    #[test]
    fn late_span_after_drain_starts_fresh_trace() {
        let agg = TraceAggregator::with_default_timeout();
        agg.add_span(span("T7", "root", None, 0, 100)).unwrap();
        assert!(agg.is_complete(&TraceId::from("T7")));
        let drained = agg.drain(&TraceId::from("T7")).unwrap();
        assert_eq!(drained.span_count(), 1);

        // The drained trace is never reopened; the straggler seeds a new entry.
        agg.add_span(span("T7", "late", Some("root"), 120, 130)).unwrap();
        assert_eq!(agg.open_traces(), 1);
        assert!(!agg.is_complete_at(&TraceId::from("T7"), Utc::now()));
    }

    #[test]
    fn sweep_reports_complete_traces_sorted() {
        let agg = TraceAggregator::new(Duration::seconds(30));
        agg.add_span(span("b-trace", "root", None, 0, 100)).unwrap();
        agg.add_span(span("a-trace", "root", None, 0, 100)).unwrap();
        agg.add_span(span("open", "child", Some("p"), 0, 100)).unwrap();

        let complete = agg.sweep(Utc::now());
        assert_eq!(
            complete,
            vec![TraceId::from("a-trace"), TraceId::from("b-trace")]
        );
    }
}
