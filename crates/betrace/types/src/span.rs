//! Span and trace model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ids::{SpanId, TraceId};

/// A typed span attribute value.
///
/// Variant order matters for untagged deserialization: booleans and
/// integers must be tried before floats and strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttrValue {
    /// Numeric view of the value, coercing parseable strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(n) => Some(*n as f64),
            AttrValue::Float(f) => Some(*f),
            AttrValue::Str(s) => s.parse().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness used by the rule language: false/empty/zero are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            AttrValue::Bool(b) => *b,
            AttrValue::Int(n) => *n != 0,
            AttrValue::Float(f) => *f != 0.0,
            AttrValue::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(n) => write!(f, "{}", n),
            AttrValue::Float(x) => write!(f, "{}", x),
            AttrValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// A single recorded operation, immutable once ingested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// Empty for root spans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub service_name: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Ordered attribute map; keys follow OpenTelemetry dotted naming.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Span {
    /// A root span has no parent (or an explicitly empty parent id).
    pub fn is_root(&self) -> bool {
        match &self.parent_span_id {
            None => true,
            Some(parent) => parent.is_empty(),
        }
    }

    pub fn duration_ms(&self) -> f64 {
        (self.end_time - self.start_time).num_microseconds().unwrap_or(0) as f64 / 1_000.0
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }
}

/// All spans sharing one trace identifier, assembled by the aggregator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Trace {
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Spans whose operation name matches exactly.
    pub fn spans_named<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a Span> {
        self.spans.iter().filter(move |s| s.operation_name == operation)
    }

    pub fn root_span(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.is_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn span_at(start_ms: i64, end_ms: i64) -> Span {
        Span {
            trace_id: TraceId::from("t1"),
            span_id: SpanId::from("s1"),
            parent_span_id: None,
            service_name: "auth".into(),
            operation_name: "login".into(),
            start_time: Utc.timestamp_millis_opt(start_ms).unwrap(),
            end_time: Utc.timestamp_millis_opt(end_ms).unwrap(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn root_detection() {
        let mut span = span_at(0, 100);
        assert!(span.is_root());

        span.parent_span_id = Some(SpanId::from(""));
        assert!(span.is_root());

        span.parent_span_id = Some(SpanId::from("parent"));
        assert!(!span.is_root());
    }

    #[test]
    fn duration_in_milliseconds() {
        let span = span_at(0, 250);
        assert_eq!(span.duration_ms(), 250.0);
    }

    #[test]
    fn attr_value_coercions() {
        assert_eq!(AttrValue::Int(5).as_f64(), Some(5.0));
        assert_eq!(AttrValue::Str("2.5".into()).as_f64(), Some(2.5));
        assert_eq!(AttrValue::Bool(true).as_f64(), None);
        assert!(AttrValue::Str("x".into()).is_truthy());
        assert!(!AttrValue::Str("".into()).is_truthy());
        assert!(!AttrValue::Int(0).is_truthy());
    }

    #[test]
    fn attr_value_untagged_deserialization() {
        let v: AttrValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, AttrValue::Bool(true));
        let v: AttrValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, AttrValue::Int(42));
        let v: AttrValue = serde_json::from_str("4.5").unwrap();
        assert_eq!(v, AttrValue::Float(4.5));
        let v: AttrValue = serde_json::from_str("\"GET\"").unwrap();
        assert_eq!(v, AttrValue::Str("GET".into()));
    }
}
