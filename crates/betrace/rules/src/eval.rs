//! Rule evaluation against completed traces.
//!
//! Evaluation is pure with respect to trace data and bounded by a step
//! budget: every condition node and every span test consumes one step, and
//! exhaustion fails closed with [`RuleError::EvaluationTimeout`] rather
//! than hanging a shared evaluation worker.

use std::collections::HashSet;

use betrace_types::{AttrValue, Span, SpanId, SpanRef, Trace};

use crate::ast::{AttrFilter, CmpOp, Condition, FilterPredicate, LitValue, RuleExpr, SpanCheck};
use crate::error::RuleError;

/// Synthetic attribute names resolving to span scalar fields.
const SCALAR_DURATION_MS: &str = "span.duration_ms";
const SCALAR_SERVICE_NAME: &str = "span.service_name";
const SCALAR_OPERATION_NAME: &str = "span.operation_name";

pub(crate) const SCALAR_FIELDS: [&str; 3] =
    [SCALAR_DURATION_MS, SCALAR_SERVICE_NAME, SCALAR_OPERATION_NAME];

/// Cooperative cancellation: evaluation checks the budget at every step.
pub struct EvalBudget {
    budget: u64,
    remaining: u64,
}

impl EvalBudget {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            remaining: budget,
        }
    }

    pub fn steps_used(&self) -> u64 {
        self.budget - self.remaining
    }

    fn charge(&mut self, cost: u64) -> Result<(), RuleError> {
        if self.remaining < cost {
            return Err(RuleError::EvaluationTimeout {
                budget: self.budget,
            });
        }
        self.remaining -= cost;
        Ok(())
    }
}

/// One rule match, referencing the exact spans that satisfied the
/// predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleMatch {
    pub spans: Vec<SpanRef>,
}

/// Evaluate a compiled rule expression against a trace.
///
/// A bare condition matches when it holds. An invariant rule matches
/// (i.e. reports a violation) when `when` holds and `always` fails or
/// `never` holds. Repeated evaluation of the same expression over the
/// same trace yields identical matches.
pub fn evaluate(
    expr: &RuleExpr,
    trace: &Trace,
    budget: &mut EvalBudget,
) -> Result<Vec<RuleMatch>, RuleError> {
    match expr {
        RuleExpr::Simple(condition) => {
            let (matched, spans) = eval_condition(condition, trace, budget)?;
            if matched {
                Ok(vec![RuleMatch {
                    spans: dedup_spans(spans),
                }])
            } else {
                Ok(vec![])
            }
        }
        RuleExpr::Invariant { when, always, never } => {
            let (triggered, mut spans) = eval_condition(when, trace, budget)?;
            if !triggered {
                return Ok(vec![]);
            }

            let mut violated = false;
            if let Some(always) = always {
                let (holds, _) = eval_condition(always, trace, budget)?;
                if !holds {
                    violated = true;
                }
            }
            if let Some(never) = never {
                let (holds, never_spans) = eval_condition(never, trace, budget)?;
                if holds {
                    violated = true;
                    spans.extend(never_spans);
                }
            }

            if violated {
                Ok(vec![RuleMatch {
                    spans: dedup_spans(spans),
                }])
            } else {
                Ok(vec![])
            }
        }
    }
}

fn eval_condition(
    condition: &Condition,
    trace: &Trace,
    budget: &mut EvalBudget,
) -> Result<(bool, Vec<SpanRef>), RuleError> {
    budget.charge(1)?;
    match condition {
        Condition::Or(left, right) => {
            let (matched, spans) = eval_condition(left, trace, budget)?;
            if matched {
                return Ok((true, spans));
            }
            eval_condition(right, trace, budget)
        }
        Condition::And(left, right) => {
            let (left_matched, mut spans) = eval_condition(left, trace, budget)?;
            if !left_matched {
                return Ok((false, vec![]));
            }
            let (right_matched, right_spans) = eval_condition(right, trace, budget)?;
            if !right_matched {
                return Ok((false, vec![]));
            }
            spans.extend(right_spans);
            Ok((true, spans))
        }
        Condition::Not(inner) => {
            let (matched, _) = eval_condition(inner, trace, budget)?;
            Ok((!matched, vec![]))
        }
        Condition::Check(check) => eval_check(check, trace, budget),
    }
}

fn eval_check(
    check: &SpanCheck,
    trace: &Trace,
    budget: &mut EvalBudget,
) -> Result<(bool, Vec<SpanRef>), RuleError> {
    match check {
        SpanCheck::Has { operation, filters } => {
            let mut matched = Vec::new();
            for span in &trace.spans {
                budget.charge(1)?;
                if operation_matches(operation, span) && filters_pass(filters, span) {
                    matched.push(span_ref(span));
                }
            }
            Ok((!matched.is_empty(), matched))
        }
        SpanCheck::Count { operation, op, value } => {
            let mut matched = Vec::new();
            for span in &trace.spans {
                budget.charge(1)?;
                if operation_matches(operation, span) {
                    matched.push(span_ref(span));
                }
            }
            let count = matched.len() as f64;
            let holds = match op {
                CmpOp::Eq => count == *value,
                CmpOp::Ne => count != *value,
                CmpOp::Lt => count < *value,
                CmpOp::Le => count <= *value,
                CmpOp::Gt => count > *value,
                CmpOp::Ge => count >= *value,
                // Rejected at parse time.
                CmpOp::In | CmpOp::Matches => false,
            };
            if holds {
                Ok((true, matched))
            } else {
                Ok((false, vec![]))
            }
        }
        SpanCheck::Order { first, second } => {
            // Existential: if any qualifying pair exists, the earliest
            // `first`-named span is part of one.
            let mut earliest_first: Option<&Span> = None;
            for span in &trace.spans {
                budget.charge(1)?;
                if operation_matches(first, span)
                    && earliest_first.map_or(true, |best| span.start_time < best.start_time)
                {
                    earliest_first = Some(span);
                }
            }
            let Some(a) = earliest_first else {
                return Ok((false, vec![]));
            };

            let mut earliest_second: Option<&Span> = None;
            for span in &trace.spans {
                budget.charge(1)?;
                if operation_matches(second, span)
                    && span.start_time > a.start_time
                    && earliest_second.map_or(true, |best| span.start_time < best.start_time)
                {
                    earliest_second = Some(span);
                }
            }
            match earliest_second {
                Some(b) => Ok((true, vec![span_ref(a), span_ref(b)])),
                None => Ok((false, vec![])),
            }
        }
    }
}

fn operation_matches(operation: &str, span: &Span) -> bool {
    operation == "*" || span.operation_name == operation
}

fn filters_pass(filters: &[AttrFilter], span: &Span) -> bool {
    filters.iter().all(|filter| filter_passes(filter, span))
}

fn filter_passes(filter: &AttrFilter, span: &Span) -> bool {
    let value = resolve_attr(span, &filter.key);
    match &filter.predicate {
        FilterPredicate::Exists => value.is_some(),
        FilterPredicate::Cmp { op, value: lit } => match value {
            Some(attr) => compare(&attr, *op, lit),
            // An absent attribute satisfies no comparison.
            None => false,
        },
    }
}

/// Resolve an attribute key against a span: the reserved `span.` names map
/// to scalar fields, everything else is an attribute lookup.
fn resolve_attr(span: &Span, key: &str) -> Option<AttrValue> {
    match key {
        SCALAR_DURATION_MS => Some(AttrValue::Float(span.duration_ms())),
        SCALAR_SERVICE_NAME => Some(AttrValue::Str(span.service_name.clone())),
        SCALAR_OPERATION_NAME => Some(AttrValue::Str(span.operation_name.clone())),
        _ => span.attributes.get(key).cloned(),
    }
}

fn compare(attr: &AttrValue, op: CmpOp, lit: &LitValue) -> bool {
    match op {
        CmpOp::Eq => value_equals(attr, lit),
        CmpOp::Ne => !value_equals(attr, lit),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => ordered_compare(attr, op, lit),
        CmpOp::In => match lit {
            LitValue::List(items) => items.iter().any(|item| item == &attr.to_string()),
            LitValue::Str(s) => s.contains(&attr.to_string()),
            _ => false,
        },
        CmpOp::Matches => match lit {
            LitValue::Str(pattern) => attr.to_string().contains(pattern),
            _ => false,
        },
    }
}

fn value_equals(attr: &AttrValue, lit: &LitValue) -> bool {
    match lit {
        LitValue::Num(n) => attr.as_f64() == Some(*n),
        LitValue::Bool(b) => matches!(attr, AttrValue::Bool(v) if v == b),
        LitValue::Str(s) => attr.as_str() == Some(s.as_str()),
        LitValue::List(_) => false,
    }
}

/// Ordering comparisons are numeric when both sides coerce to numbers,
/// lexicographic otherwise.
fn ordered_compare(attr: &AttrValue, op: CmpOp, lit: &LitValue) -> bool {
    let lit_num = match lit {
        LitValue::Num(n) => Some(*n),
        LitValue::Str(s) => s.parse::<f64>().ok(),
        _ => None,
    };

    if let (Some(a), Some(b)) = (attr.as_f64(), lit_num) {
        return match op {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            _ => false,
        };
    }

    let LitValue::Str(b) = lit else {
        return false;
    };
    let a = attr.to_string();
    match op {
        CmpOp::Lt => a.as_str() < b.as_str(),
        CmpOp::Le => a.as_str() <= b.as_str(),
        CmpOp::Gt => a.as_str() > b.as_str(),
        CmpOp::Ge => a.as_str() >= b.as_str(),
        _ => false,
    }
}

fn span_ref(span: &Span) -> SpanRef {
    SpanRef {
        trace_id: span.trace_id.clone(),
        span_id: span.span_id.clone(),
        service_name: span.service_name.clone(),
    }
}

fn dedup_spans(spans: Vec<SpanRef>) -> Vec<SpanRef> {
    let mut seen: HashSet<SpanId> = HashSet::new();
    spans
        .into_iter()
        .filter(|span| seen.insert(span.span_id.clone()))
        .collect()
}
