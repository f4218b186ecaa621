//! Abstract syntax tree for the rule language.

use std::fmt;

/// Top-level rule form.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleExpr {
    /// A bare condition: match when it evaluates true.
    Simple(Condition),
    /// A conditional invariant: match (violation) when `when` holds and
    /// `always` fails or `never` holds.
    Invariant {
        when: Condition,
        always: Option<Condition>,
        never: Option<Condition>,
    },
}

/// Boolean expression over span checks.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Or(Box<Condition>, Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Check(SpanCheck),
}

/// The span-level predicates.
#[derive(Clone, Debug, PartialEq)]
pub enum SpanCheck {
    /// `trace.has(op).where(...)...` - existence of a matching span.
    /// Operation `*` matches any span.
    Has {
        operation: String,
        filters: Vec<AttrFilter>,
    },
    /// `trace.count(op) <cmp> n` - count of matching spans.
    Count {
        operation: String,
        op: CmpOp,
        value: f64,
    },
    /// `trace.order(a before b)` - some span named `a` starts before some
    /// span named `b`.
    Order { first: String, second: String },
}

/// One `.where(...)` clause.
#[derive(Clone, Debug, PartialEq)]
pub struct AttrFilter {
    pub key: String,
    pub predicate: FilterPredicate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterPredicate {
    /// `attr exists` - the attribute is present, whatever its value.
    Exists,
    /// `attr <cmp> value`
    Cmp { op: CmpOp, value: LitValue },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Matches,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmpOp::Eq => write!(f, "=="),
            CmpOp::Ne => write!(f, "!="),
            CmpOp::Lt => write!(f, "<"),
            CmpOp::Le => write!(f, "<="),
            CmpOp::Gt => write!(f, ">"),
            CmpOp::Ge => write!(f, ">="),
            CmpOp::In => write!(f, "in"),
            CmpOp::Matches => write!(f, "matches"),
        }
    }
}

/// Literal values on the right-hand side of a comparison. Unquoted
/// identifiers (enum-like values such as `USD`) are treated as strings.
#[derive(Clone, Debug, PartialEq)]
pub enum LitValue {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<String>),
}

impl fmt::Display for LitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LitValue::Str(s) => write!(f, "\"{}\"", s),
            LitValue::Num(n) => write!(f, "{}", n),
            LitValue::Bool(b) => write!(f, "{}", b),
            LitValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for SpanCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanCheck::Has { operation, filters } => {
                write!(f, "trace.has({})", operation)?;
                for filter in filters {
                    match &filter.predicate {
                        FilterPredicate::Exists => write!(f, ".where({} exists)", filter.key)?,
                        FilterPredicate::Cmp { op, value } => {
                            write!(f, ".where({} {} {})", filter.key, op, value)?
                        }
                    }
                }
                Ok(())
            }
            SpanCheck::Count { operation, op, value } => {
                write!(f, "trace.count({}) {} {}", operation, op, value)
            }
            SpanCheck::Order { first, second } => {
                write!(f, "trace.order({} before {})", first, second)
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Or(left, right) => write!(f, "({} or {})", left, right),
            Condition::And(left, right) => write!(f, "({} and {})", left, right),
            Condition::Not(inner) => write!(f, "(not {})", inner),
            Condition::Check(check) => write!(f, "{}", check),
        }
    }
}

impl fmt::Display for RuleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleExpr::Simple(condition) => write!(f, "{}", condition),
            RuleExpr::Invariant { when, always, never } => {
                write!(f, "when {{ {} }}", when)?;
                if let Some(always) = always {
                    write!(f, " always {{ {} }}", always)?;
                }
                if let Some(never) = never {
                    write!(f, " never {{ {} }}", never)?;
                }
                Ok(())
            }
        }
    }
}
