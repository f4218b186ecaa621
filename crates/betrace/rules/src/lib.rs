//! BeTrace Rules - the rule pattern language and evaluation engine.
//!
//! Source text compiles through lexer -> parser -> AST, and compiled rules
//! evaluate against completed traces inside a capability sandbox: the only
//! externally visible side effect reachable from rule evaluation is signal
//! emission through the injected [`SignalSink`], passed explicitly into
//! each evaluation call. There is no ambient context to leak between
//! tenants.
//!
//! The language (examples):
//!
//! ```text
//! trace.has(payment.charge).where(amount > 1000)
//! trace.count(db.retry) > 3
//! trace.order(authz.check before db.write)
//! trace.has(*).where("db.query" exists) and not trace.has(*).where("audit.log" exists)
//! when { trace.has(payment.charge) } always { trace.has(fraud.check) }
//! ```

#![deny(unsafe_code)]

mod ast;
mod capability;
mod engine;
mod error;
mod eval;
mod lexer;
mod parser;
mod token;

pub use ast::{AttrFilter, CmpOp, Condition, FilterPredicate, LitValue, RuleExpr, SpanCheck};
pub use capability::{CapabilityError, CollectingSink, SignalDraft, SignalSink};
pub use engine::{
    compile_rule, CompiledRule, EngineStats, RuleEngine, RuleOutcome, DEFAULT_STEP_BUDGET,
    MAX_RULES,
};
pub use error::RuleError;
pub use eval::{evaluate, EvalBudget, RuleMatch};
pub use parser::parse;
