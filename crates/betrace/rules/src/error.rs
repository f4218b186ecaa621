use betrace_types::RuleId;
use thiserror::Error;

use crate::capability::CapabilityError;

/// Errors from rule compilation and evaluation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("semantic error: {reason}")]
    Semantic { reason: String },

    #[error("evaluation exceeded step budget of {budget}")]
    EvaluationTimeout { budget: u64 },

    #[error("rule not found: {0}")]
    UnknownRule(RuleId),

    #[error("rule limit exceeded: {limit} rules loaded")]
    RuleLimitExceeded { limit: usize },

    #[error("signal emission failed: {0}")]
    SignalEmission(#[from] CapabilityError),
}
