//! Rule engine: compiled-rule registry and trace evaluation.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use betrace_types::{Rule, RuleId, SignalId, TenantId, Trace};

use crate::ast::{AttrFilter, Condition, RuleExpr, SpanCheck};
use crate::capability::{SignalDraft, SignalSink};
use crate::error::RuleError;
use crate::eval::{evaluate, EvalBudget, RuleMatch, SCALAR_FIELDS};
use crate::parser::parse;

/// Upper bound on compiled rules held in memory.
pub const MAX_RULES: usize = 100_000;

/// Default per-evaluation step budget. Tunable, not contractual.
pub const DEFAULT_STEP_BUDGET: u64 = 100_000;

/// A rule with its pre-parsed expression.
#[derive(Clone, Debug)]
pub struct CompiledRule {
    pub rule: Rule,
    pub expr: RuleExpr,
}

/// Parse and statically validate one rule.
pub fn compile_rule(rule: &Rule) -> Result<CompiledRule, RuleError> {
    let expr = parse(&rule.source)?;
    validate_expr(&expr)?;
    Ok(CompiledRule {
        rule: rule.clone(),
        expr,
    })
}

/// Static validation: references into the reserved `span.` namespace must
/// name a known scalar field.
fn validate_expr(expr: &RuleExpr) -> Result<(), RuleError> {
    match expr {
        RuleExpr::Simple(condition) => validate_condition(condition),
        RuleExpr::Invariant { when, always, never } => {
            validate_condition(when)?;
            if let Some(always) = always {
                validate_condition(always)?;
            }
            if let Some(never) = never {
                validate_condition(never)?;
            }
            Ok(())
        }
    }
}

fn validate_condition(condition: &Condition) -> Result<(), RuleError> {
    match condition {
        Condition::Or(left, right) | Condition::And(left, right) => {
            validate_condition(left)?;
            validate_condition(right)
        }
        Condition::Not(inner) => validate_condition(inner),
        Condition::Check(SpanCheck::Has { filters, .. }) => {
            for filter in filters {
                validate_filter(filter)?;
            }
            Ok(())
        }
        Condition::Check(_) => Ok(()),
    }
}

fn validate_filter(filter: &AttrFilter) -> Result<(), RuleError> {
    if filter.key.starts_with("span.") && !SCALAR_FIELDS.contains(&filter.key.as_str()) {
        return Err(RuleError::Semantic {
            reason: format!(
                "unknown span field '{}' (expected one of: {})",
                filter.key,
                SCALAR_FIELDS.join(", ")
            ),
        });
    }
    Ok(())
}

/// Outcome of evaluating one rule against one trace.
#[derive(Clone, Debug)]
pub struct RuleOutcome {
    pub rule_id: RuleId,
    pub matched: bool,
    pub signal_id: Option<SignalId>,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub disabled_rules: usize,
    pub compile_errors: usize,
}

/// Manages compiled rules and evaluates them against completed traces.
///
/// Signal emission goes through the [`SignalSink`] passed into each
/// evaluation call; the engine holds no capability state of its own.
pub struct RuleEngine {
    rules: RwLock<HashMap<RuleId, Arc<CompiledRule>>>,
    compile_errors: RwLock<HashMap<RuleId, String>>,
    max_rules: usize,
    step_budget: u64,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::with_limits(MAX_RULES, DEFAULT_STEP_BUDGET)
    }

    pub fn with_limits(max_rules: usize, step_budget: u64) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            compile_errors: RwLock::new(HashMap::new()),
            max_rules,
            step_budget,
        }
    }

    /// Validate rule source without loading it. Returns the same
    /// diagnostics rule authors see on save.
    pub fn validate_source(&self, source: &str) -> Result<(), RuleError> {
        let expr = parse(source)?;
        validate_expr(&expr)
    }

    /// Compile and cache a rule, replacing any previous version under the
    /// same id. Compile failures are recorded and surfaced.
    pub fn load_rule(&self, rule: Rule) -> Result<(), RuleError> {
        {
            let rules = self.rules.read();
            if !rules.contains_key(&rule.id) && rules.len() >= self.max_rules {
                return Err(RuleError::RuleLimitExceeded {
                    limit: self.max_rules,
                });
            }
        }

        let rule_id = rule.id.clone();
        match compile_rule(&rule) {
            Ok(compiled) => {
                self.rules.write().insert(rule_id.clone(), Arc::new(compiled));
                self.compile_errors.write().remove(&rule_id);
                Ok(())
            }
            Err(err) => {
                debug!(rule_id = %rule_id, "rule failed to compile: {err}");
                self.compile_errors
                    .write()
                    .insert(rule_id, err.to_string());
                Err(err)
            }
        }
    }

    pub fn unload_rule(&self, rule_id: &RuleId) {
        self.rules.write().remove(rule_id);
        self.compile_errors.write().remove(rule_id);
    }

    pub fn get_rule(&self, rule_id: &RuleId) -> Option<Arc<CompiledRule>> {
        self.rules.read().get(rule_id).cloned()
    }

    pub fn compile_errors(&self) -> HashMap<RuleId, String> {
        self.compile_errors.read().clone()
    }

    /// Evaluate a single rule, emitting a signal through `sink` on match.
    /// Disabled rules evaluate to no matches.
    pub fn evaluate_rule(
        &self,
        rule_id: &RuleId,
        trace: &Trace,
        sink: &dyn SignalSink,
    ) -> Result<Vec<RuleMatch>, RuleError> {
        let compiled = self
            .get_rule(rule_id)
            .ok_or_else(|| RuleError::UnknownRule(rule_id.clone()))?;
        if !compiled.rule.enabled {
            return Ok(vec![]);
        }

        let mut budget = EvalBudget::new(self.step_budget);
        let matches = evaluate(&compiled.expr, trace, &mut budget)?;
        for rule_match in &matches {
            sink.create_signal(draft_for(&compiled.rule, trace, rule_match))?;
        }
        Ok(matches)
    }

    /// Evaluate every enabled rule of one tenant against a trace.
    ///
    /// Rules run in priority order: severity descending, then rule id
    /// ascending within equal severity - deterministic and testable. A
    /// rule exceeding its step budget fails alone; the remaining rules
    /// still run.
    pub fn evaluate_all(
        &self,
        tenant: TenantId,
        trace: &Trace,
        sink: &dyn SignalSink,
    ) -> Vec<RuleOutcome> {
        let mut candidates: Vec<Arc<CompiledRule>> = {
            let rules = self.rules.read();
            rules
                .values()
                .filter(|r| r.rule.enabled && r.rule.tenant_id == tenant)
                .cloned()
                .collect()
        };
        candidates.sort_by_key(|r| (Reverse(r.rule.severity), r.rule.id.clone()));

        let mut outcomes = Vec::with_capacity(candidates.len());
        for compiled in candidates {
            let mut budget = EvalBudget::new(self.step_budget);
            let outcome = match evaluate(&compiled.expr, trace, &mut budget) {
                Ok(matches) if matches.is_empty() => RuleOutcome {
                    rule_id: compiled.rule.id.clone(),
                    matched: false,
                    signal_id: None,
                    error: None,
                },
                Ok(matches) => {
                    let mut signal_id = None;
                    let mut error = None;
                    for rule_match in &matches {
                        match sink.create_signal(draft_for(&compiled.rule, trace, rule_match)) {
                            Ok(id) => signal_id = Some(id),
                            Err(err) => {
                                warn!(rule_id = %compiled.rule.id, "signal emission failed: {err}");
                                error = Some(err.to_string());
                            }
                        }
                    }
                    RuleOutcome {
                        rule_id: compiled.rule.id.clone(),
                        matched: true,
                        signal_id,
                        error,
                    }
                }
                // A timeout is a failed match for this rule only.
                Err(err) => RuleOutcome {
                    rule_id: compiled.rule.id.clone(),
                    matched: false,
                    signal_id: None,
                    error: Some(err.to_string()),
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn stats(&self) -> EngineStats {
        let rules = self.rules.read();
        let mut stats = EngineStats {
            total_rules: rules.len(),
            compile_errors: self.compile_errors.read().len(),
            ..EngineStats::default()
        };
        for rule in rules.values() {
            if rule.rule.enabled {
                stats.enabled_rules += 1;
            } else {
                stats.disabled_rules += 1;
            }
        }
        stats
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn draft_for(rule: &Rule, trace: &Trace, rule_match: &RuleMatch) -> SignalDraft {
    SignalDraft {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        severity: rule.severity,
        trace_id: trace.trace_id.clone(),
        message: format!("rule '{}' matched trace {}", rule.name, trace.trace_id),
        matched_spans: rule_match.spans.clone(),
    }
}
