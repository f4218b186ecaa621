//! Recursive-descent parser for the rule language.
//!
//! Precedence, loosest first: `or`, `and`, `not`. Span checks are the
//! atoms; parentheses group.

use crate::ast::{AttrFilter, CmpOp, Condition, FilterPredicate, LitValue, RuleExpr, SpanCheck};
use crate::error::RuleError;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Parse rule source text into an AST.
pub fn parse(source: &str) -> Result<RuleExpr, RuleError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_rule()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse_rule(&mut self) -> Result<RuleExpr, RuleError> {
        let expr = if self.peek().kind == TokenKind::When {
            self.parse_invariant()?
        } else {
            RuleExpr::Simple(self.parse_condition()?)
        };
        self.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    fn parse_invariant(&mut self) -> Result<RuleExpr, RuleError> {
        self.expect(TokenKind::When)?;
        self.expect(TokenKind::LBrace)?;
        let when = self.parse_condition()?;
        self.expect(TokenKind::RBrace)?;

        let mut always = None;
        if self.peek().kind == TokenKind::Always {
            self.advance();
            self.expect(TokenKind::LBrace)?;
            always = Some(self.parse_condition()?);
            self.expect(TokenKind::RBrace)?;
        }

        let mut never = None;
        if self.peek().kind == TokenKind::Never {
            self.advance();
            self.expect(TokenKind::LBrace)?;
            never = Some(self.parse_condition()?);
            self.expect(TokenKind::RBrace)?;
        }

        if always.is_none() && never.is_none() {
            let token = self.peek().clone();
            return Err(self.error_at(
                &token,
                "invariant rule needs at least one of 'always' or 'never'",
            ));
        }

        Ok(RuleExpr::Invariant { when, always, never })
    }

    fn parse_condition(&mut self) -> Result<Condition, RuleError> {
        let mut left = self.parse_and_term()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let right = self.parse_and_term()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_term(&mut self) -> Result<Condition, RuleError> {
        let mut left = self.parse_unary()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, RuleError> {
        if self.peek().kind == TokenKind::Not {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Condition, RuleError> {
        if self.peek().kind == TokenKind::LParen {
            self.advance();
            let condition = self.parse_condition()?;
            self.expect(TokenKind::RParen)?;
            return Ok(condition);
        }
        Ok(Condition::Check(self.parse_span_check()?))
    }

    fn parse_span_check(&mut self) -> Result<SpanCheck, RuleError> {
        self.expect(TokenKind::Trace)?;
        self.expect(TokenKind::Dot)?;

        let token = self.peek().clone();
        match token.kind {
            TokenKind::Has => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let operation = self.parse_name()?;
                self.expect(TokenKind::RParen)?;
                let filters = self.parse_where_chain()?;
                Ok(SpanCheck::Has { operation, filters })
            }
            TokenKind::Count => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let operation = self.parse_name()?;
                self.expect(TokenKind::RParen)?;
                let op = self.parse_cmp_op()?;
                if matches!(op, CmpOp::In | CmpOp::Matches) {
                    let token = self.previous().clone();
                    return Err(self.error_at(&token, "count comparison must be numeric"));
                }
                let number = self.expect(TokenKind::NumberLit)?;
                let value = number.text.parse::<f64>().map_err(|_| RuleError::Syntax {
                    line: number.line,
                    column: number.col,
                    message: format!("invalid number: '{}'", number.text),
                })?;
                Ok(SpanCheck::Count { operation, op, value })
            }
            TokenKind::Order => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let first = self.parse_name()?;
                self.expect(TokenKind::Before)?;
                let second = self.parse_name()?;
                self.expect(TokenKind::RParen)?;
                Ok(SpanCheck::Order { first, second })
            }
            _ => Err(self.error_at(&token, "expected 'has', 'count', or 'order' after 'trace.'")),
        }
    }

    fn parse_where_chain(&mut self) -> Result<Vec<AttrFilter>, RuleError> {
        let mut filters = Vec::new();
        while self.peek().kind == TokenKind::Dot && self.peek_next().kind == TokenKind::Where {
            self.advance(); // .
            self.advance(); // where
            self.expect(TokenKind::LParen)?;
            let key = self.parse_name()?;
            let predicate = if self.peek().kind == TokenKind::Exists {
                self.advance();
                FilterPredicate::Exists
            } else {
                let op = self.parse_cmp_op()?;
                let value = self.parse_value()?;
                FilterPredicate::Cmp { op, value }
            };
            self.expect(TokenKind::RParen)?;
            filters.push(AttrFilter { key, predicate });
        }
        Ok(filters)
    }

    /// An operation or attribute name: `*`, a quoted string, or a dotted
    /// identifier path (`payment.charge`, `span.duration_ms`).
    fn parse_name(&mut self) -> Result<String, RuleError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Star => {
                self.advance();
                Ok("*".to_string())
            }
            TokenKind::StringLit => {
                self.advance();
                Ok(token.text)
            }
            TokenKind::Ident => {
                self.advance();
                let mut name = token.text;
                while self.peek().kind == TokenKind::Dot
                    && self.peek_next().kind == TokenKind::Ident
                {
                    self.advance();
                    let part = self.advance();
                    name.push('.');
                    name.push_str(&part.text);
                }
                Ok(name)
            }
            _ => Err(self.error_at(&token, "expected an operation or attribute name")),
        }
    }

    fn parse_cmp_op(&mut self) -> Result<CmpOp, RuleError> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Lte => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Gte => CmpOp::Ge,
            TokenKind::In => CmpOp::In,
            TokenKind::Matches => CmpOp::Matches,
            _ => return Err(self.error_at(&token, "expected a comparison operator")),
        };
        self.advance();
        Ok(op)
    }

    fn parse_value(&mut self) -> Result<LitValue, RuleError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::StringLit => {
                self.advance();
                Ok(LitValue::Str(token.text))
            }
            TokenKind::NumberLit => {
                self.advance();
                let value = token.text.parse::<f64>().map_err(|_| RuleError::Syntax {
                    line: token.line,
                    column: token.col,
                    message: format!("invalid number: '{}'", token.text),
                })?;
                Ok(LitValue::Num(value))
            }
            TokenKind::True => {
                self.advance();
                Ok(LitValue::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(LitValue::Bool(false))
            }
            // Unquoted enum-like value (USD, premium).
            TokenKind::Ident => {
                self.advance();
                Ok(LitValue::Str(token.text))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    let item = self.peek().clone();
                    match item.kind {
                        TokenKind::StringLit | TokenKind::Ident | TokenKind::NumberLit => {
                            self.advance();
                            items.push(item.text);
                        }
                        _ => return Err(self.error_at(&item, "expected a list element")),
                    }
                    if self.peek().kind == TokenKind::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(LitValue::List(items))
            }
            _ => Err(self.error_at(&token, "expected a literal value")),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, RuleError> {
        let token = self.peek().clone();
        if token.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error_at(&token, &format!("expected {}", kind)))
        }
    }

    fn error_at(&self, token: &Token, message: &str) -> RuleError {
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            format!("'{}'", token.text)
        };
        RuleError::Syntax {
            line: token.line,
            column: token.col,
            message: format!("{}, found {}", message, found),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_has_check() {
        let expr = parse("trace.has(payment.charge)").unwrap();
        assert_eq!(
            expr,
            RuleExpr::Simple(Condition::Check(SpanCheck::Has {
                operation: "payment.charge".into(),
                filters: vec![],
            }))
        );
    }

    #[test]
    fn where_chain_with_quoted_attribute() {
        let expr = parse(r#"trace.has(*).where("db.query" exists).where(amount > 1000)"#).unwrap();
        let RuleExpr::Simple(Condition::Check(SpanCheck::Has { operation, filters })) = expr
        else {
            panic!("expected has check");
        };
        assert_eq!(operation, "*");
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].key, "db.query");
        assert_eq!(filters[0].predicate, FilterPredicate::Exists);
        assert_eq!(filters[1].key, "amount");
        assert_eq!(
            filters[1].predicate,
            FilterPredicate::Cmp {
                op: CmpOp::Gt,
                value: LitValue::Num(1000.0),
            }
        );
    }

    #[test]
    fn count_check() {
        let expr = parse("trace.count(db.retry) >= 3").unwrap();
        assert_eq!(
            expr,
            RuleExpr::Simple(Condition::Check(SpanCheck::Count {
                operation: "db.retry".into(),
                op: CmpOp::Ge,
                value: 3.0,
            }))
        );
    }

    #[test]
    fn order_check() {
        let expr = parse("trace.order(authz.check before db.write)").unwrap();
        assert_eq!(
            expr,
            RuleExpr::Simple(Condition::Check(SpanCheck::Order {
                first: "authz.check".into(),
                second: "db.write".into(),
            }))
        );
    }

    #[test]
    fn precedence_or_binds_loosest() {
        let expr = parse("trace.has(a) or trace.has(b) and not trace.has(c)").unwrap();
        let RuleExpr::Simple(Condition::Or(left, right)) = expr else {
            panic!("expected top-level or");
        };
        assert!(matches!(*left, Condition::Check(_)));
        let Condition::And(_, and_right) = *right else {
            panic!("expected and on the right");
        };
        assert!(matches!(*and_right, Condition::Not(_)));
    }

    #[test]
    fn grouping_overrides_precedence() {
        let expr = parse("(trace.has(a) or trace.has(b)) and trace.has(c)").unwrap();
        let RuleExpr::Simple(Condition::And(left, _)) = expr else {
            panic!("expected top-level and");
        };
        assert!(matches!(*left, Condition::Or(_, _)));
    }

    #[test]
    fn invariant_rule() {
        let expr = parse(
            "when { trace.has(payment.charge) } always { trace.has(fraud.check) } never { trace.has(pii.leak) }",
        )
        .unwrap();
        let RuleExpr::Invariant { when, always, never } = expr else {
            panic!("expected invariant");
        };
        assert!(matches!(when, Condition::Check(_)));
        assert!(always.is_some());
        assert!(never.is_some());
    }

    #[test]
    fn invariant_requires_always_or_never() {
        let err = parse("when { trace.has(a) }").unwrap_err();
        assert!(matches!(err, RuleError::Syntax { .. }));
    }

    #[test]
    fn in_and_matches_values() {
        let expr = parse(r#"trace.has(pay).where(currency in [USD, "EUR"]).where(host matches "prod")"#)
            .unwrap();
        let RuleExpr::Simple(Condition::Check(SpanCheck::Has { filters, .. })) = expr else {
            panic!("expected has check");
        };
        assert_eq!(
            filters[0].predicate,
            FilterPredicate::Cmp {
                op: CmpOp::In,
                value: LitValue::List(vec!["USD".into(), "EUR".into()]),
            }
        );
        assert_eq!(
            filters[1].predicate,
            FilterPredicate::Cmp {
                op: CmpOp::Matches,
                value: LitValue::Str("prod".into()),
            }
        );
    }

    #[test]
    fn count_rejects_non_numeric_comparison() {
        let err = parse("trace.count(op) in 3").unwrap_err();
        let RuleError::Syntax { message, .. } = err else {
            panic!("expected syntax error");
        };
        assert!(message.contains("numeric"));
    }

    #[test]
    fn error_carries_line_and_column() {
        let err = parse("trace.has(a)\n  and trace.frobnicate(b)").unwrap_err();
        let RuleError::Syntax { line, column, message } = err else {
            panic!("expected syntax error");
        };
        assert_eq!(line, 2);
        assert!(column > 1);
        assert!(message.contains("has"));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let err = parse("trace.has(a) trace.has(b)").unwrap_err();
        assert!(matches!(err, RuleError::Syntax { .. }));
    }

    #[test]
    fn display_round_trips_through_parser() {
        let source = "trace.has(a).where(amount > 10) and not trace.count(b) == 2";
        let expr = parse(source).unwrap();
        let reparsed = parse(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);
    }
}
