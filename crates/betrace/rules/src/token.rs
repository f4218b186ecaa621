//! Tokens produced by the rule language lexer.

use std::fmt;

/// A token with its 1-based source position.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    When,
    Always,
    Never,
    Trace,
    Has,
    Where,
    Count,
    Order,
    Before,
    And,
    Or,
    Not,
    In,
    Matches,
    Exists,
    True,
    False,

    // Literals
    Ident,
    StringLit,
    NumberLit,

    // Structural
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Star,

    // Comparison operators
    EqEq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,

    Eof,
}

impl TokenKind {
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        Some(match ident {
            "when" => TokenKind::When,
            "always" => TokenKind::Always,
            "never" => TokenKind::Never,
            "trace" => TokenKind::Trace,
            "has" => TokenKind::Has,
            "where" => TokenKind::Where,
            "count" => TokenKind::Count,
            "order" => TokenKind::Order,
            "before" => TokenKind::Before,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "matches" => TokenKind::Matches,
            "exists" => TokenKind::Exists,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::When => write!(f, "when"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
            Self::Trace => write!(f, "trace"),
            Self::Has => write!(f, "has"),
            Self::Where => write!(f, "where"),
            Self::Count => write!(f, "count"),
            Self::Order => write!(f, "order"),
            Self::Before => write!(f, "before"),
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
            Self::Not => write!(f, "not"),
            Self::In => write!(f, "in"),
            Self::Matches => write!(f, "matches"),
            Self::Exists => write!(f, "exists"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Ident => write!(f, "identifier"),
            Self::StringLit => write!(f, "string literal"),
            Self::NumberLit => write!(f, "number"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::LBracket => write!(f, "["),
            Self::RBracket => write!(f, "]"),
            Self::LBrace => write!(f, "{{"),
            Self::RBrace => write!(f, "}}"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::Star => write!(f, "*"),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Eof => write!(f, "end of input"),
        }
    }
}
