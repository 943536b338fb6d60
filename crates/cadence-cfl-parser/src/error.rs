//! Parse error types.
//!
//! Every parse failure is fatal to that parse and carries a pinpointed
//! source excerpt. Static-type findings raised under strict mode reuse
//! the same type with [`ParseErrorKind::StaticType`].

use cadence_cfl_ast::Span;
use cadence_cfl_lexer::LexError;
use std::fmt;
use thiserror::Error;

/// Parse error with source location and context.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    pub message: String,
}

/// Category of parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Unrecognized character run reported by the tokenizer.
    Lex,
    /// A specific token was expected but something else was found.
    UnexpectedToken,
    /// Ran out of tokens while a construct was incomplete.
    UnexpectedEof,
    /// Tokens are present but violate the grammar (wrong special-form
    /// arity, unmatched brackets, malformed bindings).
    InvalidSyntax,
    /// A strict-mode static check failed and the policy is abort.
    StaticType,
}

impl ParseError {
    pub fn unexpected(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::UnexpectedToken,
            span,
            message: message.into(),
        }
    }

    pub fn eof(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::UnexpectedEof,
            span,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::InvalidSyntax,
            span,
            message: message.into(),
        }
    }

    pub fn static_type(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::StaticType,
            span,
            message: message.into(),
        }
    }

    pub fn from_lex(err: LexError, source_id: u16, line: u16) -> Self {
        Self {
            kind: ParseErrorKind::Lex,
            span: Span::new(source_id, err.span.start as u32, err.span.end as u32, line),
            message: err.to_string(),
        }
    }

    /// Render the error with the offending source excerpt underneath.
    pub fn pinpoint(&self, source: &str) -> String {
        let mut out = format!("{} (line {})", self.message, self.span.start_line);
        let excerpt = source
            .get(self.span.start as usize..self.span.end as usize)
            .filter(|s| !s.is_empty());
        if let Some(excerpt) = excerpt {
            out.push_str("\n  at: ");
            out.push_str(excerpt.trim());
        }
        out
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ParseErrorKind::Lex => "lexical error",
            ParseErrorKind::UnexpectedToken => "unexpected token",
            ParseErrorKind::UnexpectedEof => "unexpected end of input",
            ParseErrorKind::InvalidSyntax => "invalid syntax",
            ParseErrorKind::StaticType => "static type error",
        };
        write!(f, "{text}")
    }
}

/// Result alias used throughout the parser.
pub type PResult<T> = Result<T, ParseError>;
