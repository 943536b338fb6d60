//! Runtime evaluation errors.
//!
//! Every runtime invariant violation is fatal to the evaluation and must
//! surface loudly: errors accumulate the active formula call stack and,
//! when the VM is involved, an operand-stack dump, as they propagate out.
//! There is no user-facing catch — a runtime failure is an authoring bug.
//!
//! `NotConst` is the one non-fatal kind: it is the probe-mode signal that
//! an expression depends on the runtime scope (or the dice RNG) and so
//! cannot be reduced to a constant at parse time.

use crate::foundation::span::Span;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// What went wrong, without location context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalErrorKind {
    #[error("wrong operand type for '{op}': {left} {op} {right}")]
    OperandType {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("wrong operand type for unary '{op}': {operand}")]
    UnaryOperandType {
        op: &'static str,
        operand: &'static str,
    },

    #[error("index {index} out of range for {len} elements")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("key {key} not found in map")]
    KeyNotFound { key: String },

    #[error("illegal operand to '[]': {ty}")]
    IllegalIndexOperand { ty: &'static str },

    #[error("illegal operand to 'in': {ty}")]
    IllegalInOperand { ty: &'static str },

    #[error("unknown variable '{name}'")]
    UnknownIdentifier { name: String },

    #[error("object has no member '{name}'")]
    UnknownMember { name: String },

    #[error("assertion failed: {condition}")]
    AssertionFailed { condition: String },

    #[error("recursion depth limit of {limit} exceeded")]
    RecursionLimit { limit: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("cannot set '{name}': scope is read-only")]
    ReadOnlyScope { name: String },

    #[error("scope does not support slot access")]
    NoSlots,

    #[error("cannot call value of type {ty}")]
    NotCallable { ty: &'static str },

    #[error("wrong number of arguments: expected at least {expected}, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("cast failed: {value} is not a {ty}")]
    CastFailed { value: String, ty: String },

    #[error("type check failed: {value} is not a {ty}")]
    TypeCheckFailed { value: String, ty: String },

    #[error("wrong number of type arguments: expected {expected}, got {got}")]
    GenericArity { expected: usize, got: usize },

    #[error("commands cannot run against this scope")]
    CommandsUnsupported,

    #[error("{message}")]
    Other { message: String },

    /// Probe-mode signal: the expression read the scope or the RNG, so it
    /// is not a compile-time constant. Never reported to users.
    #[error("expression is not constant")]
    NotConst,
}

/// A fatal evaluation failure with location and diagnostic trace.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub span: Option<Span>,
    /// Formula call stack and VM dumps, innermost first. Each frame is a
    /// pre-rendered line pushed while the error propagates.
    pub trace: Vec<String>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind) -> Self {
        Self {
            kind,
            span: None,
            trace: Vec::new(),
        }
    }

    pub fn with_span(kind: EvalErrorKind, span: Span) -> Self {
        Self {
            kind,
            span: Some(span),
            trace: Vec::new(),
        }
    }

    /// Attach a span if none was recorded deeper in the evaluation.
    pub fn or_span(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }

    /// Append a diagnostic frame (formula excerpt, VM dump) to the trace.
    pub fn push_frame(mut self, frame: impl Into<String>) -> Self {
        self.trace.push(frame.into());
        self
    }

    pub fn is_not_const(&self) -> bool {
        matches!(self.kind, EvalErrorKind::NotConst)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(span) = &self.span {
            write!(f, " (line {}, bytes {}..{})", span.start_line, span.start, span.end)?;
        }
        for frame in &self.trace {
            write!(f, "\n  {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        EvalError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_frames_render_in_order() {
        let err = EvalError::new(EvalErrorKind::DivisionByZero)
            .push_frame("in formula 'a/b'")
            .push_frame("called from 'main'");
        let text = err.to_string();
        assert!(text.contains("division by zero"));
        assert!(text.find("a/b").unwrap() < text.find("main").unwrap());
    }

    #[test]
    fn or_span_keeps_existing() {
        let inner = Span::new(0, 5, 9, 1);
        let outer = Span::new(0, 0, 20, 1);
        let err = EvalError::with_span(EvalErrorKind::NoSlots, inner).or_span(outer);
        assert_eq!(err.span, Some(inner));
    }
}
