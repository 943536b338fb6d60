// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Core types of the Cadence formula language: runtime values, the
//! structural type algebra, the host callable protocol, and the typed
//! expression AST with its tree-walk evaluator.
//!
//! The parser crate builds [`expr::Expr`] trees out of these types; the
//! VM crate lowers them to bytecode. Hosts mostly interact through the
//! facade crate (`cadence-cfl`), implementing [`foundation::Callable`]
//! for their objects.

pub mod context;
pub mod error;
pub mod expr;
pub mod foundation;
pub mod function;
pub mod ops;
pub mod scopes;

// Re-export the types nearly every consumer touches
pub use context::{DivByZero, EvalContext, EvalMode, EvalOptions};
pub use error::{EvalError, EvalErrorKind, EvalResult};
pub use expr::{
    AssertGuard, CallTarget, CompClause, Expr, ExprKind, LogicOp, SlotRef, WhereBinding,
};
pub use foundation::{
    Callable, CommandAction, CommandSeq, Decimal, DebugInfo, MapCallable, NamedType,
    NullResolver, ProbeCallable, ScopeLayout, SourceMap, Span, Type, TypeKind, TypeRegistry,
    TypeResolver, Value, ValueMap,
};
pub use function::{
    BuiltinFn, FunctionBody, FunctionSig, FunctionTable, FunctionValue, GuardedCase, Param,
};
pub use ops::{BinaryOp, UnaryOp};
