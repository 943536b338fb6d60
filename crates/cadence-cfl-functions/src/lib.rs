// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Builtin function library for the Cadence formula language.
//!
//! Builtins register as [`NativeFn`] entries: a name, a typed signature
//! (consulted by the strict checker and generic unification), and a
//! native implementation. [`standard_table`] assembles the default
//! registry the parser resolves call targets against.
//!
//! The vectorized `map`/`filter`/`find` primitives and comprehensions
//! are language forms handled by the parser, not table entries. Action
//! builtins (`set`, `add`, `debug`) build deferred command values; they
//! never touch the scope at evaluation time.

mod actions;
mod collections;
mod convert;
mod math;

use cadence_cfl_ast::{
    BuiltinFn, Callable, EvalContext, EvalError, EvalErrorKind, EvalResult, FunctionSig,
    FunctionTable, Value,
};

/// A builtin implemented by a native function pointer.
#[derive(Clone, Copy)]
pub struct NativeFn {
    name: &'static str,
    sig: fn() -> FunctionSig,
    body: fn(&[Value], &dyn Callable, &mut EvalContext) -> EvalResult<Value>,
}

impl std::fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

impl BuiltinFn for NativeFn {
    fn name(&self) -> &'static str {
        self.name
    }

    fn signature(&self) -> FunctionSig {
        (self.sig)()
    }

    fn call(
        &self,
        args: &[Value],
        scope: &dyn Callable,
        ctx: &mut EvalContext,
    ) -> EvalResult<Value> {
        let sig = (self.sig)();
        if args.len() < sig.min_args || (!sig.variadic && args.len() > sig.args.len()) {
            return Err(EvalError::new(EvalErrorKind::Arity {
                expected: sig.min_args,
                got: args.len(),
            }));
        }
        (self.body)(args, scope, ctx)
            .map_err(|e| e.push_frame(format!("in builtin {}()", self.name)))
    }
}

impl NativeFn {
    pub const fn new(
        name: &'static str,
        sig: fn() -> FunctionSig,
        body: fn(&[Value], &dyn Callable, &mut EvalContext) -> EvalResult<Value>,
    ) -> Self {
        Self { name, sig, body }
    }
}

/// Argument-type failure helper shared by the builtin modules.
pub(crate) fn arg_error(function: &str, expected: &str, got: &Value) -> EvalError {
    EvalError::new(EvalErrorKind::Other {
        message: format!("{function}() expects {expected}, got {}", got.type_name()),
    })
}

/// The default builtin registry.
pub fn standard_table() -> FunctionTable {
    let mut table = FunctionTable::new();
    for f in math::FUNCTIONS {
        table.register(std::sync::Arc::new(f));
    }
    for f in collections::FUNCTIONS {
        table.register(std::sync::Arc::new(f));
    }
    for f in convert::FUNCTIONS {
        table.register(std::sync::Arc::new(f));
    }
    for f in actions::FUNCTIONS {
        table.register(std::sync::Arc::new(f));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_cfl_ast::MapCallable;

    fn call(name: &str, args: Vec<Value>) -> EvalResult<Value> {
        let table = standard_table();
        let f = table.get(name).unwrap_or_else(|| panic!("missing builtin {name}"));
        let scope = MapCallable::new();
        let mut ctx = EvalContext::new();
        f.call(&args, &scope, &mut ctx)
    }

    #[test]
    fn table_has_the_core_functions() {
        let table = standard_table();
        for name in [
            "abs", "min", "max", "floor", "ceil", "round", "size", "head", "back", "range",
            "reverse", "sort", "sum", "keys", "values", "str", "int", "decimal", "typeof", "set",
            "debug",
        ] {
            assert!(table.get(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn arity_is_checked() {
        let err = call("abs", vec![]).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::Arity { .. }));
    }
}
