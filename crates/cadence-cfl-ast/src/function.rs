//! Function values and the builtin protocol.
//!
//! A [`FunctionValue`] is what `def` produces: parameter list, optional
//! base/recursive guard chain, body AST, and (for closures) a snapshot of
//! the enclosing bindings the body references. The snapshot is taken when
//! the lambda value is created, so no function ever holds a live
//! reference back into a scope — closure-free lambdas skip it entirely
//! and evaluate to a shared, preallocated value.
//!
//! Builtins implement [`BuiltinFn`] and live in a [`FunctionTable`]
//! resolved at parse time; their typed signatures drive strict-mode
//! checking and generic unification.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::EvalContext;
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::expr::Expr;
use crate::foundation::callable::Callable;
use crate::foundation::types::Type;
use crate::foundation::value::Value;
use crate::scopes::ArgScope;

/// One declared parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// Present for parameters past `min_args`.
    pub default: Option<Value>,
}

/// One `base <guard>: <expr>` case.
#[derive(Debug, Clone)]
pub struct GuardedCase {
    pub guard: Arc<Expr>,
    pub body: Arc<Expr>,
}

/// A function body: guard cases checked in declaration order, then the
/// main (recursive) expression.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub guards: Vec<GuardedCase>,
    pub main: Arc<Expr>,
}

/// A user-defined function value.
#[derive(Debug, Clone)]
pub struct FunctionValue {
    name: Option<String>,
    params: Vec<Param>,
    min_args: usize,
    return_type: Type,
    /// Generic parameter names for `def<<T>>` lambdas; empty otherwise.
    type_params: Vec<String>,
    /// Names of enclosing bindings the body references, in frame order
    /// after the parameters (and the self-name slot for named lambdas).
    capture_names: Vec<String>,
    /// Captured values, parallel to `capture_names`. Empty on the
    /// closure-free template; filled when a closure is created.
    captured: Vec<Value>,
    body: FunctionBody,
}

impl FunctionValue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Option<String>,
        params: Vec<Param>,
        return_type: Type,
        type_params: Vec<String>,
        capture_names: Vec<String>,
        body: FunctionBody,
    ) -> Self {
        let min_args = params.iter().filter(|p| p.default.is_none()).count();
        Self {
            name,
            params,
            min_args,
            return_type,
            type_params,
            capture_names,
            captured: Vec::new(),
            body,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn min_args(&self) -> usize {
        self.min_args
    }

    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    pub fn body(&self) -> &FunctionBody {
        &self.body
    }

    pub fn capture_names(&self) -> &[String] {
        &self.capture_names
    }

    pub fn captured(&self) -> &[Value] {
        &self.captured
    }

    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }

    pub fn needs_closure(&self) -> bool {
        !self.capture_names.is_empty()
    }

    /// A closure over this template with the given captured values.
    pub fn with_captures(&self, captured: Vec<Value>) -> Self {
        debug_assert_eq!(captured.len(), self.capture_names.len());
        Self {
            captured,
            ..self.clone()
        }
    }

    /// Instantiate a generic lambda with explicit type arguments.
    pub fn instantiate(&self, type_args: &[Type]) -> EvalResult<Self> {
        if type_args.len() != self.type_params.len() {
            return Err(EvalError::new(EvalErrorKind::GenericArity {
                expected: self.type_params.len(),
                got: type_args.len(),
            }));
        }
        let bindings: HashMap<String, Type> = self
            .type_params
            .iter()
            .cloned()
            .zip(type_args.iter().cloned())
            .collect();
        let mut specialized = self.clone();
        specialized.type_params = Vec::new();
        specialized.return_type = self.return_type.substitute(&bindings);
        for param in &mut specialized.params {
            param.ty = param.ty.substitute(&bindings);
        }
        Ok(specialized)
    }

    pub fn signature(&self) -> Type {
        Type::function(
            self.params.iter().map(|p| p.ty.clone()).collect(),
            self.return_type.clone(),
            self.min_args,
        )
    }

    /// Call with evaluated arguments. Missing trailing arguments take
    /// their declared defaults; the guard chain is checked in declaration
    /// order before the main body.
    pub fn call(
        this: &Arc<FunctionValue>,
        mut args: Vec<Value>,
        scope: &dyn Callable,
        ctx: &mut EvalContext,
    ) -> EvalResult<Value> {
        if args.len() < this.min_args || args.len() > this.params.len() {
            return Err(EvalError::new(EvalErrorKind::Arity {
                expected: this.min_args,
                got: args.len(),
            }));
        }
        for param in &this.params[args.len()..] {
            args.push(
                param
                    .default
                    .clone()
                    .expect("arity check admits only defaulted tails"),
            );
        }

        ctx.enter_call(this.display_name())?;
        let frame = ArgScope::new(this, args, scope);
        let result = Self::eval_body(this, &frame, ctx);
        ctx.exit_call();
        result.map_err(|e| e.push_frame(format!("in call to {}()", this.display_name())))
    }

    fn eval_body(
        this: &Arc<FunctionValue>,
        frame: &ArgScope<'_, '_>,
        ctx: &mut EvalContext,
    ) -> EvalResult<Value> {
        for case in &this.body.guards {
            if case.guard.evaluate(frame, ctx)?.is_truthy() {
                return case.body.evaluate(frame, ctx);
            }
        }
        this.body.main.evaluate(frame, ctx)
    }
}

/// Typed signature of a builtin, consulted by the strict checker.
#[derive(Debug, Clone)]
pub struct FunctionSig {
    /// Generic variable names appearing in `args`/`ret`.
    pub type_params: Vec<String>,
    pub args: Vec<Type>,
    pub ret: Type,
    pub min_args: usize,
    /// Accepts any number of arguments beyond `args` (each typed like
    /// the last declared argument).
    pub variadic: bool,
}

impl FunctionSig {
    pub fn fixed(args: Vec<Type>, ret: Type) -> Self {
        let min_args = args.len();
        Self {
            type_params: Vec::new(),
            args,
            ret,
            min_args,
            variadic: false,
        }
    }

    pub fn generic(type_params: Vec<&str>, args: Vec<Type>, ret: Type) -> Self {
        let min_args = args.len();
        Self {
            type_params: type_params.into_iter().map(str::to_string).collect(),
            args,
            ret,
            min_args,
            variadic: false,
        }
    }

    pub fn with_min_args(mut self, min_args: usize) -> Self {
        self.min_args = min_args;
        self
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// The declared type of the argument at `pos`.
    pub fn arg_type(&self, pos: usize) -> Option<&Type> {
        self.args.get(pos).or_else(|| {
            if self.variadic {
                self.args.last()
            } else {
                None
            }
        })
    }
}

/// A native builtin function.
pub trait BuiltinFn: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn signature(&self) -> FunctionSig;

    fn call(
        &self,
        args: &[Value],
        scope: &dyn Callable,
        ctx: &mut EvalContext,
    ) -> EvalResult<Value>;
}

/// The builtin registry the parser resolves call targets against.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    entries: HashMap<&'static str, Arc<dyn BuiltinFn>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: Arc<dyn BuiltinFn>) {
        self.entries.insert(function.name(), function);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn BuiltinFn>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
