// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Compiled formulas for the Cadence simulation engine.
//!
//! The facade over the formula-language crates: [`Formula::parse`]
//! tokenizes, parses, type-checks, constant-reduces, and lowers one
//! source string; [`Formula::execute`] runs it against a host
//! [`Callable`] scope, preferring the bytecode VM and falling back to
//! tree-walk evaluation where the VM declined. Formulas are immutable
//! once built and cheap to clone; sharing one across threads for
//! concurrent read-only evaluation is safe.
//!
//! ```
//! use cadence_cfl::{Formula, ParseOptions};
//!
//! let formula = Formula::parse("damage * 2 where damage = 3", &ParseOptions::default())?;
//! assert_eq!(formula.execute()?.as_int(), Some(6));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use cadence_cfl_ast::{FunctionBody, TypeRegistry};
use cadence_cfl_parser::parse_formula;
use cadence_cfl_vm::{execute as vm_execute, lower_formula, Program};

pub use cadence_cfl_ast::{
    Callable, CommandAction, CommandSeq, DebugInfo, Decimal, DivByZero, EvalContext, EvalError,
    EvalErrorKind, EvalOptions, EvalResult, FunctionTable, MapCallable, ScopeLayout, Span, Type,
    TypeResolver, Value, ValueMap,
};
pub use cadence_cfl_functions::standard_table;
pub use cadence_cfl_parser::{
    parse_type_source, ParseError, ParseErrorKind, ParseOptions, StrictMode,
};

/// Errors producible while constructing a [`Formula`]. Lexical failures
/// arrive wrapped as parse errors with their location.
pub type FormulaError = ParseError;

/// One compiled unit of the formula language: source text, optimized
/// AST (with any `base`/`recursive` guard chain), optional bytecode,
/// and the static result type. Immutable once built.
#[derive(Debug, Clone)]
pub struct Formula {
    inner: Arc<FormulaInner>,
}

#[derive(Debug)]
pub struct FormulaInner {
    source: String,
    debug_info: Option<DebugInfo>,
    body: FunctionBody,
    program: Option<Program>,
    static_type: Type,
    types: Option<Arc<RwLock<TypeRegistry>>>,
}

impl Formula {
    /// Compile a formula from source.
    pub fn parse(source: &str, opts: &ParseOptions) -> Result<Formula, FormulaError> {
        let parsed = parse_formula(source, opts)?;
        let program = lower_formula(&parsed.body.main);
        let inner = Arc::new(FormulaInner {
            source: source.to_string(),
            debug_info: opts.debug_info.clone(),
            body: parsed.body,
            program,
            static_type: parsed.ty,
            types: opts.types.clone(),
        });
        registry::register(&inner);
        Ok(Formula { inner })
    }

    /// Evaluate against an empty scope.
    pub fn execute(&self) -> EvalResult<Value> {
        self.execute_with(&MapCallable::new())
    }

    /// Evaluate against a host scope with default options.
    pub fn execute_with(&self, scope: &dyn Callable) -> EvalResult<Value> {
        let mut ctx = self.context();
        self.execute_in(scope, &mut ctx)
    }

    /// Evaluate against a host scope, reusing a caller-managed context
    /// (recursion accounting, dice stream, policies).
    pub fn execute_in(&self, scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<Value> {
        ctx.enter_call(&self.describe())?;
        let result = self.run(scope, ctx);
        ctx.exit_call();
        result.map_err(|err| {
            let err = err.push_frame(format!("in formula {}", self.describe()));
            tracing::error!("formula evaluation failed: {err}");
            err
        })
    }

    fn run(&self, scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<Value> {
        for case in &self.inner.body.guards {
            if case.guard.evaluate(scope, ctx)?.is_truthy() {
                return case.body.evaluate(scope, ctx);
            }
        }
        match &self.inner.program {
            Some(program) => vm_execute(program, scope, ctx),
            None => self.inner.body.main.evaluate(scope, ctx),
        }
    }

    /// Evaluate without the VM, for diagnostics and differential tests.
    pub fn execute_tree_walk(
        &self,
        scope: &dyn Callable,
        ctx: &mut EvalContext,
    ) -> EvalResult<Value> {
        for case in &self.inner.body.guards {
            if case.guard.evaluate(scope, ctx)?.is_truthy() {
                return case.body.evaluate(scope, ctx);
            }
        }
        self.inner.body.main.evaluate(scope, ctx)
    }

    /// The constant this formula reduces to, when static reduction
    /// proved it input-independent.
    pub fn evaluates_to_constant(&self) -> Option<&Value> {
        if !self.inner.body.guards.is_empty() {
            return None;
        }
        self.inner.body.main.constant_value()
    }

    /// The static result type, fixed at construction.
    pub fn static_type(&self) -> &Type {
        &self.inner.static_type
    }

    /// Whether the main expression lowered to bytecode.
    pub fn has_bytecode(&self) -> bool {
        self.inner.program.is_some()
    }

    /// Text rendering of the compiled program, or a note that the
    /// formula tree-walks.
    pub fn disassemble(&self) -> String {
        match &self.inner.program {
            Some(program) => program.disassemble(),
            None => format!("; tree-walk only: {}", self.describe()),
        }
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn debug_info(&self) -> Option<&DebugInfo> {
        self.inner.debug_info.as_ref()
    }

    /// A context wired to this formula's type registry.
    fn context(&self) -> EvalContext {
        let mut ctx = EvalContext::new();
        if let Some(types) = &self.inner.types {
            ctx.set_type_registry(types.clone());
        }
        ctx
    }

    /// Short source excerpt for call stacks and crash diagnostics.
    fn describe(&self) -> String {
        let text = self.inner.source.trim();
        match &self.inner.debug_info {
            Some(info) => format!("'{}' ({info})", truncate(text, 48)),
            None => format!("'{}'", truncate(text, 48)),
        }
    }
}

impl FormulaInner {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn static_type(&self) -> &Type {
        &self.static_type
    }

    pub fn debug_info(&self) -> Option<&DebugInfo> {
        self.debug_info.as_ref()
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((at, _)) => &text[..at],
        None => text,
    }
}

/// The process-wide named-type registry. Hosts declare engine types
/// once at startup (push/pop scoping for mod overlays), then hand the
/// handle to [`ParseOptions::types`].
pub fn global_types() -> Arc<RwLock<TypeRegistry>> {
    static TYPES: OnceLock<Arc<RwLock<TypeRegistry>>> = OnceLock::new();
    TYPES
        .get_or_init(|| Arc::new(RwLock::new(TypeRegistry::new())))
        .clone()
}

/// Diagnostics-only registry of live formulas.
pub mod registry {
    use super::*;

    fn live() -> &'static Mutex<Vec<Weak<FormulaInner>>> {
        static LIVE: OnceLock<Mutex<Vec<Weak<FormulaInner>>>> = OnceLock::new();
        LIVE.get_or_init(|| Mutex::new(Vec::new()))
    }

    pub(crate) fn register(inner: &Arc<FormulaInner>) {
        let mut formulas = live().lock().expect("formula registry poisoned");
        formulas.push(Arc::downgrade(inner));
    }

    /// Snapshot every formula still alive, dropping dead entries.
    pub fn live_formulas() -> Vec<Arc<FormulaInner>> {
        let mut formulas = live().lock().expect("formula registry poisoned");
        formulas.retain(|weak| weak.strong_count() > 0);
        formulas.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_formulas_report_their_value() {
        let f = Formula::parse("6 * 7", &ParseOptions::default()).unwrap();
        assert_eq!(f.evaluates_to_constant(), Some(&Value::Int(42)));
        assert_eq!(f.static_type(), &Type::int());
    }

    #[test]
    fn scope_dependent_formulas_do_not() {
        let f = Formula::parse("hp * 2", &ParseOptions::default()).unwrap();
        assert_eq!(f.evaluates_to_constant(), None);
    }

    #[test]
    fn registry_sees_live_formulas_only() {
        let marker = "123456 + 654321";
        let f = Formula::parse(marker, &ParseOptions::default()).unwrap();
        assert!(registry::live_formulas()
            .iter()
            .any(|inner| inner.source() == marker));
        drop(f);
        assert!(!registry::live_formulas()
            .iter()
            .any(|inner| inner.source() == marker));
    }

    #[test]
    fn disassembly_is_available() {
        let f = Formula::parse("hp + 1", &ParseOptions::default()).unwrap();
        assert!(f.has_bytecode());
        assert!(f.disassemble().contains("LoadName"));
    }

    #[test]
    fn debug_info_travels_into_diagnostics() {
        let opts = ParseOptions {
            debug_info: Some(DebugInfo {
                file: "units/tank.cfg".into(),
                line: 12,
                column: 3,
            }),
            ..ParseOptions::default()
        };
        let f = Formula::parse("[1][5]", &opts).unwrap();
        let err = f.execute().unwrap_err();
        assert!(err.to_string().contains("units/tank.cfg"));
    }
}
