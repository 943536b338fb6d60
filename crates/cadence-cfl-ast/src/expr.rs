//! The typed expression AST and its tree-walk evaluator.
//!
//! The parser produces [`Expr`] nodes with their static type already
//! attached; constant reduction has already replaced provably
//! input-independent subtrees with [`ExprKind::Literal`]. Every node
//! answers the same contract: evaluate against a scope, report its
//! static type, report VM lowerability, and expose its children.
//!
//! Evaluation is a match over [`ExprKind`]. Nodes that introduce
//! bindings build the matching wrapper from [`crate::scopes`], keeping
//! the runtime scope chain aligned with the parse-time frame stack so
//! slot references resolve by frame walking.

use std::sync::Arc;

use crate::context::EvalContext;
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::foundation::callable::{get_slot_up, Callable, CommandSeq};
use crate::foundation::span::Span;
use crate::foundation::types::Type;
use crate::foundation::value::{Value, ValueMap};
use crate::function::{BuiltinFn, FunctionValue};
use crate::ops::{self, BinaryOp, UnaryOp};
use crate::scopes::{FrameScope, IterationScope, WhereScope};

/// A parse-time variable slot: how many frames up, and the index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub frames_up: u16,
    pub index: u16,
}

/// Short-circuiting logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// One `name = expr` binding of a where clause.
#[derive(Debug, Clone)]
pub struct WhereBinding {
    pub name: String,
    pub expr: Arc<Expr>,
}

/// One `asserting` guard with its source text for diagnostics.
#[derive(Debug, Clone)]
pub struct AssertGuard {
    pub cond: Expr,
    pub text: String,
}

/// One clause of a list comprehension, in source order.
#[derive(Debug, Clone)]
pub enum CompClause {
    /// `name <- seq`
    Generator { name: String, seq: Expr },
    /// a boolean filter between generators
    Filter(Expr),
}

/// How a call site resolves.
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// Bound to a builtin at parse time.
    Builtin(Arc<dyn BuiltinFn>),
    /// Any expression evaluating to a function value.
    Dynamic(Box<Expr>),
}

/// A typed expression node.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: Type,
}

/// The expression forms of the language.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A constant, either written literally or frozen by constant
    /// reduction.
    Literal(Value),

    /// Variable reference; `slot` is present when the enclosing scope
    /// layout supports slot addressing.
    Identifier {
        name: String,
        slot: Option<SlotRef>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    /// Strict binary operators, including `in`/`not in` and dice.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Short-circuit `and`/`or`; yields the deciding operand itself.
    AndOr {
        op: LogicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `if(cond, then[, else])` — the untaken branch is never evaluated.
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    /// `object.field` member access.
    Dot {
        object: Box<Expr>,
        field: String,
    },

    /// `object[index]`.
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },

    /// `object[begin:end]`; either bound may be omitted.
    Slice {
        object: Box<Expr>,
        begin: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },

    /// List literal; always constructs a fresh container.
    ListLit(Vec<Expr>),

    /// Map literal; always constructs a fresh container.
    MapLit(Vec<(Expr, Expr)>),

    /// String interpolation pieces, concatenated after stringifying.
    Interpolate(Vec<Expr>),

    /// `map(seq, body)` — body sees the element as `binding` (the
    /// default `value`, or the name given in the three-argument form),
    /// plus `index` and `key`.
    MapOp {
        seq: Box<Expr>,
        binding: String,
        body: Box<Expr>,
    },

    /// `filter(seq, body)` / `filter(seq, name, body)`.
    FilterOp {
        seq: Box<Expr>,
        binding: String,
        body: Box<Expr>,
    },

    /// `find(seq, body)` — first matching element or null.
    FindOp {
        seq: Box<Expr>,
        binding: String,
        body: Box<Expr>,
    },

    /// `[yield | name <- seq, filter, ...]` with cross-product
    /// generators.
    Comprehension {
        yield_expr: Box<Expr>,
        clauses: Vec<CompClause>,
        /// All generator names, in slot order of the comprehension frame.
        binding_names: Vec<String>,
    },

    /// `def` lambda (named, anonymous, or generic). The template carries
    /// the body; `captures` are the enclosing slots to snapshot when the
    /// value is created. Closure-free lambdas have no captures and
    /// evaluate to the shared template without allocating.
    Lambda {
        template: Arc<FunctionValue>,
        captures: Vec<SlotRef>,
    },

    Call {
        target: CallTarget,
        args: Vec<Expr>,
    },

    /// `f<<int, string>>` generic instantiation.
    GenericInstantiation {
        target: Box<Expr>,
        type_args: Vec<Type>,
    },

    /// `let name = value; body` — one new slot for the rest of the
    /// sequence.
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },

    /// `body where a = ..., b = ...` with lazily-memoized bindings.
    Where {
        bindings: Vec<WhereBinding>,
        body: Box<Expr>,
    },

    /// `body asserting cond, ...` — runtime-checked preconditions.
    Assert {
        body: Box<Expr>,
        guards: Vec<AssertGuard>,
    },

    /// `expr is T` / `expr is not T` runtime type test.
    IsType {
        expr: Box<Expr>,
        test: Type,
        negated: bool,
    },

    /// `expr <- T` (check and narrow) or `expr :: T` (check only).
    Cast {
        expr: Box<Expr>,
        target: Type,
        narrowing: bool,
    },

    /// `first; second` — builds a deferred command value.
    CommandSeq {
        first: Box<Expr>,
        second: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span, ty: Type) -> Self {
        Self { kind, span, ty }
    }

    pub fn literal(value: Value, span: Span) -> Self {
        let ty = Type::of_value(&value);
        Self::new(ExprKind::Literal(value), span, ty)
    }

    /// The node's static type, fixed at parse time.
    pub fn static_type(&self) -> &Type {
        &self.ty
    }

    /// The frozen constant, if this node is one.
    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this node itself can be lowered to bytecode. `let`,
    /// command sequencing, and generic lambdas stay tree-walked; a
    /// non-lowerable subtree embeds in its parent's bytecode as an
    /// opaque step.
    pub fn is_vm_lowerable(&self) -> bool {
        match &self.kind {
            ExprKind::Let { .. } | ExprKind::CommandSeq { .. } => false,
            ExprKind::Lambda { template, .. } => !template.is_generic(),
            ExprKind::GenericInstantiation { .. } => false,
            _ => true,
        }
    }

    /// Visit direct children.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&Expr)) {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Identifier { .. } | ExprKind::Lambda { .. } => {}
            ExprKind::Unary { operand, .. } => f(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::AndOr { left, right, .. } => {
                f(left);
                f(right);
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                f(cond);
                f(then);
                f(otherwise);
            }
            ExprKind::Dot { object, .. } => f(object),
            ExprKind::Index { object, index } => {
                f(object);
                f(index);
            }
            ExprKind::Slice { object, begin, end } => {
                f(object);
                if let Some(b) = begin {
                    f(b);
                }
                if let Some(e) = end {
                    f(e);
                }
            }
            ExprKind::ListLit(items) => items.iter().for_each(|i| f(i)),
            ExprKind::MapLit(pairs) => {
                for (k, v) in pairs {
                    f(k);
                    f(v);
                }
            }
            ExprKind::Interpolate(pieces) => pieces.iter().for_each(|p| f(p)),
            ExprKind::MapOp { seq, body, .. }
            | ExprKind::FilterOp { seq, body, .. }
            | ExprKind::FindOp { seq, body, .. } => {
                f(seq);
                f(body);
            }
            ExprKind::Comprehension {
                yield_expr,
                clauses,
                ..
            } => {
                for clause in clauses {
                    match clause {
                        CompClause::Generator { seq, .. } => f(seq),
                        CompClause::Filter(cond) => f(cond),
                    }
                }
                f(yield_expr);
            }
            ExprKind::Call { target, args } => {
                if let CallTarget::Dynamic(target) = target {
                    f(target);
                }
                args.iter().for_each(|a| f(a));
            }
            ExprKind::GenericInstantiation { target, .. } => f(target),
            ExprKind::Let { value, body, .. } => {
                f(value);
                f(body);
            }
            ExprKind::Where { bindings, body } => {
                for b in bindings {
                    f(&b.expr);
                }
                f(body);
            }
            ExprKind::Assert { body, guards } => {
                for g in guards {
                    f(&g.cond);
                }
                f(body);
            }
            ExprKind::IsType { expr, .. } | ExprKind::Cast { expr, .. } => f(expr),
            ExprKind::CommandSeq { first, second } => {
                f(first);
                f(second);
            }
        }
    }

    /// Depth-first walk over this subtree, parents before children.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        self.for_each_child(&mut |child| child.walk(f));
    }

    /// Evaluate against a scope.
    pub fn evaluate(&self, scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<Value> {
        self.eval_inner(scope, ctx).map_err(|e| e.or_span(self.span))
    }

    fn eval_inner(&self, scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<Value> {
        match &self.kind {
            ExprKind::Literal(v) => Ok(v.clone()),

            ExprKind::Identifier { name, slot } => match slot {
                Some(slot) => get_slot_up(scope, slot.frames_up, slot.index, ctx),
                None => scope.get(name, ctx),
            },

            ExprKind::Unary { op, operand } => {
                let v = operand.evaluate(scope, ctx)?;
                ops::apply_unary(*op, &v)
            }

            ExprKind::Binary { op, left, right } => {
                let l = left.evaluate(scope, ctx)?;
                let r = right.evaluate(scope, ctx)?;
                ops::apply_binary(*op, &l, &r, ctx)
            }

            ExprKind::AndOr { op, left, right } => {
                let l = left.evaluate(scope, ctx)?;
                // the deciding operand is the result, not a bool
                match op {
                    LogicOp::And if !l.is_truthy() => Ok(l),
                    LogicOp::Or if l.is_truthy() => Ok(l),
                    _ => right.evaluate(scope, ctx),
                }
            }

            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                if cond.evaluate(scope, ctx)?.is_truthy() {
                    then.evaluate(scope, ctx)
                } else {
                    otherwise.evaluate(scope, ctx)
                }
            }

            ExprKind::Dot { object, field } => {
                let obj = object.evaluate(scope, ctx)?;
                ops::member_value(&obj, field, ctx)
            }

            ExprKind::Index { object, index } => {
                let obj = object.evaluate(scope, ctx)?;
                let idx = index.evaluate(scope, ctx)?;
                ops::index_value(&obj, &idx)
            }

            ExprKind::Slice { object, begin, end } => {
                let obj = object.evaluate(scope, ctx)?;
                let begin = match begin {
                    Some(b) => eval_index_bound(b, scope, ctx)?,
                    None => 0,
                };
                let end = match end {
                    Some(e) => eval_index_bound(e, scope, ctx)?,
                    None => obj.num_elements().unwrap_or(0) as i64,
                };
                ops::slice_value(&obj, begin, end)
            }

            ExprKind::ListLit(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.evaluate(scope, ctx)?);
                }
                Ok(ops::make_list(out))
            }

            ExprKind::MapLit(pairs) => {
                let mut entries = ValueMap::with_capacity(pairs.len());
                for (k, v) in pairs {
                    entries.insert(k.evaluate(scope, ctx)?, v.evaluate(scope, ctx)?);
                }
                Ok(Value::Map(Arc::new(entries)))
            }

            ExprKind::Interpolate(pieces) => {
                let mut out = String::new();
                for piece in pieces {
                    let v = piece.evaluate(scope, ctx)?;
                    match v {
                        Value::Str(s) => out.push_str(&s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(Value::string(out))
            }

            ExprKind::MapOp { seq, binding, body } => {
                let input = seq.evaluate(scope, ctx)?;
                let mut out = Vec::new();
                each_element(&input, binding, scope, ctx, &mut |frame, ctx| {
                    out.push(body.evaluate(frame, ctx)?);
                    Ok(true)
                })?;
                Ok(ops::make_list(out))
            }

            ExprKind::FilterOp { seq, binding, body } => {
                let input = seq.evaluate(scope, ctx)?;
                match &input {
                    Value::Map(entries) => {
                        let mut kept = ValueMap::new();
                        let mut index = 0i64;
                        for (k, v) in entries.iter() {
                            let frame =
                                IterationScope::new(v.clone(), index, k.clone(), binding, scope);
                            if body.evaluate(&frame, ctx)?.is_truthy() {
                                kept.insert(k.clone(), v.clone());
                            }
                            index += 1;
                        }
                        Ok(Value::Map(Arc::new(kept)))
                    }
                    _ => {
                        let mut kept = Vec::new();
                        each_element(&input, binding, scope, ctx, &mut |frame, ctx| {
                            if body.evaluate(frame, ctx)?.is_truthy() {
                                kept.push(frame.value.clone());
                            }
                            Ok(true)
                        })?;
                        Ok(ops::make_list(kept))
                    }
                }
            }

            ExprKind::FindOp { seq, binding, body } => {
                let input = seq.evaluate(scope, ctx)?;
                let mut found = Value::Null;
                each_element(&input, binding, scope, ctx, &mut |frame, ctx| {
                    if body.evaluate(frame, ctx)?.is_truthy() {
                        found = frame.value.clone();
                        Ok(false)
                    } else {
                        Ok(true)
                    }
                })?;
                Ok(found)
            }

            ExprKind::Comprehension {
                yield_expr,
                clauses,
                binding_names,
            } => {
                let mut out = Vec::new();
                let mut values = vec![Value::Null; binding_names.len()];
                comprehend(
                    yield_expr,
                    clauses,
                    binding_names,
                    0,
                    0,
                    &mut values,
                    scope,
                    ctx,
                    &mut out,
                )?;
                Ok(ops::make_list(out))
            }

            ExprKind::Lambda { template, captures } => {
                if captures.is_empty() {
                    // closure-free: the parse-time template is the value
                    return Ok(Value::Function(template.clone()));
                }
                let mut captured = Vec::with_capacity(captures.len());
                for slot in captures {
                    captured.push(get_slot_up(scope, slot.frames_up, slot.index, ctx)?);
                }
                Ok(Value::Function(Arc::new(template.with_captures(captured))))
            }

            ExprKind::Call { target, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.evaluate(scope, ctx)?);
                }
                match target {
                    CallTarget::Builtin(f) => f.call(&values, scope, ctx),
                    CallTarget::Dynamic(target) => {
                        let callee = target.evaluate(scope, ctx)?;
                        match callee {
                            Value::Function(f) => FunctionValue::call(&f, values, scope, ctx),
                            other => Err(EvalError::new(EvalErrorKind::NotCallable {
                                ty: other.type_name(),
                            })),
                        }
                    }
                }
            }

            ExprKind::GenericInstantiation { target, type_args } => {
                let callee = target.evaluate(scope, ctx)?;
                match callee {
                    Value::Function(f) => {
                        Ok(Value::Function(Arc::new(f.instantiate(type_args)?)))
                    }
                    other => Err(EvalError::new(EvalErrorKind::NotCallable {
                        ty: other.type_name(),
                    })),
                }
            }

            ExprKind::Let { name, value, body } => {
                let bound = value.evaluate(scope, ctx)?;
                let frame =
                    FrameScope::new(std::slice::from_ref(name), vec![bound], scope);
                body.evaluate(&frame, ctx)
            }

            ExprKind::Where { bindings, body } => {
                let closure = WhereScope::new(bindings, scope);
                body.evaluate(&closure, ctx)
            }

            ExprKind::Assert { body, guards } => {
                for guard in guards {
                    if !guard.cond.evaluate(scope, ctx)?.is_truthy() {
                        return Err(EvalError::with_span(
                            EvalErrorKind::AssertionFailed {
                                condition: guard.text.clone(),
                            },
                            guard.cond.span,
                        ));
                    }
                }
                body.evaluate(scope, ctx)
            }

            ExprKind::IsType {
                expr,
                test,
                negated,
            } => {
                let v = expr.evaluate(scope, ctx)?;
                let matches = ctx.value_matches_type(&v, test);
                Ok(Value::Bool(matches != *negated))
            }

            ExprKind::Cast {
                expr,
                target,
                narrowing,
            } => {
                let v = expr.evaluate(scope, ctx)?;
                if ctx.value_matches_type(&v, target) {
                    Ok(v)
                } else {
                    let kind = if *narrowing {
                        EvalErrorKind::CastFailed {
                            value: v.to_source(),
                            ty: target.to_string(),
                        }
                    } else {
                        EvalErrorKind::TypeCheckFailed {
                            value: v.to_source(),
                            ty: target.to_string(),
                        }
                    };
                    Err(EvalError::new(kind))
                }
            }

            ExprKind::CommandSeq { first, second } => {
                let a = first.evaluate(scope, ctx)?;
                let b = second.evaluate(scope, ctx)?;
                Ok(CommandSeq::sequence(a, b))
            }
        }
    }
}

fn eval_index_bound(
    expr: &Expr,
    scope: &dyn Callable,
    ctx: &mut EvalContext,
) -> EvalResult<i64> {
    let v = expr.evaluate(scope, ctx)?;
    v.as_int().ok_or_else(|| {
        EvalError::with_span(
            EvalErrorKind::IllegalIndexOperand { ty: v.type_name() },
            expr.span,
        )
    })
}

/// Drive one iteration scope per element of a list or map. The visitor
/// returns `Ok(false)` to stop early.
pub fn each_element(
    input: &Value,
    binding: &str,
    scope: &dyn Callable,
    ctx: &mut EvalContext,
    visit: &mut dyn FnMut(&IterationScope<'_>, &mut EvalContext) -> EvalResult<bool>,
) -> EvalResult<()> {
    match input {
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let frame =
                    IterationScope::new(item.clone(), i as i64, Value::Null, binding, scope);
                if !visit(&frame, ctx)? {
                    break;
                }
            }
            Ok(())
        }
        Value::Map(entries) => {
            for (i, (k, v)) in entries.iter().enumerate() {
                let frame = IterationScope::new(v.clone(), i as i64, k.clone(), binding, scope);
                if !visit(&frame, ctx)? {
                    break;
                }
            }
            Ok(())
        }
        other => Err(EvalError::new(EvalErrorKind::Other {
            message: format!("cannot iterate over a {}", other.type_name()),
        })),
    }
}

/// Recursive comprehension driver: generators nest, filters gate, the
/// innermost level yields. All generator bindings live in one frame.
#[allow(clippy::too_many_arguments)]
fn comprehend(
    yield_expr: &Expr,
    clauses: &[CompClause],
    names: &[String],
    clause_idx: usize,
    binding_idx: usize,
    values: &mut Vec<Value>,
    scope: &dyn Callable,
    ctx: &mut EvalContext,
    out: &mut Vec<Value>,
) -> EvalResult<()> {
    if clause_idx == clauses.len() {
        let frame = FrameScope::new(names, values.clone(), scope);
        out.push(yield_expr.evaluate(&frame, ctx)?);
        return Ok(());
    }
    match &clauses[clause_idx] {
        CompClause::Generator { seq, .. } => {
            let input = seq.evaluate(&FrameScope::new(names, values.clone(), scope), ctx)?;
            let items = match input.as_list() {
                Some(items) => items.to_vec(),
                None => {
                    return Err(EvalError::with_span(
                        EvalErrorKind::Other {
                            message: format!(
                                "comprehension generator needs a list, got {}",
                                input.type_name()
                            ),
                        },
                        seq.span,
                    ));
                }
            };
            for item in items {
                values[binding_idx] = item;
                comprehend(
                    yield_expr,
                    clauses,
                    names,
                    clause_idx + 1,
                    binding_idx + 1,
                    values,
                    scope,
                    ctx,
                    out,
                )?;
            }
            values[binding_idx] = Value::Null;
            Ok(())
        }
        CompClause::Filter(cond) => {
            let frame = FrameScope::new(names, values.clone(), scope);
            if cond.evaluate(&frame, ctx)?.is_truthy() {
                comprehend(
                    yield_expr,
                    clauses,
                    names,
                    clause_idx + 1,
                    binding_idx,
                    values,
                    scope,
                    ctx,
                    out,
                )?;
            }
            Ok(())
        }
    }
}
