//! The bytecode executor.
//!
//! One instruction-pointer loop over an operand stack. Scoped
//! constructs (loops, comprehensions, where groups) execute their
//! embedded sub-programs recursively against a wrapper scope built on
//! the native stack, so the runtime scope chain mirrors the parse-time
//! frame stack exactly as tree-walk evaluation does.
//!
//! Every runtime invariant violation is fatal: the error leaves with
//! the offending instruction's source span, an operand-stack and
//! disassembly excerpt, and the active formula call stack, and is
//! logged before it propagates. Nothing is silently recovered.

use std::sync::{Arc, Mutex};

use cadence_cfl_ast::expr::each_element;
use cadence_cfl_ast::scopes::{FrameScope, IterationScope};
use cadence_cfl_ast::{
    ops, Callable, EvalContext, EvalError, EvalErrorKind, EvalResult, FunctionValue, Value,
    ValueMap,
};

use crate::bytecode::{CompClauseProgram, CompSub, Instr, Program, WhereSub};

/// Execute a compiled program against a scope.
pub fn execute(
    program: &Program,
    scope: &dyn Callable,
    ctx: &mut EvalContext,
) -> EvalResult<Value> {
    let mut stack: Vec<Value> = Vec::with_capacity(16);
    let mut ip: usize = 0;

    while ip < program.instrs.len() {
        match step(program, ip, &mut stack, scope, ctx) {
            Ok(next) => ip = next,
            Err(err) => {
                let err = err
                    .or_span(program.spans[ip])
                    .push_frame(dump(program, ip, &stack, ctx));
                tracing::error!("formula vm failure: {err}");
                return Err(err);
            }
        }
    }

    stack.pop().ok_or_else(|| {
        EvalError::new(EvalErrorKind::Other {
            message: "vm finished with an empty operand stack".to_string(),
        })
    })
}

fn pop(stack: &mut Vec<Value>) -> EvalResult<Value> {
    stack.pop().ok_or_else(|| {
        EvalError::new(EvalErrorKind::Other {
            message: "operand stack underflow".to_string(),
        })
    })
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> EvalResult<Vec<Value>> {
    if stack.len() < n {
        return Err(EvalError::new(EvalErrorKind::Other {
            message: "operand stack underflow".to_string(),
        }));
    }
    Ok(stack.split_off(stack.len() - n))
}

fn jump(ip: usize, delta: i32) -> usize {
    (ip as i64 + delta as i64) as usize
}

fn step(
    program: &Program,
    ip: usize,
    stack: &mut Vec<Value>,
    scope: &dyn Callable,
    ctx: &mut EvalContext,
) -> EvalResult<usize> {
    let next = ip + 1;
    match &program.instrs[ip] {
        Instr::PushConst(c) => stack.push(program.consts[*c as usize].clone()),
        Instr::PushNull => stack.push(Value::Null),
        Instr::PushInt(i) => stack.push(Value::Int(*i as i64)),

        Instr::LoadSlot { up, index } => {
            stack.push(cadence_cfl_ast::foundation::callable::get_slot_up(
                scope, *up, *index, ctx,
            )?);
        }
        Instr::LoadName(n) => stack.push(scope.get(&program.names[*n as usize], ctx)?),

        Instr::Unary(op) => {
            let v = pop(stack)?;
            stack.push(ops::apply_unary(*op, &v)?);
        }
        Instr::Binary(op) => {
            let right = pop(stack)?;
            let left = pop(stack)?;
            stack.push(ops::apply_binary(*op, &left, &right, ctx)?);
        }

        Instr::Index => {
            let index = pop(stack)?;
            let object = pop(stack)?;
            stack.push(ops::index_value(&object, &index)?);
        }
        Instr::Index0 | Instr::Index1 | Instr::Index2 => {
            let at = match program.instrs[ip] {
                Instr::Index0 => 0,
                Instr::Index1 => 1,
                _ => 2,
            };
            let object = pop(stack)?;
            stack.push(ops::index_value(&object, &Value::Int(at))?);
        }
        Instr::Slice { has_begin, has_end } => {
            let end = if *has_end { Some(pop(stack)?) } else { None };
            let begin = if *has_begin { Some(pop(stack)?) } else { None };
            let object = pop(stack)?;
            let begin = match begin {
                Some(v) => as_bound(&v)?,
                None => 0,
            };
            let end = match end {
                Some(v) => as_bound(&v)?,
                None => object.num_elements().unwrap_or(0) as i64,
            };
            stack.push(ops::slice_value(&object, begin, end)?);
        }
        Instr::Member(n) => {
            let object = pop(stack)?;
            stack.push(ops::member_value(&object, &program.names[*n as usize], ctx)?);
        }

        Instr::MakeList(n) => {
            let items = pop_n(stack, *n as usize)?;
            stack.push(ops::make_list(items));
        }
        Instr::MakeMap(n) => {
            let mut flat = pop_n(stack, *n as usize * 2)?;
            let mut entries = ValueMap::with_capacity(*n as usize);
            for pair in flat.chunks_exact_mut(2) {
                entries.insert(pair[0].clone(), pair[1].clone());
            }
            stack.push(Value::Map(Arc::new(entries)));
        }
        Instr::Interpolate(n) => {
            let pieces = pop_n(stack, *n as usize)?;
            let mut out = String::new();
            for piece in pieces {
                match piece {
                    Value::Str(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                }
            }
            stack.push(Value::string(out));
        }

        Instr::Jump(d) => return Ok(jump(ip, *d)),
        Instr::JumpIf(d) => {
            if pop(stack)?.is_truthy() {
                return Ok(jump(ip, *d));
            }
        }
        Instr::JumpUnless(d) => {
            if !pop(stack)?.is_truthy() {
                return Ok(jump(ip, *d));
            }
        }
        Instr::JumpIfPeek(d) => {
            let top = stack.last().ok_or_else(|| {
                EvalError::new(EvalErrorKind::Other {
                    message: "operand stack underflow".to_string(),
                })
            })?;
            if top.is_truthy() {
                return Ok(jump(ip, *d));
            }
        }
        Instr::JumpUnlessPeek(d) => {
            let top = stack.last().ok_or_else(|| {
                EvalError::new(EvalErrorKind::Other {
                    message: "operand stack underflow".to_string(),
                })
            })?;
            if !top.is_truthy() {
                return Ok(jump(ip, *d));
            }
        }

        Instr::Pop => {
            pop(stack)?;
        }
        Instr::Dup => {
            let top = stack.last().cloned().ok_or_else(|| {
                EvalError::new(EvalErrorKind::Other {
                    message: "operand stack underflow".to_string(),
                })
            })?;
            stack.push(top);
        }

        Instr::CallBuiltin { func, argc } => {
            let args = pop_n(stack, *argc as usize)?;
            stack.push(program.builtins[*func as usize].call(&args, scope, ctx)?);
        }
        Instr::CallFunction { argc } => {
            let args = pop_n(stack, *argc as usize)?;
            let callee = pop(stack)?;
            match callee {
                Value::Function(func) => {
                    stack.push(FunctionValue::call(&func, args, scope, ctx)?);
                }
                other => {
                    return Err(EvalError::new(EvalErrorKind::NotCallable {
                        ty: other.type_name(),
                    }));
                }
            }
        }
        Instr::MakeClosure { func, captures } => {
            let captured = pop_n(stack, *captures as usize)?;
            let template = &program.functions[*func as usize];
            stack.push(Value::Function(Arc::new(template.with_captures(captured))));
        }

        Instr::IsType { ty, negated } => {
            let v = pop(stack)?;
            let matches = ctx.value_matches_type(&v, &program.types[*ty as usize]);
            stack.push(Value::Bool(matches != *negated));
        }
        Instr::Cast { ty, narrowing } => {
            let v = pop(stack)?;
            let target = &program.types[*ty as usize];
            if ctx.value_matches_type(&v, target) {
                stack.push(v);
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
                return Err(EvalError::new(kind));
            }
        }
        Instr::Fail(m) => {
            return Err(EvalError::new(EvalErrorKind::AssertionFailed {
                condition: program.messages[*m as usize].clone(),
            }));
        }

        Instr::MapLoop(l) => {
            let sub = &program.loops[*l as usize];
            let input = pop(stack)?;
            let mut out = Vec::new();
            each_element(&input, &sub.binding, scope, ctx, &mut |frame, ctx| {
                out.push(execute(&sub.body, frame, ctx)?);
                Ok(true)
            })?;
            stack.push(ops::make_list(out));
        }
        Instr::FilterLoop(l) => {
            let sub = &program.loops[*l as usize];
            let input = pop(stack)?;
            match &input {
                Value::Map(entries) => {
                    let mut kept = ValueMap::new();
                    for (index, (k, v)) in entries.iter().enumerate() {
                        let frame = IterationScope::new(
                            v.clone(),
                            index as i64,
                            k.clone(),
                            &sub.binding,
                            scope,
                        );
                        if execute(&sub.body, &frame, ctx)?.is_truthy() {
                            kept.insert(k.clone(), v.clone());
                        }
                    }
                    stack.push(Value::Map(Arc::new(kept)));
                }
                _ => {
                    let mut kept = Vec::new();
                    each_element(&input, &sub.binding, scope, ctx, &mut |frame, ctx| {
                        if execute(&sub.body, frame, ctx)?.is_truthy() {
                            kept.push(frame.value.clone());
                        }
                        Ok(true)
                    })?;
                    stack.push(ops::make_list(kept));
                }
            }
        }
        Instr::FindLoop(l) => {
            let sub = &program.loops[*l as usize];
            let input = pop(stack)?;
            let mut found = Value::Null;
            each_element(&input, &sub.binding, scope, ctx, &mut |frame, ctx| {
                if execute(&sub.body, frame, ctx)?.is_truthy() {
                    found = frame.value.clone();
                    Ok(false)
                } else {
                    Ok(true)
                }
            })?;
            stack.push(found);
        }
        Instr::CompLoop(c) => {
            let sub = &program.comps[*c as usize];
            let mut out = Vec::new();
            let mut values = vec![Value::Null; sub.names.len()];
            comprehend(sub, 0, 0, &mut values, scope, ctx, &mut out)?;
            stack.push(ops::make_list(out));
        }

        Instr::WithWhere(w) => {
            let sub = &program.wheres[*w as usize];
            let wrapper = VmWhereScope::new(sub, scope);
            stack.push(execute(&sub.body, &wrapper, ctx)?);
        }

        Instr::TreeWalk(e) => {
            stack.push(program.exprs[*e as usize].evaluate(scope, ctx)?);
        }
    }
    Ok(next)
}

fn as_bound(value: &Value) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        EvalError::new(EvalErrorKind::IllegalIndexOperand {
            ty: value.type_name(),
        })
    })
}

/// Comprehension driver over compiled clause programs; mirrors the
/// tree-walk evaluator's nesting exactly.
fn comprehend(
    sub: &CompSub,
    clause_idx: usize,
    binding_idx: usize,
    values: &mut Vec<Value>,
    scope: &dyn Callable,
    ctx: &mut EvalContext,
    out: &mut Vec<Value>,
) -> EvalResult<()> {
    if clause_idx == sub.clauses.len() {
        let frame = FrameScope::new(&sub.names, values.clone(), scope);
        out.push(execute(&sub.yields, &frame, ctx)?);
        return Ok(());
    }
    match &sub.clauses[clause_idx] {
        CompClauseProgram::Generator(seq) => {
            let input = {
                let frame = FrameScope::new(&sub.names, values.clone(), scope);
                execute(seq, &frame, ctx)?
            };
            let items = match input.as_list() {
                Some(items) => items.to_vec(),
                None => {
                    return Err(EvalError::new(EvalErrorKind::Other {
                        message: format!(
                            "comprehension generator needs a list, got {}",
                            input.type_name()
                        ),
                    }));
                }
            };
            for item in items {
                values[binding_idx] = item;
                comprehend(sub, clause_idx + 1, binding_idx + 1, values, scope, ctx, out)?;
            }
            values[binding_idx] = Value::Null;
            Ok(())
        }
        CompClauseProgram::Filter(cond) => {
            let keep = {
                let frame = FrameScope::new(&sub.names, values.clone(), scope);
                execute(cond, &frame, ctx)?.is_truthy()
            };
            if keep {
                comprehend(sub, clause_idx + 1, binding_idx, values, scope, ctx, out)?;
            }
            Ok(())
        }
    }
}

/// Memoization cell for one where binding.
#[derive(Debug, Clone)]
enum Memo {
    Empty,
    InProgress,
    Done(Value),
}

/// The VM's lazily-memoizing where adapter: bindings run their compiled
/// sub-programs on first read, against this scope itself so they may
/// reference each other. The memo is private to one activation.
#[derive(Debug)]
struct VmWhereScope<'a> {
    sub: &'a WhereSub,
    memo: Mutex<Vec<Memo>>,
    parent: &'a dyn Callable,
}

impl<'a> VmWhereScope<'a> {
    fn new(sub: &'a WhereSub, parent: &'a dyn Callable) -> Self {
        Self {
            sub,
            memo: Mutex::new(vec![Memo::Empty; sub.names.len()]),
            parent,
        }
    }

    fn force(&self, at: usize, ctx: &mut EvalContext) -> EvalResult<Value> {
        {
            let mut memo = self.memo.lock().expect("where memo poisoned");
            match &memo[at] {
                Memo::Done(v) => return Ok(v.clone()),
                Memo::InProgress => {
                    return Err(EvalError::new(EvalErrorKind::Other {
                        message: format!("cyclic where binding '{}'", self.sub.names[at]),
                    }));
                }
                Memo::Empty => memo[at] = Memo::InProgress,
            }
        }
        let result = execute(&self.sub.bindings[at], self, ctx);
        let mut memo = self.memo.lock().expect("where memo poisoned");
        match &result {
            Ok(v) => memo[at] = Memo::Done(v.clone()),
            Err(_) => memo[at] = Memo::Empty,
        }
        result
    }
}

impl Callable for VmWhereScope<'_> {
    fn get(&self, name: &str, ctx: &mut EvalContext) -> EvalResult<Value> {
        match self.sub.names.iter().position(|n| n == name) {
            Some(at) => self.force(at, ctx),
            None => self.parent.get(name, ctx),
        }
    }

    fn get_slot(&self, slot: u16, ctx: &mut EvalContext) -> EvalResult<Value> {
        if (slot as usize) < self.sub.names.len() {
            self.force(slot as usize, ctx)
        } else {
            Err(EvalError::new(EvalErrorKind::NoSlots))
        }
    }

    fn has_slots(&self) -> bool {
        true
    }

    fn parent_scope(&self) -> Option<&dyn Callable> {
        Some(self.parent)
    }

    fn inputs(&self) -> Vec<String> {
        self.sub.names.clone()
    }
}

/// Render the failure context: operand stack, a disassembly window
/// around the failing instruction, and the formula call stack.
fn dump(program: &Program, ip: usize, stack: &[Value], ctx: &EvalContext) -> String {
    use std::fmt::Write as _;
    let mut out = String::from("vm state:\n  operand stack:");
    if stack.is_empty() {
        out.push_str(" (empty)");
    }
    for (i, value) in stack.iter().rev().take(8).enumerate() {
        let _ = write!(out, "\n    [{i}] {}", value.to_source());
    }
    let lo = ip.saturating_sub(3);
    let hi = (ip + 4).min(program.instrs.len());
    out.push_str("\n  instructions:");
    for at in lo..hi {
        let marker = if at == ip { ">" } else { " " };
        let _ = write!(out, "\n   {marker}{at:04} {:?}", program.instrs[at]);
    }
    for frame in ctx.render_call_stack() {
        let _ = write!(out, "\n  {frame}");
    }
    out
}
