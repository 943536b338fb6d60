//! AST → bytecode lowering.
//!
//! Lowering is total: a node the VM cannot express embeds as an opaque
//! tree-walk step, and a non-lowerable *root* yields no program at all
//! (the formula stays tree-walked). Along the way: slot-resolved
//! identifiers become direct loads, constants dedupe into the pool,
//! constant list indices 0..2 get dedicated opcodes, and calls to
//! simple user lambdas inline their bodies instead of dispatching.

use std::sync::Arc;

use cadence_cfl_ast::{
    CallTarget, CompClause, Expr, ExprKind, FunctionValue, LogicOp, SlotRef, Value,
};

use crate::bytecode::{CompClauseProgram, CompSub, Instr, LoopSub, Program, WhereSub};

/// Lower a formula's root expression. `None` means the VM declines the
/// whole formula (non-lowerable root, or nothing would run on the VM
/// anyway).
pub fn lower_formula(root: &Expr) -> Option<Program> {
    if !root.is_vm_lowerable() {
        return None;
    }
    let mut program = Program::new();
    let mut lowerer = Lowerer {
        program: &mut program,
        inline_budget: 16,
        frames: Vec::new(),
    };
    lowerer.emit(root);
    if matches!(program.instrs.as_slice(), [Instr::TreeWalk(_)]) {
        return None;
    }
    Some(program)
}

/// Functions known per slot of one lowering-time frame, for call
/// inlining through `where` bindings.
type KnownFrame = Vec<Option<Arc<FunctionValue>>>;

struct Lowerer<'p> {
    program: &'p mut Program,
    /// Bound on nested call inlining, against pathological growth.
    inline_budget: u32,
    /// One entry per scope frame a sub-program will run under,
    /// innermost last; aligned with runtime `frames_up` counting.
    frames: Vec<KnownFrame>,
}

impl<'p> Lowerer<'p> {
    /// Lower one expression into a fresh self-contained sub-program,
    /// running `pushed` frames deeper than the current position.
    fn subprogram(&self, expr: &Expr, pushed: KnownFrame) -> Program {
        let mut program = Program::new();
        let mut frames = self.frames.clone();
        frames.push(pushed);
        let mut lowerer = Lowerer {
            program: &mut program,
            inline_budget: self.inline_budget,
            frames,
        };
        lowerer.emit(expr);
        program
    }

    /// The constant function a slot reference is known to hold, if the
    /// reference lands in a lowering-time frame that pinned one.
    fn known_function(&self, slot: &SlotRef) -> Option<Arc<FunctionValue>> {
        let at = self
            .frames
            .len()
            .checked_sub(1 + slot.frames_up as usize)?;
        self.frames[at].get(slot.index as usize)?.clone()
    }

    fn opaque(&mut self, expr: &Expr) {
        let at = self.program.add_expr(Arc::new(expr.clone()));
        self.program.emit(Instr::TreeWalk(at), expr.span);
    }

    fn emit(&mut self, expr: &Expr) {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(value) => match value {
                Value::Null => self.program.emit(Instr::PushNull, span),
                Value::Int(i) if i32::try_from(*i).is_ok() => {
                    self.program.emit(Instr::PushInt(*i as i32), span);
                }
                other => {
                    let at = self.program.add_const(other.clone());
                    self.program.emit(Instr::PushConst(at), span);
                }
            },

            ExprKind::Identifier { name, slot } => match slot {
                Some(slot) => self.program.emit(
                    Instr::LoadSlot {
                        up: slot.frames_up,
                        index: slot.index,
                    },
                    span,
                ),
                None => {
                    let at = self.program.add_name(name);
                    self.program.emit(Instr::LoadName(at), span);
                }
            },

            ExprKind::Unary { op, operand } => {
                self.emit(operand);
                self.program.emit(Instr::Unary(*op), span);
            }

            ExprKind::Binary { op, left, right } => {
                self.emit(left);
                self.emit(right);
                self.program.emit(Instr::Binary(*op), span);
            }

            ExprKind::AndOr { op, left, right } => {
                self.emit(left);
                let short = self.program.offset();
                let jump = match op {
                    LogicOp::And => Instr::JumpUnlessPeek(0),
                    LogicOp::Or => Instr::JumpIfPeek(0),
                };
                self.program.emit(jump, span);
                self.program.emit(Instr::Pop, span);
                self.emit(right);
                let end = self.program.offset();
                self.program.patch_jump(short, end);
            }

            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.emit(cond);
                let to_else = self.program.offset();
                self.program.emit(Instr::JumpUnless(0), span);
                self.emit(then);
                let to_end = self.program.offset();
                self.program.emit(Instr::Jump(0), span);
                self.program.patch_jump(to_else, self.program.offset());
                self.emit(otherwise);
                let end = self.program.offset();
                self.program.patch_jump(to_end, end);
            }

            ExprKind::Dot { object, field } => {
                self.emit(object);
                let at = self.program.add_name(field);
                self.program.emit(Instr::Member(at), span);
            }

            ExprKind::Index { object, index } => {
                self.emit(object);
                match index.constant_value() {
                    Some(Value::Int(0)) => self.program.emit(Instr::Index0, span),
                    Some(Value::Int(1)) => self.program.emit(Instr::Index1, span),
                    Some(Value::Int(2)) => self.program.emit(Instr::Index2, span),
                    _ => {
                        self.emit(index);
                        self.program.emit(Instr::Index, span);
                    }
                }
            }

            ExprKind::Slice { object, begin, end } => {
                self.emit(object);
                if let Some(begin) = begin {
                    self.emit(begin);
                }
                if let Some(end) = end {
                    self.emit(end);
                }
                self.program.emit(
                    Instr::Slice {
                        has_begin: begin.is_some(),
                        has_end: end.is_some(),
                    },
                    span,
                );
            }

            ExprKind::ListLit(items) => {
                for item in items {
                    self.emit(item);
                }
                self.program.emit(Instr::MakeList(items.len() as u16), span);
            }

            ExprKind::MapLit(pairs) => {
                for (key, value) in pairs {
                    self.emit(key);
                    self.emit(value);
                }
                self.program.emit(Instr::MakeMap(pairs.len() as u16), span);
            }

            ExprKind::Interpolate(pieces) => {
                for piece in pieces {
                    self.emit(piece);
                }
                self.program
                    .emit(Instr::Interpolate(pieces.len() as u16), span);
            }

            ExprKind::MapOp { seq, binding, body } => {
                self.emit(seq);
                let sub = LoopSub {
                    binding: binding.clone(),
                    body: self.subprogram(body, KnownFrame::new()),
                };
                let at = self.program.add_loop(sub);
                self.program.emit(Instr::MapLoop(at), span);
            }

            ExprKind::FilterOp { seq, binding, body } => {
                self.emit(seq);
                let sub = LoopSub {
                    binding: binding.clone(),
                    body: self.subprogram(body, KnownFrame::new()),
                };
                let at = self.program.add_loop(sub);
                self.program.emit(Instr::FilterLoop(at), span);
            }

            ExprKind::FindOp { seq, binding, body } => {
                self.emit(seq);
                let sub = LoopSub {
                    binding: binding.clone(),
                    body: self.subprogram(body, KnownFrame::new()),
                };
                let at = self.program.add_loop(sub);
                self.program.emit(Instr::FindLoop(at), span);
            }

            ExprKind::Comprehension {
                yield_expr,
                clauses,
                binding_names,
            } => {
                let clauses = clauses
                    .iter()
                    .map(|clause| match clause {
                        CompClause::Generator { seq, .. } => CompClauseProgram::Generator(
                            self.subprogram(seq, KnownFrame::new()),
                        ),
                        CompClause::Filter(cond) => CompClauseProgram::Filter(
                            self.subprogram(cond, KnownFrame::new()),
                        ),
                    })
                    .collect();
                let sub = CompSub {
                    names: binding_names.clone(),
                    clauses,
                    yields: self.subprogram(yield_expr, KnownFrame::new()),
                };
                let at = self.program.add_comp(sub);
                self.program.emit(Instr::CompLoop(at), span);
            }

            ExprKind::Lambda { template, captures } => {
                // closure-free lambdas were frozen to literals by the
                // optimizer; reaching here means captures exist
                if template.is_generic() {
                    self.opaque(expr);
                    return;
                }
                for capture in captures {
                    self.program.emit(
                        Instr::LoadSlot {
                            up: capture.frames_up,
                            index: capture.index,
                        },
                        span,
                    );
                }
                let at = self.program.add_function(template.clone());
                self.program.emit(
                    Instr::MakeClosure {
                        func: at,
                        captures: captures.len() as u8,
                    },
                    span,
                );
            }

            ExprKind::Call { target, args } => match target {
                CallTarget::Builtin(builtin) => {
                    for arg in args {
                        self.emit(arg);
                    }
                    let at = self.program.add_builtin(builtin.clone());
                    self.program.emit(
                        Instr::CallBuiltin {
                            func: at,
                            argc: args.len() as u8,
                        },
                        span,
                    );
                }
                CallTarget::Dynamic(callee) => {
                    if self.inline_budget > 0 {
                        let known = match &callee.kind {
                            ExprKind::Identifier {
                                slot: Some(slot), ..
                            } => self.known_function(slot),
                            _ => match callee.constant_value() {
                                Some(Value::Function(func)) => Some(func.clone()),
                                _ => None,
                            },
                        };
                        if let Some(func) = known {
                            if let Some(inlined) = try_inline(&func, callee, args) {
                                self.inline_budget -= 1;
                                self.emit(&inlined);
                                return;
                            }
                        }
                    }
                    self.emit(callee);
                    for arg in args {
                        self.emit(arg);
                    }
                    self.program.emit(
                        Instr::CallFunction {
                            argc: args.len() as u8,
                        },
                        span,
                    );
                }
            },

            ExprKind::Where { bindings, body } => {
                let known: KnownFrame = bindings
                    .iter()
                    .map(|b| match b.expr.constant_value() {
                        Some(Value::Function(func)) => Some(func.clone()),
                        _ => None,
                    })
                    .collect();
                let sub = WhereSub {
                    names: bindings.iter().map(|b| b.name.clone()).collect(),
                    bindings: bindings
                        .iter()
                        .map(|b| self.subprogram(&b.expr, known.clone()))
                        .collect(),
                    body: self.subprogram(body, known.clone()),
                };
                let at = self.program.add_where(sub);
                self.program.emit(Instr::WithWhere(at), span);
            }

            ExprKind::Assert { body, guards } => {
                for guard in guards {
                    self.emit(&guard.cond);
                    let ok = self.program.offset();
                    self.program.emit(Instr::JumpIf(0), guard.cond.span);
                    let message = self.program.add_message(guard.text.clone());
                    self.program.emit(Instr::Fail(message), guard.cond.span);
                    let end = self.program.offset();
                    self.program.patch_jump(ok, end);
                }
                self.emit(body);
            }

            ExprKind::IsType {
                expr: inner,
                test,
                negated,
            } => {
                self.emit(inner);
                let ty = self.program.add_type(test.clone());
                self.program.emit(
                    Instr::IsType {
                        ty,
                        negated: *negated,
                    },
                    span,
                );
            }

            ExprKind::Cast {
                expr: inner,
                target,
                narrowing,
            } => {
                self.emit(inner);
                let ty = self.program.add_type(target.clone());
                self.program.emit(
                    Instr::Cast {
                        ty,
                        narrowing: *narrowing,
                    },
                    span,
                );
            }

            // command sequencing defers to the host, `let` rebuilds its
            // frame per evaluation, generic instantiation specializes at
            // runtime: all stay tree-walked
            ExprKind::Let { .. }
            | ExprKind::CommandSeq { .. }
            | ExprKind::GenericInstantiation { .. } => self.opaque(expr),
        }
    }
}

/// Inline a call to a simple user lambda: closure-free, non-generic,
/// guard-free, non-recursive, with every parameter either bound to a
/// trivial argument (constant or slot load) or referenced at most once
/// outside any loop body. Anything else keeps the dispatching call so
/// argument side effects stay single-shot.
fn try_inline(func: &Arc<FunctionValue>, callee: &Expr, args: &[Expr]) -> Option<Expr> {
    if func.is_generic()
        || func.needs_closure()
        || !func.body().guards.is_empty()
        || args.len() > func.params().len()
        || args.len() < func.min_args()
    {
        return None;
    }

    // fill defaulted tail parameters with their constants
    let mut full_args: Vec<Expr> = args.to_vec();
    for param in &func.params()[args.len()..] {
        let default = param.default.clone()?;
        full_args.push(Expr::literal(default, callee.span));
    }

    let mut usage = ParamUsage {
        counts: vec![0usize; full_args.len()],
        in_loop: vec![false; full_args.len()],
        self_referenced: false,
        self_index: full_args.len() as u16,
    };
    count_param_refs(&func.body().main, 0, false, &mut usage);
    if usage.self_referenced {
        return None;
    }
    for (i, arg) in full_args.iter().enumerate() {
        if is_trivial(arg) {
            continue;
        }
        if usage.counts[i] > 1 || usage.in_loop[i] {
            return None;
        }
    }
    substitute(&func.body().main, 0, &full_args)
}

fn is_trivial(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Literal(_) | ExprKind::Identifier { slot: Some(_), .. }
    )
}

struct ParamUsage {
    counts: Vec<usize>,
    in_loop: Vec<bool>,
    self_referenced: bool,
    self_index: u16,
}

/// Count references to the argument frame at `depth` frames out from
/// the walk position.
fn count_param_refs(expr: &Expr, depth: u16, in_loop: bool, usage: &mut ParamUsage) {
    match &expr.kind {
        ExprKind::Identifier { slot: Some(slot), .. } => {
            if slot.frames_up == depth {
                if slot.index == usage.self_index {
                    usage.self_referenced = true;
                } else if let Some(count) = usage.counts.get_mut(slot.index as usize) {
                    *count += 1;
                    usage.in_loop[slot.index as usize] |= in_loop;
                }
            }
        }
        ExprKind::Identifier { name, .. } => {
            // a dynamic lookup could land on a parameter name only
            // through the argument frame; treat any as a self reference
            // to stay conservative
            if name == "recurse" {
                usage.self_referenced = true;
            }
        }
        ExprKind::Lambda { captures, .. } => {
            for capture in captures {
                if capture.frames_up == depth {
                    if capture.index == usage.self_index {
                        usage.self_referenced = true;
                    } else if let Some(count) = usage.counts.get_mut(capture.index as usize) {
                        *count += 1;
                        usage.in_loop[capture.index as usize] |= in_loop;
                    }
                }
            }
        }
        ExprKind::Let { value, body, .. } => {
            count_param_refs(value, depth, in_loop, usage);
            count_param_refs(body, depth + 1, in_loop, usage);
        }
        ExprKind::Where { bindings, body } => {
            for binding in bindings {
                count_param_refs(&binding.expr, depth + 1, in_loop, usage);
            }
            count_param_refs(body, depth + 1, in_loop, usage);
        }
        ExprKind::MapOp { seq, body, .. }
        | ExprKind::FilterOp { seq, body, .. }
        | ExprKind::FindOp { seq, body, .. } => {
            count_param_refs(seq, depth, in_loop, usage);
            count_param_refs(body, depth + 1, true, usage);
        }
        ExprKind::Comprehension {
            yield_expr,
            clauses,
            ..
        } => {
            for clause in clauses {
                match clause {
                    CompClause::Generator { seq, .. } => {
                        count_param_refs(seq, depth + 1, true, usage);
                    }
                    CompClause::Filter(cond) => {
                        count_param_refs(cond, depth + 1, true, usage);
                    }
                }
            }
            count_param_refs(yield_expr, depth + 1, true, usage);
        }
        _ => {
            expr.for_each_child(&mut |child| {
                count_param_refs(child, depth, in_loop, usage);
            });
        }
    }
}

/// Rewrite the body with argument expressions in place of parameter
/// slots, dropping the argument frame from the slot arithmetic. `None`
/// aborts the inline (a shape substitution cannot express).
fn substitute(expr: &Expr, depth: u16, args: &[Expr]) -> Option<Expr> {
    let rebuilt = match &expr.kind {
        ExprKind::Identifier {
            slot: Some(slot), ..
        } if slot.frames_up == depth => {
            let arg = args.get(slot.index as usize)?;
            return Some(bump_free_slots(arg, depth));
        }
        ExprKind::Identifier {
            slot: Some(slot),
            name,
        } if slot.frames_up > depth => {
            // nothing outside the argument frame is reachable from a
            // closure-free body; keep the reference but unwind the
            // removed frame
            ExprKind::Identifier {
                slot: Some(SlotRef {
                    frames_up: slot.frames_up - 1,
                    index: slot.index,
                }),
                name: name.clone(),
            }
        }
        ExprKind::Lambda { template, captures } => {
            let mut rewritten = Vec::with_capacity(captures.len());
            for capture in captures {
                if capture.frames_up == depth {
                    // the capture must come from the argument: only a
                    // slot-loading argument can supply it
                    let arg = args.get(capture.index as usize)?;
                    match &arg.kind {
                        ExprKind::Identifier {
                            slot: Some(arg_slot),
                            ..
                        } => rewritten.push(SlotRef {
                            frames_up: arg_slot.frames_up + depth,
                            index: arg_slot.index,
                        }),
                        _ => return None,
                    }
                } else if capture.frames_up > depth {
                    rewritten.push(SlotRef {
                        frames_up: capture.frames_up - 1,
                        index: capture.index,
                    });
                } else {
                    rewritten.push(*capture);
                }
            }
            ExprKind::Lambda {
                template: template.clone(),
                captures: rewritten,
            }
        }
        ExprKind::Let { name, value, body } => ExprKind::Let {
            name: name.clone(),
            value: Box::new(substitute(value, depth, args)?),
            body: Box::new(substitute(body, depth + 1, args)?),
        },
        ExprKind::Where { bindings, body } => ExprKind::Where {
            bindings: bindings
                .iter()
                .map(|b| {
                    substitute(&b.expr, depth + 1, args).map(|expr| {
                        cadence_cfl_ast::WhereBinding {
                            name: b.name.clone(),
                            expr: Arc::new(expr),
                        }
                    })
                })
                .collect::<Option<Vec<_>>>()?,
            body: Box::new(substitute(body, depth + 1, args)?),
        },
        ExprKind::MapOp { seq, binding, body } => ExprKind::MapOp {
            seq: Box::new(substitute(seq, depth, args)?),
            binding: binding.clone(),
            body: Box::new(substitute(body, depth + 1, args)?),
        },
        ExprKind::FilterOp { seq, binding, body } => ExprKind::FilterOp {
            seq: Box::new(substitute(seq, depth, args)?),
            binding: binding.clone(),
            body: Box::new(substitute(body, depth + 1, args)?),
        },
        ExprKind::FindOp { seq, binding, body } => ExprKind::FindOp {
            seq: Box::new(substitute(seq, depth, args)?),
            binding: binding.clone(),
            body: Box::new(substitute(body, depth + 1, args)?),
        },
        ExprKind::Comprehension {
            yield_expr,
            clauses,
            binding_names,
        } => ExprKind::Comprehension {
            yield_expr: Box::new(substitute(yield_expr, depth + 1, args)?),
            clauses: clauses
                .iter()
                .map(|clause| match clause {
                    CompClause::Generator { name, seq } => substitute(seq, depth + 1, args)
                        .map(|seq| CompClause::Generator {
                            name: name.clone(),
                            seq,
                        }),
                    CompClause::Filter(cond) => {
                        substitute(cond, depth + 1, args).map(CompClause::Filter)
                    }
                })
                .collect::<Option<Vec<_>>>()?,
            binding_names: binding_names.clone(),
        },
        ExprKind::Literal(_) | ExprKind::Identifier { .. } => expr.kind.clone(),
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op: *op,
            operand: Box::new(substitute(operand, depth, args)?),
        },
        ExprKind::Binary { op, left, right } => ExprKind::Binary {
            op: *op,
            left: Box::new(substitute(left, depth, args)?),
            right: Box::new(substitute(right, depth, args)?),
        },
        ExprKind::AndOr { op, left, right } => ExprKind::AndOr {
            op: *op,
            left: Box::new(substitute(left, depth, args)?),
            right: Box::new(substitute(right, depth, args)?),
        },
        ExprKind::If {
            cond,
            then,
            otherwise,
        } => ExprKind::If {
            cond: Box::new(substitute(cond, depth, args)?),
            then: Box::new(substitute(then, depth, args)?),
            otherwise: Box::new(substitute(otherwise, depth, args)?),
        },
        ExprKind::Dot { object, field } => ExprKind::Dot {
            object: Box::new(substitute(object, depth, args)?),
            field: field.clone(),
        },
        ExprKind::Index { object, index } => ExprKind::Index {
            object: Box::new(substitute(object, depth, args)?),
            index: Box::new(substitute(index, depth, args)?),
        },
        ExprKind::Slice { object, begin, end } => ExprKind::Slice {
            object: Box::new(substitute(object, depth, args)?),
            begin: match begin {
                Some(b) => Some(Box::new(substitute(b, depth, args)?)),
                None => None,
            },
            end: match end {
                Some(e) => Some(Box::new(substitute(e, depth, args)?)),
                None => None,
            },
        },
        ExprKind::ListLit(items) => ExprKind::ListLit(
            items
                .iter()
                .map(|i| substitute(i, depth, args))
                .collect::<Option<Vec<_>>>()?,
        ),
        ExprKind::MapLit(pairs) => ExprKind::MapLit(
            pairs
                .iter()
                .map(|(k, v)| {
                    Some((substitute(k, depth, args)?, substitute(v, depth, args)?))
                })
                .collect::<Option<Vec<_>>>()?,
        ),
        ExprKind::Interpolate(pieces) => ExprKind::Interpolate(
            pieces
                .iter()
                .map(|p| substitute(p, depth, args))
                .collect::<Option<Vec<_>>>()?,
        ),
        ExprKind::Call { target, args: call_args } => ExprKind::Call {
            target: match target {
                CallTarget::Builtin(b) => CallTarget::Builtin(b.clone()),
                CallTarget::Dynamic(t) => {
                    CallTarget::Dynamic(Box::new(substitute(t, depth, args)?))
                }
            },
            args: call_args
                .iter()
                .map(|a| substitute(a, depth, args))
                .collect::<Option<Vec<_>>>()?,
        },
        // rare inside a simple body; not worth the slot bookkeeping
        ExprKind::GenericInstantiation { .. }
        | ExprKind::Assert { .. }
        | ExprKind::IsType { .. }
        | ExprKind::Cast { .. }
        | ExprKind::CommandSeq { .. } => return None,
    };
    Some(Expr::new(rebuilt, expr.span, expr.ty.clone()))
}

/// Adjust an argument expression's free slot references for use `by`
/// frames deeper than the call site. References that resolve within the
/// argument's own nested frames stay put.
fn bump_free_slots(expr: &Expr, by: u16) -> Expr {
    if by == 0 {
        return expr.clone();
    }
    bump_walk(expr, by, 0)
}

fn bump_walk(expr: &Expr, by: u16, depth: u16) -> Expr {
    let bump_slot = |slot: &SlotRef| {
        if slot.frames_up >= depth {
            SlotRef {
                frames_up: slot.frames_up + by,
                index: slot.index,
            }
        } else {
            *slot
        }
    };
    let kind = match &expr.kind {
        ExprKind::Identifier {
            slot: Some(slot),
            name,
        } => ExprKind::Identifier {
            name: name.clone(),
            slot: Some(bump_slot(slot)),
        },
        ExprKind::Lambda { template, captures } => ExprKind::Lambda {
            template: template.clone(),
            captures: captures.iter().map(|c| bump_slot(c)).collect(),
        },
        ExprKind::Let { name, value, body } => ExprKind::Let {
            name: name.clone(),
            value: Box::new(bump_walk(value, by, depth)),
            body: Box::new(bump_walk(body, by, depth + 1)),
        },
        ExprKind::Where { bindings, body } => ExprKind::Where {
            bindings: bindings
                .iter()
                .map(|b| cadence_cfl_ast::WhereBinding {
                    name: b.name.clone(),
                    expr: Arc::new(bump_walk(&b.expr, by, depth + 1)),
                })
                .collect(),
            body: Box::new(bump_walk(body, by, depth + 1)),
        },
        ExprKind::MapOp { seq, binding, body } => ExprKind::MapOp {
            seq: Box::new(bump_walk(seq, by, depth)),
            binding: binding.clone(),
            body: Box::new(bump_walk(body, by, depth + 1)),
        },
        ExprKind::FilterOp { seq, binding, body } => ExprKind::FilterOp {
            seq: Box::new(bump_walk(seq, by, depth)),
            binding: binding.clone(),
            body: Box::new(bump_walk(body, by, depth + 1)),
        },
        ExprKind::FindOp { seq, binding, body } => ExprKind::FindOp {
            seq: Box::new(bump_walk(seq, by, depth)),
            binding: binding.clone(),
            body: Box::new(bump_walk(body, by, depth + 1)),
        },
        ExprKind::Comprehension {
            yield_expr,
            clauses,
            binding_names,
        } => ExprKind::Comprehension {
            yield_expr: Box::new(bump_walk(yield_expr, by, depth + 1)),
            clauses: clauses
                .iter()
                .map(|clause| match clause {
                    CompClause::Generator { name, seq } => CompClause::Generator {
                        name: name.clone(),
                        seq: bump_walk(seq, by, depth + 1),
                    },
                    CompClause::Filter(cond) => {
                        CompClause::Filter(bump_walk(cond, by, depth + 1))
                    }
                })
                .collect(),
            binding_names: binding_names.clone(),
        },
        ExprKind::Literal(_) | ExprKind::Identifier { slot: None, .. } => expr.kind.clone(),
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op: *op,
            operand: Box::new(bump_walk(operand, by, depth)),
        },
        ExprKind::Binary { op, left, right } => ExprKind::Binary {
            op: *op,
            left: Box::new(bump_walk(left, by, depth)),
            right: Box::new(bump_walk(right, by, depth)),
        },
        ExprKind::AndOr { op, left, right } => ExprKind::AndOr {
            op: *op,
            left: Box::new(bump_walk(left, by, depth)),
            right: Box::new(bump_walk(right, by, depth)),
        },
        ExprKind::If {
            cond,
            then,
            otherwise,
        } => ExprKind::If {
            cond: Box::new(bump_walk(cond, by, depth)),
            then: Box::new(bump_walk(then, by, depth)),
            otherwise: Box::new(bump_walk(otherwise, by, depth)),
        },
        ExprKind::Dot { object, field } => ExprKind::Dot {
            object: Box::new(bump_walk(object, by, depth)),
            field: field.clone(),
        },
        ExprKind::Index { object, index } => ExprKind::Index {
            object: Box::new(bump_walk(object, by, depth)),
            index: Box::new(bump_walk(index, by, depth)),
        },
        ExprKind::Slice { object, begin, end } => ExprKind::Slice {
            object: Box::new(bump_walk(object, by, depth)),
            begin: begin.as_ref().map(|b| Box::new(bump_walk(b, by, depth))),
            end: end.as_ref().map(|e| Box::new(bump_walk(e, by, depth))),
        },
        ExprKind::ListLit(items) => {
            ExprKind::ListLit(items.iter().map(|i| bump_walk(i, by, depth)).collect())
        }
        ExprKind::MapLit(pairs) => ExprKind::MapLit(
            pairs
                .iter()
                .map(|(k, v)| (bump_walk(k, by, depth), bump_walk(v, by, depth)))
                .collect(),
        ),
        ExprKind::Interpolate(pieces) => ExprKind::Interpolate(
            pieces.iter().map(|p| bump_walk(p, by, depth)).collect(),
        ),
        ExprKind::Call { target, args } => ExprKind::Call {
            target: match target {
                CallTarget::Builtin(b) => CallTarget::Builtin(b.clone()),
                CallTarget::Dynamic(t) => {
                    CallTarget::Dynamic(Box::new(bump_walk(t, by, depth)))
                }
            },
            args: args.iter().map(|a| bump_walk(a, by, depth)).collect(),
        },
        ExprKind::Assert { body, guards } => ExprKind::Assert {
            body: Box::new(bump_walk(body, by, depth)),
            guards: guards
                .iter()
                .map(|g| cadence_cfl_ast::AssertGuard {
                    cond: bump_walk(&g.cond, by, depth),
                    text: g.text.clone(),
                })
                .collect(),
        },
        ExprKind::IsType {
            expr: inner,
            test,
            negated,
        } => ExprKind::IsType {
            expr: Box::new(bump_walk(inner, by, depth)),
            test: test.clone(),
            negated: *negated,
        },
        ExprKind::Cast {
            expr: inner,
            target,
            narrowing,
        } => ExprKind::Cast {
            expr: Box::new(bump_walk(inner, by, depth)),
            target: target.clone(),
            narrowing: *narrowing,
        },
        ExprKind::GenericInstantiation { target, type_args } => {
            ExprKind::GenericInstantiation {
                target: Box::new(bump_walk(target, by, depth)),
                type_args: type_args.clone(),
            }
        }
        ExprKind::CommandSeq { first, second } => ExprKind::CommandSeq {
            first: Box::new(bump_walk(first, by, depth)),
            second: Box::new(bump_walk(second, by, depth)),
        },
    };
    Expr::new(kind, expr.span, expr.ty.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_cfl_ast::Span;

    fn span() -> Span {
        Span::zero(0)
    }

    #[test]
    fn trivial_detection() {
        let lit = Expr::literal(Value::Int(3), span());
        assert!(is_trivial(&lit));
        let dynamic = Expr::new(
            ExprKind::Identifier {
                name: "x".into(),
                slot: None,
            },
            span(),
            cadence_cfl_ast::Type::any(),
        );
        assert!(!is_trivial(&dynamic));
    }

    #[test]
    fn bump_adjusts_free_identifiers() {
        let arg = Expr::new(
            ExprKind::Identifier {
                name: "hp".into(),
                slot: Some(SlotRef {
                    frames_up: 0,
                    index: 3,
                }),
            },
            span(),
            cadence_cfl_ast::Type::int(),
        );
        let bumped = bump_free_slots(&arg, 2);
        match bumped.kind {
            ExprKind::Identifier { slot: Some(slot), .. } => {
                assert_eq!(slot.frames_up, 2);
                assert_eq!(slot.index, 3);
            }
            other => panic!("{other:?}"),
        }
    }
}
