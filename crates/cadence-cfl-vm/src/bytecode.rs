//! Bytecode instruction set.
//!
//! One flat instruction array with inline operands, plus interned pools
//! for constants, names, types, and diagnostics text. Scoped constructs
//! (the vectorized loops, comprehensions, where groups) carry embedded
//! sub-programs executed once per element against a synthetic scope,
//! rather than open-coded jump loops; plain control flow (`and`/`or`,
//! `if`, assertion guards) uses signed instruction-relative jumps within
//! the same program.
//!
//! A subtree the VM cannot express embeds as a [`Instr::TreeWalk`] step
//! holding the expression itself; every instruction's operand count is
//! fixed by its variant, and jump targets are instruction-aligned.

use std::fmt::Write as _;
use std::sync::Arc;

use cadence_cfl_ast::{
    BinaryOp, BuiltinFn, Expr, FunctionValue, Span, Type, UnaryOp, Value,
};

/// One VM instruction. Stack effect noted per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// Push a pooled constant.
    PushConst(u16),
    /// Push null.
    PushNull,
    /// Push a small integer without touching the pool.
    PushInt(i32),

    /// Push the value of a parse-time slot: walk `up` parent scopes,
    /// read slot `index` there.
    LoadSlot { up: u16, index: u16 },
    /// Push a dynamic name lookup against the current scope.
    LoadName(u16),

    /// Pop one, push the result.
    Unary(UnaryOp),
    /// Pop right then left, push the result.
    Binary(BinaryOp),

    /// Pop index then container, push the element.
    Index,
    /// Pop container, push element 0/1/2.
    Index0,
    Index1,
    Index2,
    /// Pop end (if present) then begin (if present) then container.
    Slice { has_begin: bool, has_end: bool },
    /// Pop object, push its member.
    Member(u16),

    /// Pop n values, push a fresh list.
    MakeList(u16),
    /// Pop n key/value pairs, push a fresh map.
    MakeMap(u16),
    /// Pop n pieces, push their string concatenation.
    Interpolate(u16),

    /// Signed instruction-relative jumps. `JumpIf`/`JumpUnless` pop the
    /// condition; the `Peek` forms leave it in place (short-circuit
    /// `and`/`or` yield the deciding operand itself).
    Jump(i32),
    JumpIf(i32),
    JumpUnless(i32),
    JumpIfPeek(i32),
    JumpUnlessPeek(i32),

    Pop,
    Dup,

    /// Pop argc arguments, call the pooled builtin, push the result.
    CallBuiltin { func: u16, argc: u8 },
    /// Pop argc arguments then the callee function value.
    CallFunction { argc: u8 },
    /// Pop the capture values, push a closure over the pooled template.
    MakeClosure { func: u16, captures: u8 },

    /// Pop a value, push the runtime type-test result.
    IsType { ty: u16, negated: bool },
    /// Pop a value, push it back if it inhabits the type, else fail.
    Cast { ty: u16, narrowing: bool },
    /// Unconditional assertion failure with the pooled condition text.
    Fail(u16),

    /// Pop the input container, run the sub-program once per element,
    /// push the collected result.
    MapLoop(u16),
    FilterLoop(u16),
    FindLoop(u16),
    /// Run a comprehension sub-group (generators bring their own
    /// inputs), push the resulting list.
    CompLoop(u16),

    /// Run the where group's body against the current scope wrapped in
    /// a lazily-memoizing binding adapter, push the result.
    WithWhere(u16),

    /// Evaluate the pooled expression against the current scope, push
    /// the result. The escape hatch for non-lowerable subtrees.
    TreeWalk(u16),
}

/// Loop body with the element's binding name (`value` by default).
#[derive(Debug, Clone)]
pub struct LoopSub {
    pub binding: String,
    pub body: Program,
}

/// A compiled comprehension: generator inputs and filters in clause
/// order, then the yield.
#[derive(Debug, Clone)]
pub struct CompSub {
    pub names: Vec<String>,
    pub clauses: Vec<CompClauseProgram>,
    pub yields: Program,
}

#[derive(Debug, Clone)]
pub enum CompClauseProgram {
    Generator(Program),
    Filter(Program),
}

/// Precompiled `(name, sub-program)` pairs for one where group, plus
/// the body that sees them.
#[derive(Debug, Clone)]
pub struct WhereSub {
    pub names: Vec<String>,
    pub bindings: Vec<Program>,
    pub body: Program,
}

/// A compiled program: instructions plus interned pools. Sub-programs
/// are self-contained; nothing refers back into the parent's pools.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instrs: Vec<Instr>,
    /// Source span per instruction, for runtime diagnostics.
    pub spans: Vec<Span>,
    pub consts: Vec<Value>,
    pub names: Vec<String>,
    pub types: Vec<Type>,
    /// Assertion texts and similar diagnostics strings.
    pub messages: Vec<String>,
    pub builtins: Vec<Arc<dyn BuiltinFn>>,
    pub functions: Vec<Arc<FunctionValue>>,
    pub loops: Vec<LoopSub>,
    pub comps: Vec<CompSub>,
    pub wheres: Vec<WhereSub>,
    pub exprs: Vec<Arc<Expr>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, instr: Instr, span: Span) {
        self.instrs.push(instr);
        self.spans.push(span);
    }

    /// Current instruction offset, for jump patching.
    pub fn offset(&self) -> usize {
        self.instrs.len()
    }

    /// Patch the jump at `at` to land on `target`.
    ///
    /// # Panics
    ///
    /// Panics if the instruction at `at` is not a jump.
    pub fn patch_jump(&mut self, at: usize, target: usize) {
        let delta = target as i32 - at as i32;
        match &mut self.instrs[at] {
            Instr::Jump(d)
            | Instr::JumpIf(d)
            | Instr::JumpUnless(d)
            | Instr::JumpIfPeek(d)
            | Instr::JumpUnlessPeek(d) => *d = delta,
            other => panic!("patch_jump on non-jump {other:?}"),
        }
    }

    /// Intern a constant, reusing structurally equal pool entries.
    pub fn add_const(&mut self, value: Value) -> u16 {
        if let Some(at) = self.consts.iter().position(|v| v == &value) {
            return at as u16;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u16
    }

    pub fn add_name(&mut self, name: &str) -> u16 {
        if let Some(at) = self.names.iter().position(|n| n == name) {
            return at as u16;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as u16
    }

    pub fn add_type(&mut self, ty: Type) -> u16 {
        if let Some(at) = self.types.iter().position(|t| t == &ty) {
            return at as u16;
        }
        self.types.push(ty);
        (self.types.len() - 1) as u16
    }

    pub fn add_message(&mut self, text: String) -> u16 {
        self.messages.push(text);
        (self.messages.len() - 1) as u16
    }

    pub fn add_builtin(&mut self, f: Arc<dyn BuiltinFn>) -> u16 {
        if let Some(at) = self.builtins.iter().position(|b| b.name() == f.name()) {
            return at as u16;
        }
        self.builtins.push(f);
        (self.builtins.len() - 1) as u16
    }

    pub fn add_function(&mut self, f: Arc<FunctionValue>) -> u16 {
        if let Some(at) = self.functions.iter().position(|g| Arc::ptr_eq(g, &f)) {
            return at as u16;
        }
        self.functions.push(f);
        (self.functions.len() - 1) as u16
    }

    pub fn add_loop(&mut self, sub: LoopSub) -> u16 {
        self.loops.push(sub);
        (self.loops.len() - 1) as u16
    }

    pub fn add_comp(&mut self, sub: CompSub) -> u16 {
        self.comps.push(sub);
        (self.comps.len() - 1) as u16
    }

    pub fn add_where(&mut self, sub: WhereSub) -> u16 {
        self.wheres.push(sub);
        (self.wheres.len() - 1) as u16
    }

    pub fn add_expr(&mut self, expr: Arc<Expr>) -> u16 {
        self.exprs.push(expr);
        (self.exprs.len() - 1) as u16
    }

    /// Text rendering for the facade's `disassemble()` and failure
    /// dumps.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        for (i, instr) in self.instrs.iter().enumerate() {
            let _ = write!(out, "{pad}{i:04} ");
            match instr {
                Instr::PushConst(c) => {
                    let _ = writeln!(
                        out,
                        "PushConst {c} ; {}",
                        self.consts[*c as usize].to_source()
                    );
                }
                Instr::LoadName(n) => {
                    let _ = writeln!(out, "LoadName {n} ; {}", self.names[*n as usize]);
                }
                Instr::Member(n) => {
                    let _ = writeln!(out, "Member {n} ; .{}", self.names[*n as usize]);
                }
                Instr::CallBuiltin { func, argc } => {
                    let _ = writeln!(
                        out,
                        "CallBuiltin {func}/{argc} ; {}()",
                        self.builtins[*func as usize].name()
                    );
                }
                Instr::Fail(m) => {
                    let _ = writeln!(out, "Fail {m} ; {}", self.messages[*m as usize]);
                }
                Instr::IsType { ty, negated } => {
                    let word = if *negated { "is not" } else { "is" };
                    let _ = writeln!(out, "IsType ; {word} {}", self.types[*ty as usize]);
                }
                Instr::Cast { ty, narrowing } => {
                    let op = if *narrowing { "<-" } else { "::" };
                    let _ = writeln!(out, "Cast ; {op} {}", self.types[*ty as usize]);
                }
                other => {
                    let _ = writeln!(out, "{other:?}");
                }
            }
        }
        for (i, sub) in self.loops.iter().enumerate() {
            let _ = writeln!(out, "{pad}loop {i} (binding '{}'):", sub.binding);
            sub.body.render(out, indent + 1);
        }
        for (i, sub) in self.comps.iter().enumerate() {
            let _ = writeln!(
                out,
                "{pad}comprehension {i} ({}):",
                sub.names.join(", ")
            );
            for clause in &sub.clauses {
                match clause {
                    CompClauseProgram::Generator(p) => {
                        let _ = writeln!(out, "{pad}  generator:");
                        p.render(out, indent + 2);
                    }
                    CompClauseProgram::Filter(p) => {
                        let _ = writeln!(out, "{pad}  filter:");
                        p.render(out, indent + 2);
                    }
                }
            }
            let _ = writeln!(out, "{pad}  yield:");
            sub.yields.render(out, indent + 2);
        }
        for (i, sub) in self.wheres.iter().enumerate() {
            let _ = writeln!(out, "{pad}where {i} ({}):", sub.names.join(", "));
            for (name, binding) in sub.names.iter().zip(&sub.bindings) {
                let _ = writeln!(out, "{pad}  {name} =");
                binding.render(out, indent + 2);
            }
            let _ = writeln!(out, "{pad}  in:");
            sub.body.render(out, indent + 2);
        }
        for (i, expr) in self.exprs.iter().enumerate() {
            let _ = writeln!(out, "{pad}tree-walk {i}: spans {:?}", expr.span);
        }
    }
}
