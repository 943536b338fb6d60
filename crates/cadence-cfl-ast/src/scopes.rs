//! Runtime scope wrappers built during evaluation.
//!
//! Every parse-time symbol frame (function arguments, `let`, `where`,
//! loop iteration, comprehension generators) corresponds to exactly one
//! wrapper here at runtime, so a `(frames_up, index)` slot reference
//! resolved at parse time lands on the right frame by walking
//! `parent_scope` links. Name lookups that miss a frame fall through to
//! the parent.

use std::sync::{Arc, Mutex};

use crate::context::EvalContext;
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::expr::WhereBinding;
use crate::foundation::callable::Callable;
use crate::foundation::value::Value;
use crate::function::FunctionValue;

/// Argument frame for one user-function activation.
///
/// Slot layout, agreed with the parser: parameters first, then the
/// function itself (addressable by its name, or as `recurse` for
/// anonymous lambdas), then the captured enclosing bindings.
#[derive(Debug)]
pub struct ArgScope<'f, 'p> {
    func: &'f Arc<FunctionValue>,
    args: Vec<Value>,
    parent: &'p dyn Callable,
}

impl<'f, 'p> ArgScope<'f, 'p> {
    pub fn new(func: &'f Arc<FunctionValue>, args: Vec<Value>, parent: &'p dyn Callable) -> Self {
        Self { func, args, parent }
    }
}

impl Callable for ArgScope<'_, '_> {
    fn get(&self, name: &str, ctx: &mut EvalContext) -> EvalResult<Value> {
        if let Some(pos) = self.func.params().iter().position(|p| p.name == name) {
            return Ok(self.args[pos].clone());
        }
        if self.func.name() == Some(name) || name == "recurse" {
            return Ok(Value::Function(self.func.clone()));
        }
        if let Some(pos) = self
            .func
            .capture_names()
            .iter()
            .position(|n| n == name)
        {
            return Ok(self.func.captured()[pos].clone());
        }
        self.parent.get(name, ctx)
    }

    fn get_slot(&self, slot: u16, _ctx: &mut EvalContext) -> EvalResult<Value> {
        let slot = slot as usize;
        let params = self.func.params().len();
        if slot < params {
            return Ok(self.args[slot].clone());
        }
        if slot == params {
            return Ok(Value::Function(self.func.clone()));
        }
        let capture = slot - params - 1;
        match self.func.captured().get(capture) {
            Some(v) => Ok(v.clone()),
            None => Err(EvalError::new(EvalErrorKind::NoSlots)),
        }
    }

    fn has_slots(&self) -> bool {
        true
    }

    fn parent_scope(&self) -> Option<&dyn Callable> {
        Some(self.parent)
    }

    fn inputs(&self) -> Vec<String> {
        self.func
            .params()
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }
}

/// A plain slot frame over named values: `let` bodies and comprehension
/// generator bindings. The loop driver rebuilds it per iteration.
#[derive(Debug)]
pub struct FrameScope<'a> {
    names: &'a [String],
    values: Vec<Value>,
    parent: &'a dyn Callable,
}

impl<'a> FrameScope<'a> {
    pub fn new(names: &'a [String], values: Vec<Value>, parent: &'a dyn Callable) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self {
            names,
            values,
            parent,
        }
    }
}

impl Callable for FrameScope<'_> {
    fn get(&self, name: &str, ctx: &mut EvalContext) -> EvalResult<Value> {
        match self.names.iter().position(|n| n == name) {
            Some(pos) => Ok(self.values[pos].clone()),
            None => self.parent.get(name, ctx),
        }
    }

    fn get_slot(&self, slot: u16, _ctx: &mut EvalContext) -> EvalResult<Value> {
        self.values
            .get(slot as usize)
            .cloned()
            .ok_or_else(|| EvalError::new(EvalErrorKind::NoSlots))
    }

    fn has_slots(&self) -> bool {
        true
    }

    fn parent_scope(&self) -> Option<&dyn Callable> {
        Some(self.parent)
    }

    fn inputs(&self) -> Vec<String> {
        self.names.to_vec()
    }
}

/// Synthetic per-iteration scope for the vectorized `map`/`filter`/`find`
/// primitives: the element under its binding name (`value` by default),
/// `index`, and (for maps) `key`.
#[derive(Debug)]
pub struct IterationScope<'a> {
    pub value: Value,
    pub index: i64,
    pub key: Value,
    binding: &'a str,
    parent: &'a dyn Callable,
}

impl<'a> IterationScope<'a> {
    pub fn new(
        value: Value,
        index: i64,
        key: Value,
        binding: &'a str,
        parent: &'a dyn Callable,
    ) -> Self {
        Self {
            value,
            index,
            key,
            binding,
            parent,
        }
    }

    /// Default frame names, in slot order. The parser lays its loop
    /// frame out identically, substituting a custom binding for `value`.
    pub const NAMES: [&'static str; 3] = ["value", "index", "key"];
}

impl Callable for IterationScope<'_> {
    fn get(&self, name: &str, ctx: &mut EvalContext) -> EvalResult<Value> {
        if name == self.binding {
            return Ok(self.value.clone());
        }
        match name {
            "index" => Ok(Value::Int(self.index)),
            "key" => Ok(self.key.clone()),
            _ => self.parent.get(name, ctx),
        }
    }

    fn get_slot(&self, slot: u16, _ctx: &mut EvalContext) -> EvalResult<Value> {
        match slot {
            0 => Ok(self.value.clone()),
            1 => Ok(Value::Int(self.index)),
            2 => Ok(self.key.clone()),
            _ => Err(EvalError::new(EvalErrorKind::NoSlots)),
        }
    }

    fn has_slots(&self) -> bool {
        true
    }

    fn parent_scope(&self) -> Option<&dyn Callable> {
        Some(self.parent)
    }

    fn inputs(&self) -> Vec<String> {
        vec![
            self.binding.to_string(),
            "index".to_string(),
            "key".to_string(),
        ]
    }
}

/// Memoization cell for one where binding.
#[derive(Debug, Clone)]
enum Memo {
    Empty,
    /// Evaluation in flight; hit again means the bindings are cyclic.
    InProgress,
    Done(Value),
}

/// Lazily-memoizing scope for `where` bindings.
///
/// Bindings evaluate against this scope itself, so they may reference
/// each other (and bindings merged in by a chained `where`). Each binding
/// evaluates at most once per activation; the memo is private to the
/// activation, so concurrent evaluations of one formula never share it.
#[derive(Debug)]
pub struct WhereScope<'a> {
    bindings: &'a [WhereBinding],
    memo: Mutex<Vec<Memo>>,
    parent: &'a dyn Callable,
}

impl<'a> WhereScope<'a> {
    pub fn new(bindings: &'a [WhereBinding], parent: &'a dyn Callable) -> Self {
        Self {
            bindings,
            memo: Mutex::new(vec![Memo::Empty; bindings.len()]),
            parent,
        }
    }

    fn force(&self, slot: usize, ctx: &mut EvalContext) -> EvalResult<Value> {
        {
            let mut memo = self.memo.lock().expect("where memo poisoned");
            match &memo[slot] {
                Memo::Done(v) => return Ok(v.clone()),
                Memo::InProgress => {
                    return Err(EvalError::new(EvalErrorKind::Other {
                        message: format!(
                            "cyclic where binding '{}'",
                            self.bindings[slot].name
                        ),
                    }));
                }
                Memo::Empty => memo[slot] = Memo::InProgress,
            }
        }
        let result = self.bindings[slot].expr.evaluate(self, ctx);
        let mut memo = self.memo.lock().expect("where memo poisoned");
        match &result {
            Ok(v) => memo[slot] = Memo::Done(v.clone()),
            Err(_) => memo[slot] = Memo::Empty,
        }
        result
    }
}

impl Callable for WhereScope<'_> {
    fn get(&self, name: &str, ctx: &mut EvalContext) -> EvalResult<Value> {
        match self.bindings.iter().position(|b| b.name == name) {
            Some(pos) => self.force(pos, ctx),
            None => self.parent.get(name, ctx),
        }
    }

    fn get_slot(&self, slot: u16, ctx: &mut EvalContext) -> EvalResult<Value> {
        if (slot as usize) < self.bindings.len() {
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
        self.bindings.iter().map(|b| b.name.clone()).collect()
    }
}
