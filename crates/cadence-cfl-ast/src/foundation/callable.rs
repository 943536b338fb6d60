//! The host callable protocol.
//!
//! A [`Callable`] is anything a formula reads or writes: an engine
//! object, a UI widget, an argument frame, a where-binding closure. The
//! formula borrows the scope for the duration of one evaluation and never
//! owns it; host objects that appear *as values* are `Arc`-shared by the
//! host itself.
//!
//! Values are addressed by string key or, when the scope opted in at
//! parse time via a [`ScopeLayout`], by a stable small-integer slot.
//! Writing is opt-in: the default `set` fails loudly.
//!
//! Accessors receive the [`EvalContext`]: reading a name may evaluate a
//! lazily-memoized where binding or a host-computed property, and that
//! evaluation must keep recursion accounting and dice determinism. (The
//! original kept this state in process globals; the context parameter is
//! its explicit replacement.)
//!
//! Command values (from `;` sequencing and action builtins) run through
//! [`run_command`](dyn Callable::run_command) — the sole sanctioned way a
//! formula produces side effects.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::context::EvalContext;
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::foundation::types::Type;
use crate::foundation::value::Value;

/// Host scope interface. `Send + Sync` so compiled formulas (whose
/// constants may hold function values) stay shareable across threads.
pub trait Callable: fmt::Debug + Send + Sync {
    /// Read a value by name. Unknown names read as null; only scopes
    /// that *cannot* be read (the constant probe) return an error.
    fn get(&self, name: &str, ctx: &mut EvalContext) -> EvalResult<Value>;

    /// Read by parse-time slot. Only meaningful when [`Callable::has_slots`]
    /// is true and the slot came from the layout this scope was built for.
    fn get_slot(&self, _slot: u16, _ctx: &mut EvalContext) -> EvalResult<Value> {
        Err(EvalError::new(EvalErrorKind::NoSlots))
    }

    fn has_slots(&self) -> bool {
        false
    }

    /// Write a value by name. Scopes opt in to mutability; the default
    /// fails loudly.
    fn set(&self, name: &str, _value: Value, _ctx: &mut EvalContext) -> EvalResult<()> {
        Err(EvalError::new(EvalErrorKind::ReadOnlyScope {
            name: name.to_string(),
        }))
    }

    fn set_slot(&self, _slot: u16, _value: Value, _ctx: &mut EvalContext) -> EvalResult<()> {
        Err(EvalError::new(EvalErrorKind::NoSlots))
    }

    /// Enumerate readable names, for tooling and diagnostics.
    fn inputs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Engine class identity for `is class T` / `obj T` checks.
    fn query_class(&self) -> Option<&str> {
        None
    }

    /// The enclosing scope, for chained wrappers built during
    /// evaluation (argument frames, where-closures, iteration scopes).
    fn parent_scope(&self) -> Option<&dyn Callable> {
        None
    }
}

impl dyn Callable + '_ {
    /// Execute a command value against this scope. Null is the empty
    /// command; lists of commands run in order, recursively.
    pub fn run_command(&self, cmd: &Value, ctx: &mut EvalContext) -> EvalResult<Value> {
        match cmd {
            Value::Null => Ok(Value::Null),
            Value::List(items) => {
                for item in items.iter() {
                    self.run_command(item, ctx)?;
                }
                Ok(Value::Null)
            }
            Value::Command(seq) => {
                for step in seq.steps() {
                    match step {
                        CommandStep::Action(action) => action.run(self, ctx)?,
                        CommandStep::Nested(value) => {
                            self.run_command(value, ctx)?;
                        }
                    }
                }
                Ok(Value::Null)
            }
            other => Err(EvalError::new(EvalErrorKind::Other {
                message: format!("cannot run a {} as a command", other.type_name()),
            })),
        }
    }
}

/// Walk `frames_up` parent links, then read `index` from that frame.
pub fn get_slot_up(
    scope: &dyn Callable,
    frames_up: u16,
    index: u16,
    ctx: &mut EvalContext,
) -> EvalResult<Value> {
    let mut current = scope;
    for _ in 0..frames_up {
        current = current.parent_scope().ok_or_else(|| {
            EvalError::new(EvalErrorKind::Other {
                message: "slot reference outside its scope layout".to_string(),
            })
        })?;
    }
    current.get_slot(index, ctx)
}

/// One deferred side effect inside a command value.
pub trait CommandAction: fmt::Debug + Send + Sync {
    fn run(&self, scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<()>;

    /// Short description for diagnostics (`set(hitpoints)` etc).
    fn describe(&self) -> String;
}

/// A step of a command sequence.
#[derive(Debug, Clone)]
pub enum CommandStep {
    Action(Arc<dyn CommandAction>),
    /// A nested command value (possibly a list of commands) produced by
    /// a sub-expression.
    Nested(Value),
}

/// An ordered sequence of deferred side effects. `;` builds these;
/// the host runs them via [`run_command`](dyn Callable::run_command).
#[derive(Debug, Clone, Default)]
pub struct CommandSeq {
    steps: Vec<CommandStep>,
}

impl CommandSeq {
    pub fn from_action(action: Arc<dyn CommandAction>) -> Self {
        Self {
            steps: vec![CommandStep::Action(action)],
        }
    }

    /// Sequence two command-producing results, skipping nulls.
    pub fn sequence(first: Value, second: Value) -> Value {
        let mut steps = Vec::new();
        for value in [first, second] {
            match value {
                Value::Null => {}
                Value::Command(seq) => steps.extend(seq.steps.iter().cloned()),
                other => steps.push(CommandStep::Nested(other)),
            }
        }
        if steps.is_empty() {
            Value::Null
        } else {
            Value::Command(Arc::new(CommandSeq { steps }))
        }
    }

    pub fn steps(&self) -> &[CommandStep] {
        &self.steps
    }
}

/// Static description of a host scope's variables, produced by the host
/// and consulted at parse time so identifiers resolve to slots.
#[derive(Debug, Clone, Default)]
pub struct ScopeLayout {
    entries: Vec<ScopeEntry>,
    by_name: HashMap<String, u16>,
}

#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub name: String,
    pub ty: Type,
}

impl ScopeLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning its slot.
    pub fn add(&mut self, name: impl Into<String>, ty: Type) -> u16 {
        let name = name.into();
        let slot = self.entries.len() as u16;
        self.by_name.insert(name.clone(), slot);
        self.entries.push(ScopeEntry { name, ty });
        slot
    }

    pub fn slot_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn entry(&self, slot: u16) -> Option<&ScopeEntry> {
        self.entries.get(slot as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

/// A writable scope backed by a name/value table. The simplest host
/// scope; also what tests evaluate against.
#[derive(Debug, Default)]
pub struct MapCallable {
    layout: ScopeLayout,
    values: RwLock<Vec<Value>>,
}

impl MapCallable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from name/value pairs; the layout types every entry `any`.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut scope = Self::new();
        for (name, value) in pairs {
            scope.define(name, value);
        }
        scope
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.layout.add(name, Type::any());
        self.values.write().expect("scope lock poisoned").push(value);
    }

    pub fn layout(&self) -> &ScopeLayout {
        &self.layout
    }
}

impl Callable for MapCallable {
    fn get(&self, name: &str, ctx: &mut EvalContext) -> EvalResult<Value> {
        match self.layout.slot_of(name) {
            Some(slot) => self.get_slot(slot, ctx),
            None => Ok(Value::Null),
        }
    }

    fn get_slot(&self, slot: u16, _ctx: &mut EvalContext) -> EvalResult<Value> {
        let values = self.values.read().expect("scope lock poisoned");
        values
            .get(slot as usize)
            .cloned()
            .ok_or_else(|| EvalError::new(EvalErrorKind::NoSlots))
    }

    fn has_slots(&self) -> bool {
        true
    }

    fn set(&self, name: &str, value: Value, ctx: &mut EvalContext) -> EvalResult<()> {
        match self.layout.slot_of(name) {
            Some(slot) => self.set_slot(slot, value, ctx),
            None => Err(EvalError::new(EvalErrorKind::UnknownIdentifier {
                name: name.to_string(),
            })),
        }
    }

    fn set_slot(&self, slot: u16, value: Value, _ctx: &mut EvalContext) -> EvalResult<()> {
        let mut values = self.values.write().expect("scope lock poisoned");
        match values.get_mut(slot as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(EvalError::new(EvalErrorKind::NoSlots)),
        }
    }

    fn inputs(&self) -> Vec<String> {
        self.layout.names().map(str::to_string).collect()
    }
}

/// The probe scope used for compile-time constant reduction: every read
/// reports [`EvalErrorKind::NotConst`], so an expression reduces to a
/// constant exactly when evaluation never touches it.
#[derive(Debug)]
pub struct ProbeCallable;

impl Callable for ProbeCallable {
    fn get(&self, _name: &str, _ctx: &mut EvalContext) -> EvalResult<Value> {
        Err(EvalError::new(EvalErrorKind::NotConst))
    }

    fn get_slot(&self, _slot: u16, _ctx: &mut EvalContext) -> EvalResult<Value> {
        Err(EvalError::new(EvalErrorKind::NotConst))
    }

    fn has_slots(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_scope_get_set() {
        let mut ctx = EvalContext::new();
        let mut scope = MapCallable::new();
        scope.define("hp", Value::Int(10));
        assert_eq!(scope.get("hp", &mut ctx).unwrap(), Value::Int(10));
        scope.set("hp", Value::Int(3), &mut ctx).unwrap();
        assert_eq!(scope.get_slot(0, &mut ctx).unwrap(), Value::Int(3));
        // unknown names read as null
        assert_eq!(scope.get("missing", &mut ctx).unwrap(), Value::Null);
    }

    #[test]
    fn default_set_fails_loudly() {
        #[derive(Debug)]
        struct ReadOnly;
        impl Callable for ReadOnly {
            fn get(&self, _name: &str, _ctx: &mut EvalContext) -> EvalResult<Value> {
                Ok(Value::Null)
            }
        }
        let mut ctx = EvalContext::new();
        let err = ReadOnly.set("x", Value::Int(1), &mut ctx).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::ReadOnlyScope { .. }));
    }

    #[test]
    fn sequence_skips_nulls_and_flattens() {
        let seq = CommandSeq::sequence(Value::Null, Value::Null);
        assert_eq!(seq, Value::Null);
    }

    #[test]
    fn probe_scope_reports_not_const() {
        let mut ctx = EvalContext::probe();
        assert!(ProbeCallable
            .get("anything", &mut ctx)
            .unwrap_err()
            .is_not_const());
    }
}
