//! Evaluation context.
//!
//! The original engine kept the recursion counter, the "last executed
//! formula" crash pointer, and the constant-probe sentinel as process
//! globals. Here they are one explicit [`EvalContext`] threaded through
//! tree-walk and VM evaluation, which also makes constant probing
//! reentrant: probe mode is just a context flag, and "would have read the
//! scope" is an ordinary error value.

use std::sync::{Arc, RwLock};

use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::foundation::rng::RngStream;
use crate::foundation::types::{NullResolver, Type, TypeRegistry};
use crate::foundation::value::Value;

/// Default recursion ceiling for user-function calls.
pub const DEFAULT_MAX_DEPTH: usize = 10_000;

/// How division by exact zero behaves.
///
/// The engine default substitutes [`crate::foundation::decimal::Decimal::epsilon`]
/// for the divisor, returning a large finite value instead of failing.
/// Deliberately non-rigorous: authored content depends on a mid-simulation
/// `1/0` not bringing the run down. Hosts that prefer rigor opt into
/// `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DivByZero {
    #[default]
    Epsilon,
    Fail,
}

/// Per-evaluation tunables.
#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    pub max_depth: usize,
    pub div_by_zero: DivByZero,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            div_by_zero: DivByZero::default(),
        }
    }
}

/// Evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalMode {
    /// Normal execution against a live scope.
    #[default]
    Eager,
    /// Compile-time constant probing: reading the scope or rolling dice
    /// fails with [`EvalErrorKind::NotConst`].
    Probe,
}

/// Mutable state for one evaluation: recursion accounting, diagnostics,
/// dice randomness, and policy.
#[derive(Debug)]
pub struct EvalContext {
    pub options: EvalOptions,
    mode: EvalMode,
    depth: usize,
    rng: RngStream,
    /// Source excerpts of the formulas currently executing, outermost
    /// first. Rendered into runtime errors.
    call_stack: Vec<String>,
    /// Named-type and class-derivation registry for runtime `is`/cast
    /// checks. Absent registries fall back to dotted-name derivation.
    types: Option<Arc<RwLock<TypeRegistry>>>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::with_options(EvalOptions::default())
    }

    pub fn with_options(options: EvalOptions) -> Self {
        Self {
            options,
            mode: EvalMode::Eager,
            depth: 0,
            rng: RngStream::default(),
            call_stack: Vec::new(),
            types: None,
        }
    }

    /// A probing context for compile-time constant reduction.
    pub fn probe() -> Self {
        let mut ctx = Self::new();
        ctx.mode = EvalMode::Probe;
        ctx
    }

    /// Seed the dice stream; hosts derive the seed from the world seed so
    /// replays reproduce.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = RngStream::new(seed);
    }

    /// Attach the type registry runtime `is`/cast checks consult.
    pub fn set_type_registry(&mut self, types: Arc<RwLock<TypeRegistry>>) {
        self.types = Some(types);
    }

    /// Runtime type test against the attached registry (or bare
    /// dotted-name derivation without one).
    pub fn value_matches_type(&self, value: &Value, ty: &Type) -> bool {
        match &self.types {
            Some(types) => {
                let reg = types.read().expect("type registry poisoned");
                ty.matches_value(value, &*reg)
            }
            None => ty.matches_value(value, &NullResolver),
        }
    }

    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    pub fn is_probe(&self) -> bool {
        self.mode == EvalMode::Probe
    }

    /// Roll `rolls` dice with `sides` faces and sum them. In probe mode
    /// this is a `NotConst` failure: dice are never constants.
    pub fn roll_dice(&mut self, rolls: i64, sides: i64) -> EvalResult<i64> {
        if self.is_probe() {
            return Err(EvalError::new(EvalErrorKind::NotConst));
        }
        let mut total = 0i64;
        if sides > 0 {
            for _ in 0..rolls.max(0) {
                total += self.rng.roll(sides as u64) as i64;
            }
        }
        Ok(total)
    }

    /// Enter a user-function call. Fails fast at the ceiling instead of
    /// exhausting the native stack.
    pub fn enter_call(&mut self, description: &str) -> EvalResult<()> {
        if self.depth >= self.options.max_depth {
            return Err(EvalError::new(EvalErrorKind::RecursionLimit {
                limit: self.options.max_depth,
            }));
        }
        self.depth += 1;
        self.call_stack.push(description.to_string());
        Ok(())
    }

    /// Leave a user-function call entered with [`EvalContext::enter_call`].
    pub fn exit_call(&mut self) {
        debug_assert!(self.depth > 0, "exit_call without enter_call");
        self.depth = self.depth.saturating_sub(1);
        self.call_stack.pop();
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The active formula call stack, outermost first.
    pub fn call_stack(&self) -> &[String] {
        &self.call_stack
    }

    /// Render the call stack for an error trace, innermost first.
    pub fn render_call_stack(&self) -> Vec<String> {
        self.call_stack
            .iter()
            .rev()
            .map(|frame| format!("in call to {frame}"))
            .collect()
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_ceiling_fails_fast() {
        let mut ctx = EvalContext::with_options(EvalOptions {
            max_depth: 2,
            div_by_zero: DivByZero::Epsilon,
        });
        ctx.enter_call("a()").unwrap();
        ctx.enter_call("b()").unwrap();
        let err = ctx.enter_call("c()").unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::RecursionLimit { limit: 2 });
    }

    #[test]
    fn probe_mode_rejects_dice() {
        let mut ctx = EvalContext::probe();
        assert!(ctx.roll_dice(2, 6).unwrap_err().is_not_const());
    }

    #[test]
    fn dice_totals_in_range() {
        let mut ctx = EvalContext::new();
        for _ in 0..100 {
            let total = ctx.roll_dice(3, 6).unwrap();
            assert!((3..=18).contains(&total));
        }
    }

    #[test]
    fn call_stack_restores_on_exit() {
        let mut ctx = EvalContext::new();
        ctx.enter_call("outer()").unwrap();
        ctx.enter_call("inner()").unwrap();
        ctx.exit_call();
        assert_eq!(ctx.call_stack(), &["outer()".to_string()]);
    }
}
