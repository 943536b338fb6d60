//! Action builtins: the functions that build deferred command values.
//!
//! Calling one of these never touches the scope — it returns a
//! [`Value::Command`] capturing the arguments, and the host later runs
//! it through the scope's `run_command` entry point. This keeps formula
//! evaluation free of side effects.

use std::sync::Arc;

use crate::{arg_error, NativeFn};
use cadence_cfl_ast::foundation::CommandSeq;
use cadence_cfl_ast::ops;
use cadence_cfl_ast::{
    BinaryOp, Callable, CommandAction, EvalContext, EvalResult, FunctionSig, Type, Value,
};
use tracing::info;

pub(crate) const FUNCTIONS: [NativeFn; 3] = [
    NativeFn::new("set", set_sig, set),
    NativeFn::new("add", set_sig, add),
    NativeFn::new("debug", debug_sig, debug),
];

/// Deferred `scope.set(key, value)`.
#[derive(Debug)]
struct SetAction {
    key: String,
    value: Value,
}

impl CommandAction for SetAction {
    fn run(&self, scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<()> {
        scope.set(&self.key, self.value.clone(), ctx)
    }

    fn describe(&self) -> String {
        format!("set({})", self.key)
    }
}

/// Deferred `scope.set(key, scope.get(key) + value)`.
#[derive(Debug)]
struct AddAction {
    key: String,
    value: Value,
}

impl CommandAction for AddAction {
    fn run(&self, scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<()> {
        let current = scope.get(&self.key, ctx)?;
        let next = ops::apply_binary(BinaryOp::Add, &current, &self.value, ctx)?;
        scope.set(&self.key, next, ctx)
    }

    fn describe(&self) -> String {
        format!("add({})", self.key)
    }
}

/// Deferred diagnostic print.
#[derive(Debug)]
struct DebugAction {
    parts: Vec<Value>,
}

impl CommandAction for DebugAction {
    fn run(&self, _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<()> {
        let rendered = self
            .parts
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "cfl::debug", "{rendered}");
        Ok(())
    }

    fn describe(&self) -> String {
        "debug(...)".to_string()
    }
}

fn set_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::string(), Type::any()], Type::commands())
}

fn set(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let key = args[0]
        .as_str()
        .ok_or_else(|| arg_error("set", "a key string", &args[0]))?;
    Ok(Value::Command(Arc::new(CommandSeq::from_action(Arc::new(
        SetAction {
            key: key.to_string(),
            value: args[1].clone(),
        },
    )))))
}

fn add(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let key = args[0]
        .as_str()
        .ok_or_else(|| arg_error("add", "a key string", &args[0]))?;
    Ok(Value::Command(Arc::new(CommandSeq::from_action(Arc::new(
        AddAction {
            key: key.to_string(),
            value: args[1].clone(),
        },
    )))))
}

fn debug_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::any()], Type::commands())
        .with_min_args(1)
        .variadic()
}

fn debug(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    Ok(Value::Command(Arc::new(CommandSeq::from_action(Arc::new(
        DebugAction {
            parts: args.to_vec(),
        },
    )))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_cfl_ast::MapCallable;

    #[test]
    fn set_builds_a_command_without_touching_the_scope() {
        let mut scope = MapCallable::new();
        scope.define("hp", Value::Int(10));
        let mut ctx = EvalContext::new();

        let cmd = set(
            &[Value::string("hp"), Value::Int(3)],
            &scope,
            &mut ctx,
        )
        .unwrap();
        // nothing happened yet
        assert_eq!(scope.get("hp", &mut ctx).unwrap(), Value::Int(10));

        let dyn_scope: &dyn Callable = &scope;
        dyn_scope.run_command(&cmd, &mut ctx).unwrap();
        assert_eq!(scope.get("hp", &mut ctx).unwrap(), Value::Int(3));
    }

    #[test]
    fn add_accumulates_on_run() {
        let mut scope = MapCallable::new();
        scope.define("score", Value::Int(5));
        let mut ctx = EvalContext::new();
        let cmd = add(&[Value::string("score"), Value::Int(2)], &scope, &mut ctx).unwrap();
        let dyn_scope: &dyn Callable = &scope;
        dyn_scope.run_command(&cmd, &mut ctx).unwrap();
        dyn_scope.run_command(&cmd, &mut ctx).unwrap();
        assert_eq!(scope.get("score", &mut ctx).unwrap(), Value::Int(9));
    }
}
