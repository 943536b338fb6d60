//! Numeric builtins.

use crate::{arg_error, NativeFn};
use cadence_cfl_ast::{
    Callable, Decimal, EvalContext, EvalResult, FunctionSig, Type, Value,
};

pub(crate) const FUNCTIONS: [NativeFn; 8] = [
    NativeFn::new("abs", abs_sig, abs),
    NativeFn::new("min", fold_sig, min),
    NativeFn::new("max", fold_sig, max),
    NativeFn::new("floor", to_int_sig, floor),
    NativeFn::new("ceil", to_int_sig, ceil),
    NativeFn::new("round", to_int_sig, round),
    NativeFn::new("sqrt", sqrt_sig, sqrt),
    NativeFn::new("sign", to_int_sig, sign),
];

fn numeric() -> Type {
    Type::union_of(
        vec![Type::int(), Type::decimal()],
        &cadence_cfl_ast::foundation::types::NullResolver,
    )
}

fn abs_sig() -> FunctionSig {
    FunctionSig::generic(vec!["T"], vec![Type::generic("T")], Type::generic("T"))
}

fn abs(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
        other => Err(arg_error("abs", "a number", other)),
    }
}

fn fold_sig() -> FunctionSig {
    // min(a, b, ...) or min([a, b, ...])
    FunctionSig::fixed(vec![Type::any()], Type::any())
        .with_min_args(1)
        .variadic()
}

/// Fold the arguments, or the elements of a single list argument.
fn fold_extremum(args: &[Value], keep_left: fn(&Value, &Value) -> bool) -> EvalResult<Value> {
    let items: Vec<Value> = match args {
        [Value::List(items)] => items.as_ref().clone(),
        _ => args.to_vec(),
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            Some(current) if keep_left(&current, &item) => current,
            _ => item,
        });
    }
    Ok(best.unwrap_or(Value::Null))
}

fn min(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    fold_extremum(args, |a, b| a <= b)
}

fn max(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    fold_extremum(args, |a, b| a >= b)
}

fn to_int_sig() -> FunctionSig {
    FunctionSig::fixed(vec![numeric()], Type::int())
}

fn floor(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Decimal(d) => Ok(Value::Int(d.floor())),
        other => Err(arg_error("floor", "a number", other)),
    }
}

fn ceil(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Decimal(d) => Ok(Value::Int(d.ceil())),
        other => Err(arg_error("ceil", "a number", other)),
    }
}

fn round(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Decimal(d) => Ok(Value::Int(d.round())),
        other => Err(arg_error("round", "a number", other)),
    }
}

fn sqrt_sig() -> FunctionSig {
    FunctionSig::fixed(vec![numeric()], Type::decimal())
}

fn sqrt(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match args[0].as_decimal() {
        Some(d) if d.raw() >= 0 => {
            let root = d.as_f64().sqrt();
            Ok(Value::Decimal(Decimal::from_raw(
                (root * cadence_cfl_ast::foundation::decimal::SCALE as f64) as i64,
            )))
        }
        _ => Err(arg_error("sqrt", "a non-negative number", &args[0])),
    }
}

fn sign(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.signum())),
        Value::Decimal(d) => Ok(Value::Int(d.raw().signum())),
        other => Err(arg_error("sign", "a number", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremum_folds_args_or_list() {
        let args = vec![Value::Int(3), Value::Int(1), Value::Int(2)];
        assert_eq!(fold_extremum(&args, |a, b| a <= b).unwrap(), Value::Int(1));
        let list = vec![Value::list(vec![Value::Int(3), Value::Int(7)])];
        assert_eq!(fold_extremum(&list, |a, b| a >= b).unwrap(), Value::Int(7));
    }

    #[test]
    fn rounding_variants() {
        let half = Value::Decimal(Decimal::parse("2.5").unwrap());
        let mut ctx = EvalContext::new();
        let scope = cadence_cfl_ast::MapCallable::new();
        assert_eq!(floor(&[half.clone()], &scope, &mut ctx).unwrap(), Value::Int(2));
        assert_eq!(ceil(&[half.clone()], &scope, &mut ctx).unwrap(), Value::Int(3));
        assert_eq!(round(&[half], &scope, &mut ctx).unwrap(), Value::Int(3));
    }
}
