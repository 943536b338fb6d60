//! Conversion and reflection builtins.

use crate::{arg_error, NativeFn};
use cadence_cfl_ast::{
    Callable, Decimal, EvalContext, EvalResult, FunctionSig, Type, Value,
};

pub(crate) const FUNCTIONS: [NativeFn; 4] = [
    NativeFn::new("str", str_sig, str_),
    NativeFn::new("int", int_sig, int_),
    NativeFn::new("decimal", decimal_sig, decimal_),
    NativeFn::new("typeof", typeof_sig, typeof_),
];

fn str_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::any()], Type::string())
}

fn str_(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    Ok(Value::string(args[0].to_string()))
}

fn int_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::any()], Type::int())
}

fn int_(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match &args[0] {
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| arg_error("int", "a numeric string", &args[0])),
        other => other
            .as_int()
            .map(Value::Int)
            .ok_or_else(|| arg_error("int", "a number or numeric string", other)),
    }
}

fn decimal_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::any()], Type::decimal())
}

fn decimal_(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match &args[0] {
        Value::Str(s) => Decimal::parse(s.trim())
            .map(Value::Decimal)
            .ok_or_else(|| arg_error("decimal", "a numeric string", &args[0])),
        other => other
            .as_decimal()
            .map(Value::Decimal)
            .ok_or_else(|| arg_error("decimal", "a number or numeric string", other)),
    }
}

fn typeof_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::any()], Type::string())
}

fn typeof_(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    Ok(Value::string(args[0].type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_cfl_ast::MapCallable;

    fn run(
        f: fn(&[Value], &dyn Callable, &mut EvalContext) -> EvalResult<Value>,
        arg: Value,
    ) -> EvalResult<Value> {
        let scope = MapCallable::new();
        let mut ctx = EvalContext::new();
        f(&[arg], &scope, &mut ctx)
    }

    #[test]
    fn conversions() {
        assert_eq!(run(str_, Value::Int(5)).unwrap(), Value::string("5"));
        assert_eq!(run(int_, Value::string(" 12 ")).unwrap(), Value::Int(12));
        assert_eq!(
            run(decimal_, Value::Int(2)).unwrap(),
            Value::Decimal(Decimal::from_int(2))
        );
        assert_eq!(run(typeof_, Value::string("x")).unwrap(), Value::string("string"));
    }

    #[test]
    fn int_of_garbage_is_fatal() {
        assert!(run(int_, Value::string("12moo")).is_err());
    }
}
