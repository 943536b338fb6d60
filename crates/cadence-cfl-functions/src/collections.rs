//! List, map, and string builtins.

use std::sync::Arc;

use crate::{arg_error, NativeFn};
use cadence_cfl_ast::{
    Callable, EvalContext, EvalError, EvalErrorKind, EvalResult, FunctionSig, FunctionValue, Type,
    Value,
};

pub(crate) const FUNCTIONS: [NativeFn; 14] = [
    NativeFn::new("size", size_sig, size),
    NativeFn::new("empty", empty_sig, empty),
    NativeFn::new("head", element_sig, head),
    NativeFn::new("back", element_sig, back),
    NativeFn::new("index", index_sig, index),
    NativeFn::new("keys", keys_sig, keys),
    NativeFn::new("values", values_sig, values),
    NativeFn::new("range", range_sig, range),
    NativeFn::new("reverse", list_to_list_sig, reverse),
    NativeFn::new("sort", sort_sig, sort),
    NativeFn::new("sum", sum_sig, sum),
    NativeFn::new("zip", zip_sig, zip),
    NativeFn::new("join", join_sig, join),
    NativeFn::new("split", split_sig, split),
];

fn size_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::any()], Type::int())
}

fn size(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match args[0].num_elements() {
        Some(n) => Ok(Value::Int(n as i64)),
        None => Err(arg_error("size", "a list, map, or string", &args[0])),
    }
}

fn empty_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::any()], Type::bool())
}

fn empty(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    match args[0].num_elements() {
        Some(n) => Ok(Value::Bool(n == 0)),
        None => Err(arg_error("empty", "a list, map, or string", &args[0])),
    }
}

fn element_sig() -> FunctionSig {
    FunctionSig::generic(
        vec!["T"],
        vec![Type::list(Type::generic("T"))],
        Type::generic("T"),
    )
}

fn head(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| arg_error("head", "a list", &args[0]))?;
    items.first().cloned().ok_or_else(|| {
        EvalError::new(EvalErrorKind::IndexOutOfRange { index: 0, len: 0 })
    })
}

fn back(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| arg_error("back", "a list", &args[0]))?;
    items.last().cloned().ok_or_else(|| {
        EvalError::new(EvalErrorKind::IndexOutOfRange { index: 0, len: 0 })
    })
}

fn index_sig() -> FunctionSig {
    FunctionSig::generic(
        vec!["T"],
        vec![Type::list(Type::generic("T")), Type::generic("T")],
        Type::int(),
    )
}

/// First position of the value in the list, or -1.
fn index(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| arg_error("index", "a list", &args[0]))?;
    let pos = items.iter().position(|v| v == &args[1]);
    Ok(Value::Int(pos.map(|p| p as i64).unwrap_or(-1)))
}

fn keys_sig() -> FunctionSig {
    FunctionSig::generic(
        vec!["K", "V"],
        vec![Type::map(Type::generic("K"), Type::generic("V"))],
        Type::list(Type::generic("K")),
    )
}

fn keys(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let entries = args[0]
        .as_map()
        .ok_or_else(|| arg_error("keys", "a map", &args[0]))?;
    Ok(Value::list(entries.keys().cloned().collect()))
}

fn values_sig() -> FunctionSig {
    FunctionSig::generic(
        vec!["K", "V"],
        vec![Type::map(Type::generic("K"), Type::generic("V"))],
        Type::list(Type::generic("V")),
    )
}

fn values(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let entries = args[0]
        .as_map()
        .ok_or_else(|| arg_error("values", "a map", &args[0]))?;
    Ok(Value::list(entries.values().cloned().collect()))
}

fn range_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::int(), Type::int()], Type::list(Type::int()))
        .with_min_args(1)
}

/// `range(n)` is `[0, n)`; `range(a, b)` is `[a, b)`.
fn range(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let (start, end) = match args {
        [end] => (0, end.as_int().ok_or_else(|| arg_error("range", "ints", end))?),
        [start, end] => (
            start
                .as_int()
                .ok_or_else(|| arg_error("range", "ints", start))?,
            end.as_int().ok_or_else(|| arg_error("range", "ints", end))?,
        ),
        _ => unreachable!("arity checked by the table"),
    };
    Ok(Value::list((start..end).map(Value::Int).collect()))
}

fn list_to_list_sig() -> FunctionSig {
    FunctionSig::generic(
        vec!["T"],
        vec![Type::list(Type::generic("T"))],
        Type::list(Type::generic("T")),
    )
}

fn reverse(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| arg_error("reverse", "a list", &args[0]))?;
    Ok(Value::list(items.iter().rev().cloned().collect()))
}

fn sort_sig() -> FunctionSig {
    FunctionSig::generic(
        vec!["T"],
        vec![
            Type::list(Type::generic("T")),
            Type::function(
                vec![Type::generic("T"), Type::generic("T")],
                Type::bool(),
                2,
            ),
        ],
        Type::list(Type::generic("T")),
    )
    .with_min_args(1)
}

/// Sort by the total value order, or by a two-argument "less than"
/// comparator function.
fn sort(args: &[Value], scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| arg_error("sort", "a list", &args[0]))?;
    let mut sorted: Vec<Value> = items.to_vec();
    match args.get(1) {
        None => {
            sorted.sort();
        }
        Some(Value::Function(cmp)) => {
            // comparator may fail; an insertion sort keeps errors clean
            sorted = comparator_sort(sorted, cmp, scope, ctx)?;
        }
        Some(other) => return Err(arg_error("sort", "a comparator function", other)),
    }
    Ok(Value::list(sorted))
}

fn comparator_sort(
    items: Vec<Value>,
    cmp: &Arc<FunctionValue>,
    scope: &dyn Callable,
    ctx: &mut EvalContext,
) -> EvalResult<Vec<Value>> {
    let mut sorted: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        let mut at = sorted.len();
        for (i, existing) in sorted.iter().enumerate() {
            let less = FunctionValue::call(
                cmp,
                vec![item.clone(), existing.clone()],
                scope,
                ctx,
            )?;
            if less.is_truthy() {
                at = i;
                break;
            }
        }
        sorted.insert(at, item);
    }
    Ok(sorted)
}

fn sum_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::list(Type::any()), Type::any()], Type::any())
        .with_min_args(1)
}

/// Fold the list with `+`, starting from the optional initial value.
fn sum(args: &[Value], _scope: &dyn Callable, ctx: &mut EvalContext) -> EvalResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| arg_error("sum", "a list", &args[0]))?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in items {
        total = cadence_cfl_ast::ops::apply_binary(
            cadence_cfl_ast::BinaryOp::Add,
            &total,
            item,
            ctx,
        )?;
    }
    Ok(total)
}

fn zip_sig() -> FunctionSig {
    FunctionSig::generic(
        vec!["A", "B"],
        vec![
            Type::list(Type::generic("A")),
            Type::list(Type::generic("B")),
        ],
        Type::list(Type::list(Type::any())),
    )
}

/// Pair elements up to the shorter input's length.
fn zip(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let a = args[0]
        .as_list()
        .ok_or_else(|| arg_error("zip", "lists", &args[0]))?;
    let b = args[1]
        .as_list()
        .ok_or_else(|| arg_error("zip", "lists", &args[1]))?;
    Ok(Value::list(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| Value::list(vec![x.clone(), y.clone()]))
            .collect(),
    ))
}

fn join_sig() -> FunctionSig {
    FunctionSig::fixed(vec![Type::list(Type::any()), Type::string()], Type::string())
}

fn join(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| arg_error("join", "a list", &args[0]))?;
    let sep = args[1]
        .as_str()
        .ok_or_else(|| arg_error("join", "a separator string", &args[1]))?;
    let joined = items
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(sep);
    Ok(Value::string(joined))
}

fn split_sig() -> FunctionSig {
    FunctionSig::fixed(
        vec![Type::string(), Type::string()],
        Type::list(Type::string()),
    )
}

fn split(args: &[Value], _scope: &dyn Callable, _ctx: &mut EvalContext) -> EvalResult<Value> {
    let text = args[0]
        .as_str()
        .ok_or_else(|| arg_error("split", "a string", &args[0]))?;
    let sep = args[1]
        .as_str()
        .ok_or_else(|| arg_error("split", "a separator string", &args[1]))?;
    Ok(Value::list(
        text.split(sep).map(Value::string).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_cfl_ast::MapCallable;

    fn run(f: fn(&[Value], &dyn Callable, &mut EvalContext) -> EvalResult<Value>, args: Vec<Value>) -> EvalResult<Value> {
        let scope = MapCallable::new();
        let mut ctx = EvalContext::new();
        f(&args, &scope, &mut ctx)
    }

    #[test]
    fn range_single_and_double() {
        assert_eq!(
            run(range, vec![Value::Int(3)]).unwrap(),
            Value::list(vec![Value::Int(0), Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            run(range, vec![Value::Int(2), Value::Int(4)]).unwrap(),
            Value::list(vec![Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn sort_uses_total_order() {
        let list = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(
            run(sort, vec![list]).unwrap(),
            Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn head_of_empty_is_fatal() {
        let err = run(head, vec![Value::list(vec![])]).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::IndexOutOfRange { .. }));
    }

    #[test]
    fn sum_with_init() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(run(sum, vec![list, Value::Int(10)]).unwrap(), Value::Int(13));
    }
}
