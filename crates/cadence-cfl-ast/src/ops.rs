//! Operator semantics shared by the tree-walk evaluator and the VM.
//!
//! Binary operators here are the strict ones: `and`/`or` short-circuit
//! and live in the evaluator and the VM's jump instructions instead.
//!
//! Division by exact zero substitutes `decimal::epsilon()` for the
//! divisor under the default policy, returning a large finite value
//! instead of failing; `1/0` is an authoring convenience this engine's
//! content relies on. `EvalOptions::div_by_zero` turns it into an error.

use std::fmt;
use std::sync::Arc;

use crate::context::{DivByZero, EvalContext};
use crate::error::{EvalError, EvalErrorKind, EvalResult};
use crate::foundation::decimal::{Decimal, SCALE};
use crate::foundation::value::{Value, ValueMap};

/// Strictly-evaluated binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    /// `NdM`: roll N dice with M faces and sum.
    Dice,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Dice => "d",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

fn type_error(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::new(EvalErrorKind::OperandType {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    })
}

/// Apply a strict binary operator.
pub fn apply_binary(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    ctx: &mut EvalContext,
) -> EvalResult<Value> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => arith(op, left, right, |a, b| a - b, i64::wrapping_sub),
        BinaryOp::Mul => mul(left, right),
        BinaryOp::Div => div(left, right, ctx),
        BinaryOp::Mod => modulo(left, right),
        BinaryOp::Pow => pow(left, right),
        BinaryOp::Dice => {
            let (rolls, sides) = match (left.as_int(), right.as_int()) {
                (Some(r), Some(s)) => (r, s),
                _ => return Err(type_error(op, left, right)),
            };
            Ok(Value::Int(ctx.roll_dice(rolls, sides)?))
        }
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt => Ok(Value::Bool(left < right)),
        BinaryOp::Le => Ok(Value::Bool(left <= right)),
        BinaryOp::Gt => Ok(Value::Bool(left > right)),
        BinaryOp::Ge => Ok(Value::Bool(left >= right)),
        BinaryOp::In | BinaryOp::NotIn => {
            let contained = match right {
                Value::List(items) => items.iter().any(|item| item == left),
                Value::Map(entries) => entries.contains_key(left),
                other => {
                    return Err(EvalError::new(EvalErrorKind::IllegalInOperand {
                        ty: other.type_name(),
                    }));
                }
            };
            Ok(Value::Bool(contained == (op == BinaryOp::In)))
        }
    }
}

/// Apply a prefix operator.
pub fn apply_unary(op: UnaryOp, operand: &Value) -> EvalResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Neg => match operand {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Decimal(d) => Ok(Value::Decimal(-*d)),
            other => Err(EvalError::new(EvalErrorKind::UnaryOperandType {
                op: "-",
                operand: other.type_name(),
            })),
        },
    }
}

fn add(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        // the common case first
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        // string concatenation stringifies the other side
        (Value::Str(a), Value::Str(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::string(s))
        }
        (Value::Str(a), other) => {
            let mut s = a.to_string();
            other.write_source(&mut s);
            Ok(Value::string(s))
        }
        (other, Value::Str(b)) => {
            let mut s = other.to_source();
            s.push_str(b);
            Ok(Value::string(s))
        }
        // null is the identity
        (Value::Null, other) => Ok(other.clone()),
        (other, Value::Null) => Ok(other.clone()),
        // container concatenation always builds a fresh container
        (Value::List(a), Value::List(b)) => {
            let mut items = Vec::with_capacity(a.len() + b.len());
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Value::list(items))
        }
        // right-hand entries win on key collision
        (Value::Map(a), Value::Map(b)) => {
            let mut entries: ValueMap = a.as_ref().clone();
            for (k, v) in b.iter() {
                entries.insert(k.clone(), v.clone());
            }
            Ok(Value::map(entries))
        }
        _ => arith(BinaryOp::Add, left, right, |a, b| a + b, i64::wrapping_add),
    }
}

/// Numeric arithmetic with int→decimal promotion.
fn arith(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    dec: impl Fn(Decimal, Decimal) -> Decimal,
    int: impl Fn(i64, i64) -> i64,
) -> EvalResult<Value> {
    match (left.as_decimal(), right.as_decimal()) {
        (Some(a), Some(b)) => {
            if matches!(left, Value::Decimal(_)) || matches!(right, Value::Decimal(_)) {
                Ok(Value::Decimal(dec(a, b)))
            } else {
                let a = left.as_int().expect("as_decimal implies as_int");
                let b = right.as_int().expect("as_decimal implies as_int");
                Ok(Value::Int(int(a, b)))
            }
        }
        _ => Err(type_error(op, left, right)),
    }
}

fn mul(left: &Value, right: &Value) -> EvalResult<Value> {
    // list replication: [x] * 3
    if let (Value::List(items), Some(n)) = (left, right.as_int()) {
        let copies = n.unsigned_abs() as usize;
        let mut out = Vec::with_capacity(items.len() * copies);
        for _ in 0..copies {
            out.extend(items.iter().cloned());
        }
        return Ok(Value::list(out));
    }
    arith(
        BinaryOp::Mul,
        left,
        right,
        Decimal::mul,
        i64::wrapping_mul,
    )
}

fn div(left: &Value, right: &Value, ctx: &mut EvalContext) -> EvalResult<Value> {
    if !right.is_numeric() && !matches!(right, Value::Bool(_) | Value::Null) {
        return Err(type_error(BinaryOp::Div, left, right));
    }
    let divisor_zero = right.as_decimal().is_some_and(|d| d.is_zero());
    let substituted;
    let right = if divisor_zero {
        match ctx.options.div_by_zero {
            DivByZero::Epsilon => {
                substituted = Value::Decimal(Decimal::epsilon());
                &substituted
            }
            DivByZero::Fail => return Err(EvalError::new(EvalErrorKind::DivisionByZero)),
        }
    } else {
        right
    };
    arith(BinaryOp::Div, left, right, Decimal::div, |a, b| a / b)
}

fn modulo(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left.as_int(), right.as_int()) {
        (Some(_), Some(0)) => Err(EvalError::new(EvalErrorKind::ModuloByZero)),
        (Some(a), Some(b)) => Ok(Value::Int(a % b)),
        _ => Err(type_error(BinaryOp::Mod, left, right)),
    }
}

fn pow(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left.as_decimal(), right.as_decimal()) {
        (Some(a), Some(b)) => {
            if matches!(left, Value::Decimal(_)) || matches!(right, Value::Decimal(_)) {
                let res = a.as_f64().powf(b.as_f64());
                Ok(Value::Decimal(Decimal::from_raw((res * SCALE as f64) as i64)))
            } else {
                let a = left.as_int().expect("numeric");
                let b = right.as_int().expect("numeric");
                Ok(Value::Int((a as f64).powf(b as f64) as i64))
            }
        }
        _ => Err(type_error(BinaryOp::Pow, left, right)),
    }
}

/// `container[index]` lookup.
pub fn index_value(container: &Value, index: &Value) -> EvalResult<Value> {
    match container {
        Value::List(items) => {
            let i = index.as_int().ok_or_else(|| {
                EvalError::new(EvalErrorKind::IllegalIndexOperand {
                    ty: index.type_name(),
                })
            })?;
            if i < 0 || i as usize >= items.len() {
                return Err(EvalError::new(EvalErrorKind::IndexOutOfRange {
                    index: i,
                    len: items.len(),
                }));
            }
            Ok(items[i as usize].clone())
        }
        Value::Str(s) => {
            let i = index.as_int().ok_or_else(|| {
                EvalError::new(EvalErrorKind::IllegalIndexOperand {
                    ty: index.type_name(),
                })
            })?;
            let len = s.chars().count();
            if i < 0 || i as usize >= len {
                return Err(EvalError::new(EvalErrorKind::IndexOutOfRange { index: i, len }));
            }
            let ch = s.chars().nth(i as usize).expect("bounds checked");
            Ok(Value::string(ch.to_string()))
        }
        // a missing key reads as null, like an unknown scope name
        Value::Map(entries) => Ok(entries.get(index).cloned().unwrap_or(Value::Null)),
        other => Err(EvalError::new(EvalErrorKind::IllegalIndexOperand {
            ty: other.type_name(),
        })),
    }
}

/// `container[begin:end]` slice. Out-of-range bounds clamp to the
/// length; `begin > end` yields an empty result, not a failure; negative
/// bounds are fatal.
pub fn slice_value(container: &Value, begin: i64, end: i64) -> EvalResult<Value> {
    if begin < 0 || end < 0 {
        return Err(EvalError::new(EvalErrorKind::IndexOutOfRange {
            index: begin.min(end),
            len: container.num_elements().unwrap_or(0),
        }));
    }
    match container {
        Value::List(items) => {
            let begin = (begin as usize).min(items.len());
            let end = (end as usize).min(items.len());
            if end <= begin {
                return Ok(Value::list(Vec::new()));
            }
            Ok(Value::list(items[begin..end].to_vec()))
        }
        Value::Str(s) => {
            let begin = begin as usize;
            let end = end as usize;
            let sliced: String = s
                .chars()
                .skip(begin)
                .take(end.saturating_sub(begin))
                .collect();
            Ok(Value::string(sliced))
        }
        other => Err(EvalError::new(EvalErrorKind::IllegalIndexOperand {
            ty: other.type_name(),
        })),
    }
}

/// `value.name` member access.
pub fn member_value(value: &Value, name: &str, ctx: &mut EvalContext) -> EvalResult<Value> {
    match value {
        Value::Map(entries) => Ok(entries
            .get(&Value::string(name))
            .cloned()
            .unwrap_or(Value::Null)),
        Value::Object(obj) => obj.get(name, ctx),
        _ => Err(EvalError::new(EvalErrorKind::UnknownMember {
            name: name.to_string(),
        })),
    }
}

/// Build a fresh list value, for literal construction.
pub fn make_list(items: Vec<Value>) -> Value {
    Value::List(Arc::new(items))
}

/// Build a fresh map value, for literal construction.
pub fn make_map(pairs: Vec<(Value, Value)>) -> Value {
    let mut entries = ValueMap::with_capacity(pairs.len());
    for (k, v) in pairs {
        entries.insert(k, v);
    }
    Value::Map(Arc::new(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvalContext {
        EvalContext::new()
    }

    #[test]
    fn int_arithmetic_stays_int() {
        let v = apply_binary(BinaryOp::Add, &Value::Int(2), &Value::Int(3), &mut ctx()).unwrap();
        assert_eq!(v, Value::Int(5));
        let v = apply_binary(BinaryOp::Div, &Value::Int(7), &Value::Int(2), &mut ctx()).unwrap();
        assert_eq!(v, Value::Int(3));
    }

    #[test]
    fn decimal_promotes() {
        let half = Value::Decimal(Decimal::parse("0.5").unwrap());
        let v = apply_binary(BinaryOp::Add, &Value::Int(1), &half, &mut ctx()).unwrap();
        assert_eq!(v, Value::Decimal(Decimal::parse("1.5").unwrap()));
    }

    #[test]
    fn divide_by_zero_substitutes_epsilon() {
        let v = apply_binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0), &mut ctx()).unwrap();
        // 1 / 0.000001 == 1000000.0, large and finite
        assert_eq!(v, Value::Decimal(Decimal::from_int(1_000_000)));
    }

    #[test]
    fn divide_by_zero_can_fail_instead() {
        let mut ctx = EvalContext::new();
        ctx.options.div_by_zero = DivByZero::Fail;
        let err =
            apply_binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0), &mut ctx).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::DivisionByZero);
    }

    #[test]
    fn modulo_by_zero_is_fatal() {
        let err =
            apply_binary(BinaryOp::Mod, &Value::Int(5), &Value::Int(0), &mut ctx()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::ModuloByZero);
    }

    #[test]
    fn string_concat_stringifies() {
        let v = apply_binary(
            BinaryOp::Add,
            &Value::string("hp: "),
            &Value::Int(10),
            &mut ctx(),
        )
        .unwrap();
        assert_eq!(v, Value::string("hp: 10"));
    }

    #[test]
    fn list_concat_is_fresh() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(2)]);
        let v = apply_binary(BinaryOp::Add, &a, &b, &mut ctx()).unwrap();
        assert_eq!(v, Value::list(vec![Value::Int(1), Value::Int(2)]));
        // operands unchanged
        assert_eq!(a.as_list().unwrap().len(), 1);
    }

    #[test]
    fn membership() {
        let list = Value::list(vec![Value::Int(4), Value::Int(5), Value::Int(6)]);
        let yes = apply_binary(BinaryOp::In, &Value::Int(5), &list, &mut ctx()).unwrap();
        assert_eq!(yes, Value::Bool(true));
        let no = apply_binary(BinaryOp::NotIn, &Value::Int(5), &list, &mut ctx()).unwrap();
        assert_eq!(no, Value::Bool(false));
    }

    #[test]
    fn membership_on_scalar_is_fatal() {
        let err =
            apply_binary(BinaryOp::In, &Value::Int(5), &Value::Int(4), &mut ctx()).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::IllegalInOperand { .. }));
    }

    #[test]
    fn slicing_clamps_and_empties() {
        let list = Value::list((1..=6).map(Value::Int).collect());
        assert_eq!(
            slice_value(&list, 2, 4).unwrap(),
            Value::list(vec![Value::Int(3), Value::Int(4)])
        );
        assert_eq!(
            slice_value(&list, 4, 100).unwrap(),
            Value::list(vec![Value::Int(5), Value::Int(6)])
        );
        assert_eq!(slice_value(&list, 5, 2).unwrap(), Value::list(vec![]));
        assert!(slice_value(&list, -1, 2).is_err());
    }

    #[test]
    fn index_bounds_are_fatal() {
        let list = Value::list(vec![Value::Int(1)]);
        assert!(matches!(
            index_value(&list, &Value::Int(3)).unwrap_err().kind,
            EvalErrorKind::IndexOutOfRange { .. }
        ));
    }

    #[test]
    fn map_missing_key_reads_null() {
        let map = make_map(vec![(Value::string("a"), Value::Int(1))]);
        assert_eq!(index_value(&map, &Value::string("b")).unwrap(), Value::Null);
    }

    #[test]
    fn list_replication() {
        let v = mul(&Value::list(vec![Value::Int(7)]), &Value::Int(3)).unwrap();
        assert_eq!(
            v,
            Value::list(vec![Value::Int(7), Value::Int(7), Value::Int(7)])
        );
    }
}
