//! Operator precedence and associativity.
//!
//! Shape assertions go through the AST; numeric cases evaluate, which
//! exercises the same split decisions end to end.

use cadence_cfl_ast::{BinaryOp, EvalContext, ExprKind, LogicOp, MapCallable, Value};
use cadence_cfl_parser::{parse_expression, ParseOptions};

fn parse(source: &str) -> cadence_cfl_ast::Expr {
    parse_expression(source, &ParseOptions::default())
        .unwrap_or_else(|e| panic!("parse failed for {source:?}: {e}"))
}

fn eval_with(source: &str, vars: &[(&str, Value)]) -> Value {
    let expr = parse(source);
    let scope = MapCallable::from_pairs(
        vars.iter().map(|(n, v)| (n.to_string(), v.clone())),
    );
    let mut ctx = EvalContext::new();
    expr.evaluate(&scope, &mut ctx)
        .unwrap_or_else(|e| panic!("eval failed for {source:?}: {e}"))
}

fn eval(source: &str) -> Value {
    eval_with(source, &[])
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    assert_eq!(eval("2 + 3 * 4"), Value::Int(14));
    assert_eq!(eval("(2 + 3) * 4"), Value::Int(20));
}

#[test]
fn power_binds_tighter_than_multiplication() {
    assert_eq!(eval("2 * 3 ^ 2"), Value::Int(18));
}

#[test]
fn additive_is_left_associative() {
    assert_eq!(eval("10 - 4 - 3"), Value::Int(3));
    assert_eq!(eval("20 / 2 / 5"), Value::Int(2));
}

#[test]
fn comparison_below_additive() {
    assert_eq!(eval("1 + 2 = 3"), Value::Bool(true));
    assert_eq!(eval("2 * 3 > 5"), Value::Bool(true));
}

#[test]
fn and_binds_tighter_than_or() {
    // a or b and c == a or (b and c)
    let expr = parse("a or b and c");
    match &expr.kind {
        ExprKind::AndOr { op, right, .. } => {
            assert_eq!(*op, LogicOp::Or);
            assert!(matches!(
                right.kind,
                ExprKind::AndOr {
                    op: LogicOp::And,
                    ..
                }
            ));
        }
        other => panic!("expected or at the root, got {other:?}"),
    }
}

#[test]
fn not_binds_looser_than_comparison() {
    // not a = b reads as not (a = b)
    assert_eq!(
        eval_with("not a = b", &[("a", Value::Int(1)), ("b", Value::Int(2))]),
        Value::Bool(true)
    );
}

#[test]
fn not_binds_looser_than_is() {
    // from the original suite: not a is null
    assert_eq!(
        eval_with("not a is null", &[("a", Value::Null)]),
        Value::Bool(false)
    );
    assert_eq!(
        eval_with("not a is int", &[("a", Value::Null)]),
        Value::Bool(true)
    );
}

#[test]
fn in_sits_between_logic_and_comparison() {
    assert_eq!(eval("5 in [4,5,6] and 1 in [2]"), Value::Bool(false));
    assert_eq!(eval("5 not in [4,5,6] or true"), Value::Bool(true));
}

#[test]
fn unary_minus_vs_subtraction() {
    assert_eq!(eval("5 - -3"), Value::Int(8));
    assert_eq!(eval("-2 + 7"), Value::Int(5));
    assert_eq!(eval("-2 ^ 2"), Value::Int(4)); // (-2)^2, split at '^'
}

#[test]
fn postfix_chain_is_left_associative() {
    let expr = parse("obj.item[2].value");
    // outermost is the trailing .value
    match &expr.kind {
        ExprKind::Dot { object, field } => {
            assert_eq!(field, "value");
            assert!(matches!(object.kind, ExprKind::Index { .. }));
        }
        other => panic!("expected dot at the root, got {other:?}"),
    }
}

#[test]
fn call_then_index() {
    assert_eq!(eval("range(6)[3]"), Value::Int(3));
}

#[test]
fn dice_operator_and_literal_agree() {
    let lit = parse("4d6");
    let spaced = parse("4 d 6");
    assert!(matches!(
        lit.kind,
        ExprKind::Binary {
            op: BinaryOp::Dice,
            ..
        }
    ));
    assert!(matches!(
        spaced.kind,
        ExprKind::Binary {
            op: BinaryOp::Dice,
            ..
        }
    ));
}

#[test]
fn where_binds_loosest() {
    // the where applies to the whole product, not just c
    assert_eq!(
        eval("a * b + c where a = 2, b = 3, c = 4"),
        Value::Int(10)
    );
}

#[test]
fn asserting_binds_tighter_than_where() {
    // from the original suite: the where binding is visible inside the
    // assertion condition
    assert_eq!(
        eval("a asserting a is int where a = 3"),
        Value::Int(3)
    );
}

#[test]
fn string_concatenation() {
    assert_eq!(eval("'hp: ' + 7"), Value::string("hp: 7"));
}

#[test]
fn modulo_shares_the_multiplicative_tier() {
    assert_eq!(eval("10 % 3 + 1"), Value::Int(2));
    assert_eq!(eval("2 * 7 % 3"), Value::Int(2));
}
