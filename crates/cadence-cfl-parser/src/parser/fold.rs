//! The static optimizer: algebraic simplification and constant
//! reduction.
//!
//! Reduction is speculative evaluation in probe mode: the probe scope
//! answers every read with `NotConst` and the dice stream does the same,
//! so an expression freezes into a literal exactly when evaluating it
//! touched neither. Any other evaluation error leaves the node alone to
//! fail at runtime with its proper diagnostics. Because a frozen
//! literal is returned unchanged on the next pass, reduction is
//! idempotent.
//!
//! A closure-free lambda reduces this way too: probing it yields the
//! shared template as a function value, so evaluating the formula never
//! allocates a closure for it.

use cadence_cfl_ast::{
    Expr, ExprKind, LogicOp, ProbeCallable, UnaryOp, Value,
};
use cadence_cfl_ast::{BinaryOp, EvalContext};

use super::Parser;

impl<'a> Parser<'a> {
    /// Run the static optimizer over a freshly built node. Children
    /// have already been through here, so one probe of this node is
    /// enough.
    pub(crate) fn finish(&self, expr: Expr) -> Expr {
        let expr = simplify(expr);
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Identifier { .. } => return expr,
            _ => {}
        }
        let mut ctx = EvalContext::probe();
        if let Some(types) = &self.opts.types {
            ctx.set_type_registry(types.clone());
        }
        match expr.evaluate(&ProbeCallable, &mut ctx) {
            Ok(value) => Expr::new(ExprKind::Literal(value), expr.span, expr.ty),
            Err(_) => expr,
        }
    }
}

fn is_const_int(expr: &Expr, expected: i64) -> bool {
    matches!(expr.constant_value(), Some(Value::Int(i)) if *i == expected)
}

/// Per-node algebraic rewrites that apply even when one side depends on
/// the scope.
fn simplify(expr: Expr) -> Expr {
    match expr.kind {
        ExprKind::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } => {
            if is_const_int(&right, 0) && left.ty.is_numeric() {
                return *left;
            }
            if is_const_int(&left, 0) && right.ty.is_numeric() {
                return *right;
            }
            Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Add,
                    left,
                    right,
                },
                expr.span,
                expr.ty,
            )
        }
        ExprKind::Binary {
            op: BinaryOp::Sub,
            left,
            right,
        } => {
            if is_const_int(&right, 0) && left.ty.is_numeric() {
                return *left;
            }
            Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Sub,
                    left,
                    right,
                },
                expr.span,
                expr.ty,
            )
        }
        ExprKind::Binary {
            op: BinaryOp::Mul,
            left,
            right,
        } => {
            if is_const_int(&right, 1) && left.ty.is_numeric() {
                return *left;
            }
            if is_const_int(&left, 1) && right.ty.is_numeric() {
                return *right;
            }
            // a zero side wins outright; the other side is known
            // side-effect free, so nothing observable is dropped
            if (is_const_int(&right, 0) || is_const_int(&left, 0))
                && matches!(left.ty.kind(), cadence_cfl_ast::TypeKind::Int)
                && matches!(right.ty.kind(), cadence_cfl_ast::TypeKind::Int)
            {
                return Expr::new(ExprKind::Literal(Value::Int(0)), expr.span, expr.ty);
            }
            Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    left,
                    right,
                },
                expr.span,
                expr.ty,
            )
        }
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => {
            if matches!(
                operand.kind,
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    ..
                }
            ) {
                if let ExprKind::Unary { operand: inner, .. } = operand.kind {
                    return *inner;
                }
                unreachable!("matched above");
            }
            Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand,
                },
                expr.span,
                expr.ty,
            )
        }
        ExprKind::AndOr { op, left, right } => {
            if let Some(decider) = left.constant_value() {
                let short = match op {
                    LogicOp::And => !decider.is_truthy(),
                    LogicOp::Or => decider.is_truthy(),
                };
                return if short { *left } else { *right };
            }
            Expr::new(ExprKind::AndOr { op, left, right }, expr.span, expr.ty)
        }
        ExprKind::If {
            cond,
            then,
            otherwise,
        } => {
            if let Some(decider) = cond.constant_value() {
                return if decider.is_truthy() { *then } else { *otherwise };
            }
            Expr::new(
                ExprKind::If {
                    cond,
                    then,
                    otherwise,
                },
                expr.span,
                expr.ty,
            )
        }
        kind => Expr::new(kind, expr.span, expr.ty),
    }
}
