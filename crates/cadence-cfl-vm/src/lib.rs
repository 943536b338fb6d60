// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Bytecode lowering and the stack virtual machine for the Cadence
//! formula language.
//!
//! [`lower_formula`] turns an optimized AST into a flat
//! [`bytecode::Program`] where it can, embedding tree-walk steps for
//! the forms the VM declines (`let`, command sequencing, generic
//! lambdas); [`execute`] runs a program against a host scope. Tree-walk
//! and VM evaluation of the same expression produce identical values;
//! the facade prefers the VM when a program exists.

pub mod bytecode;
mod exec;
mod lower;

pub use bytecode::{Instr, Program};
pub use exec::execute;
pub use lower::lower_formula;

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_cfl_ast::{EvalContext, MapCallable, Value};
    use cadence_cfl_parser::{parse_formula, ParseOptions};

    fn both_ways(source: &str, vars: &[(&str, Value)]) -> (Value, Value) {
        let parsed = parse_formula(source, &ParseOptions::default()).expect("parse");
        let scope = MapCallable::from_pairs(
            vars.iter().map(|(n, v)| (n.to_string(), v.clone())),
        );
        let mut ctx = EvalContext::new();
        let walked = parsed
            .body
            .main
            .evaluate(&scope, &mut ctx)
            .expect("tree-walk");
        let program = lower_formula(&parsed.body.main).expect("lowerable");
        let mut ctx = EvalContext::new();
        let ran = execute(&program, &scope, &mut ctx).expect("vm");
        (walked, ran)
    }

    fn agree(source: &str, vars: &[(&str, Value)]) {
        let (walked, ran) = both_ways(source, vars);
        assert_eq!(walked, ran, "tree-walk and vm disagree on {source:?}");
    }

    #[test]
    fn arithmetic_and_logic_agree() {
        agree("x + 2 * y", &[("x", Value::Int(5)), ("y", Value::Int(7))]);
        agree("x > 3 and x < 10", &[("x", Value::Int(5))]);
        agree("x or y", &[("x", Value::Null), ("y", Value::Int(2))]);
    }

    #[test]
    fn collections_agree() {
        agree("[x, x + 1][1]", &[("x", Value::Int(4))]);
        agree("{'a': x}.a", &[("x", Value::Int(9))]);
        agree("xs[1:3]", &[("xs", Value::list((1..=6).map(Value::Int).collect()))]);
    }

    #[test]
    fn loops_agree() {
        let xs = Value::list((1..=5).map(Value::Int).collect());
        agree("map(xs, value * value)", &[("xs", xs.clone())]);
        agree("filter(xs, value % 2 = 0)", &[("xs", xs.clone())]);
        agree("find(xs, value > 3)", &[("xs", xs.clone())]);
        agree("[a + b | a <- xs, b <- [10, 20], a % 2 = 1]", &[("xs", xs)]);
    }

    #[test]
    fn where_groups_agree() {
        agree("a * b where a = x + 1, b = a + 1", &[("x", Value::Int(3))]);
    }

    #[test]
    fn calls_agree() {
        agree(
            "f(x) where f = def(n) n * 2 + offset where offset = x",
            &[("x", Value::Int(10))],
        );
    }

    #[test]
    fn assertions_agree_and_fail_loudly() {
        agree("x asserting x > 0", &[("x", Value::Int(2))]);
        let parsed = parse_formula("x asserting x > 10", &ParseOptions::default()).unwrap();
        let program = lower_formula(&parsed.body.main).unwrap();
        let scope = MapCallable::from_pairs([("x".to_string(), Value::Int(1))]);
        let mut ctx = EvalContext::new();
        let err = execute(&program, &scope, &mut ctx).unwrap_err();
        assert!(err.to_string().contains("x > 10"));
        assert!(err.span.is_some(), "vm errors carry a source span");
    }

    #[test]
    fn small_indices_specialize() {
        let parsed = parse_formula("xs[0] + xs[2]", &ParseOptions::default()).unwrap();
        let program = lower_formula(&parsed.body.main).unwrap();
        assert!(program.instrs.contains(&Instr::Index0));
        assert!(program.instrs.contains(&Instr::Index2));
    }

    #[test]
    fn non_lowerable_root_declines() {
        let parsed = parse_formula("let x = 2d6; x + 1", &ParseOptions::default()).unwrap();
        assert!(lower_formula(&parsed.body.main).is_none());
    }

    #[test]
    fn command_sequences_embed_as_tree_walk() {
        // a command sequence under a lowerable parent embeds opaquely
        let parsed = parse_formula(
            "if(go, set('a', 1); set('b', 2), null)",
            &ParseOptions::default(),
        )
        .unwrap();
        let program = lower_formula(&parsed.body.main).expect("if itself lowers");
        assert!(program
            .instrs
            .iter()
            .any(|i| matches!(i, Instr::TreeWalk(_))));
    }

    #[test]
    fn inlining_skips_duplicated_nontrivial_args() {
        // 2d6 is non-trivial and referenced twice: the call must stay a
        // dispatch so the dice roll happens once
        let parsed = parse_formula(
            "f(2d6) where f = def(n) n - n",
            &ParseOptions::default(),
        )
        .unwrap();
        let program = lower_formula(&parsed.body.main).unwrap();
        let scope = MapCallable::new();
        for _ in 0..20 {
            let mut ctx = EvalContext::new();
            assert_eq!(
                execute(&program, &scope, &mut ctx).unwrap(),
                Value::Int(0)
            );
        }
    }

    #[test]
    fn simple_calls_inline() {
        // f is a known closure-free lambda with a trivial argument: the
        // body inlines and no dispatch remains in the where body
        let parsed = parse_formula(
            "f(x) where f = def(n) n + 1",
            &ParseOptions::default(),
        )
        .unwrap();
        let program = lower_formula(&parsed.body.main).unwrap();
        let body = &program.wheres[0].body;
        assert!(
            !body
                .instrs
                .iter()
                .any(|i| matches!(i, Instr::CallFunction { .. })),
            "expected the call to inline: {}",
            program.disassemble()
        );
        let scope = MapCallable::from_pairs([("x".to_string(), Value::Int(41))]);
        let mut ctx = EvalContext::new();
        assert_eq!(
            execute(&program, &scope, &mut ctx).unwrap(),
            Value::Int(42)
        );
    }

    #[test]
    fn disassembly_renders() {
        let parsed = parse_formula("x + 1", &ParseOptions::default()).unwrap();
        let program = lower_formula(&parsed.body.main).unwrap();
        let text = program.disassemble();
        assert!(text.contains("LoadName"));
        assert!(text.contains("Binary"));
    }
}
