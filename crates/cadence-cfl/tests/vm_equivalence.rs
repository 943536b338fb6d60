//! Differential fuzzing: tree-walk and VM evaluation of the same
//! formula must agree, value for value and failure for failure.

use cadence_cfl::{EvalContext, Formula, MapCallable, ParseOptions, Value};
use proptest::prelude::*;

/// Generated formula sources over the variables `x` and `y`.
fn arb_formula() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (-100i64..100).prop_map(|i| format!("{i}")),
        (0i64..1000, 1u32..999).prop_map(|(whole, frac)| format!("{whole}.{frac:03}")),
        Just("x".to_string()),
        Just("y".to_string()),
        Just("true".to_string()),
        Just("null".to_string()),
    ];
    leaf.prop_recursive(4, 48, 3, |inner| {
        let op = prop::sample::select(vec![
            "+", "-", "*", "/", "%", "=", "!=", "<", "<=", ">", ">=", "and", "or",
        ]);
        prop_oneof![
            (inner.clone(), op, inner.clone())
                .prop_map(|(a, op, b)| format!("({a} {op} {b})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, a, b)| format!("if({c}, {a}, {b})")),
            inner.clone().prop_map(|a| format!("(-{a})")),
            inner.clone().prop_map(|a| format!("(not {a})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(a, b, i)| format!("[{a}, {b}][({i}) % 2]")),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| format!("map([{a}, {b}], value + index)")),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| format!("({a} where w = {b})")),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| format!("[e | e <- [{a}, {b}], e is int]")),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| format!("min({a}, {b})")),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn tree_walk_and_vm_agree(source in arb_formula(), x in -50i64..50, y in -50i64..50) {
        let formula = match Formula::parse(&source, &ParseOptions::default()) {
            Ok(formula) => formula,
            // generated text can be ill-typed in ways strict-off still
            // rejects (e.g. malformed decimals); both engines see the
            // same parse, so nothing to compare
            Err(_) => return Ok(()),
        };
        let scope = MapCallable::from_pairs([
            ("x".to_string(), Value::Int(x)),
            ("y".to_string(), Value::Int(y)),
        ]);

        let mut ctx = EvalContext::new();
        let walked = formula.execute_tree_walk(&scope, &mut ctx);
        let mut ctx = EvalContext::new();
        let ran = formula.execute_in(&scope, &mut ctx);

        match (walked, ran) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b, "value mismatch for {}", source),
            (Err(a), Err(b)) => prop_assert_eq!(a.kind, b.kind, "failure mismatch for {}", source),
            (a, b) => prop_assert!(false, "one engine failed for {}: {:?} vs {:?}", source, a, b),
        }
    }
}
