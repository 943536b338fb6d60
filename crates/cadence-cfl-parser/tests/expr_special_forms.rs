//! Special forms: where, let/def sequences, lambdas, guard chains,
//! comprehensions, the vectorized loop primitives, asserting, type
//! tests and casts, and command sequencing.

use cadence_cfl_ast::{
    Callable, EvalContext, ExprKind, MapCallable, Type, TypeKind, Value,
};
use cadence_cfl_parser::{parse_expression, parse_formula, ParseOptions};

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

fn ints(values: &[i64]) -> Value {
    Value::list(values.iter().copied().map(Value::Int).collect())
}

// === where ===

#[test]
fn where_single_binding() {
    assert_eq!(eval("hp + 4 where hp = 10"), Value::Int(14));
}

#[test]
fn where_bindings_see_each_other() {
    assert_eq!(eval("a where a = b + 1, b = 2"), Value::Int(3));
}

#[test]
fn chained_where_merges() {
    assert_eq!(
        eval("a * b + c where a = 2 where b = 3 where c = 4"),
        Value::Int(10)
    );
}

#[test]
fn where_is_lazy() {
    // the unused binding would divide by zero under the fail policy;
    // laziness means it never evaluates at all
    assert_eq!(eval("x where x = 1, unused = [1][5]"), Value::Int(1));
}

#[test]
fn where_memoizes_per_activation() {
    // a dice binding read twice yields one roll
    assert_eq!(eval("a - a where a = 2d100"), Value::Int(0));
}

#[test]
fn where_builds_map_values() {
    let result = eval("{'a': a} where a = 4");
    let map = result.as_map().expect("map");
    assert_eq!(map[&Value::string("a")], Value::Int(4));
}

// === sequences: let and def ===

#[test]
fn let_scopes_the_rest_of_the_sequence() {
    assert_eq!(eval("let x = 5; x + 1"), Value::Int(6));
}

#[test]
fn def_statement_binds_a_function() {
    assert_eq!(eval("def f(x = 5) x; f() + f(1)"), Value::Int(6));
}

#[test]
fn def_statements_chain() {
    assert_eq!(eval("def f(g) g(5) + 1; def fn(n) n * n; f(fn)"), Value::Int(26));
}

// === lambdas ===

#[test]
fn anonymous_lambda_via_where() {
    assert_eq!(eval("f(5) where f = def(x, y = 2) x * y"), Value::Int(10));
}

#[test]
fn anonymous_lambda_recurses_via_recurse() {
    assert_eq!(
        eval("f(5) where f = def(n) if(n <= 1, 1, n * recurse(n - 1))"),
        Value::Int(120)
    );
}

#[test]
fn closures_capture_by_value() {
    assert_eq!(
        eval("f(10) where f = def(x) x + base where base = 7"),
        Value::Int(17)
    );
}

#[test]
fn closure_free_lambda_is_a_constant() {
    let expr = parse("def(x) x + 1");
    assert!(matches!(
        expr.constant_value(),
        Some(Value::Function(_))
    ));
}

#[test]
fn capturing_lambda_is_not_a_constant() {
    let expr = parse("def(x) x + y where y = 2d6");
    assert!(expr.constant_value().is_none());
}

#[test]
fn guard_chain_with_global_where() {
    // from the original suite: the trailing where is visible in the
    // guard as well as both cases
    let source = "def silly_add(a, c) \
                  base b <= 0: a \
                  recursive: silly_add(a + 1, b - 1) where b = c; \
                  silly_add(50, 100)";
    assert_eq!(eval(source), Value::Int(150));
}

#[test]
fn generic_lambda_instantiates() {
    assert_eq!(
        eval("f<<int>>(3) where f = def<<T>>(T x) -> T x"),
        Value::Int(3)
    );
}

#[test]
fn generic_arity_mismatch_fails_at_runtime() {
    let expr = parse("f<<int, string>>(3) where f = def<<T>>(T x) -> T x");
    let scope = MapCallable::new();
    let mut ctx = EvalContext::new();
    assert!(expr.evaluate(&scope, &mut ctx).is_err());
}

// === guard chains at formula level ===

#[test]
fn formula_level_guard_chain() {
    let parsed = parse_formula(
        "base n <= 0: 'done' recursive: n",
        &ParseOptions::default(),
    )
    .unwrap();
    assert_eq!(parsed.body.guards.len(), 1);
    let scope = MapCallable::from_pairs([("n".to_string(), Value::Int(0))]);
    let mut ctx = EvalContext::new();
    let guard = &parsed.body.guards[0];
    assert!(guard.guard.evaluate(&scope, &mut ctx).unwrap().is_truthy());
    assert_eq!(
        guard.body.evaluate(&scope, &mut ctx).unwrap(),
        Value::string("done")
    );
}

// === comprehensions ===

#[test]
fn comprehension_identity() {
    assert_eq!(eval("[x | x <- [0,1,2,3]]"), ints(&[0, 1, 2, 3]));
}

#[test]
fn comprehension_filter() {
    assert_eq!(eval("[x | x <- [0,1,2,3], x % 2 = 1]"), ints(&[1, 3]));
}

#[test]
fn comprehension_cross_product() {
    assert_eq!(
        eval("[x * 10 + y | x <- [1,2], y <- [3,4]]"),
        ints(&[13, 14, 23, 24])
    );
}

#[test]
fn comprehension_later_generator_sees_earlier() {
    assert_eq!(eval("[y | x <- [[1],[2,3]], y <- x]"), ints(&[1, 2, 3]));
}

// === vectorized primitives ===

#[test]
fn map_exposes_value_and_index() {
    assert_eq!(eval("map([10,20,30], value + index)"), ints(&[10, 21, 32]));
}

#[test]
fn map_with_named_binding() {
    assert_eq!(eval("map([1,2,3], n, n * n)"), ints(&[1, 4, 9]));
}

#[test]
fn filter_keeps_matching() {
    assert_eq!(eval("filter([1,2,3,4], value % 2 = 0)"), ints(&[2, 4]));
}

#[test]
fn find_first_match_or_null() {
    assert_eq!(eval("find([1,2,3], value > 1)"), Value::Int(2));
    assert_eq!(eval("find([1,2,3], value > 9)"), Value::Null);
}

#[test]
fn map_over_map_sees_keys() {
    assert_eq!(
        eval("map({'a': 1, 'b': 2}, key + str(value))"),
        Value::list(vec![Value::string("a1"), Value::string("b2")])
    );
}

#[test]
fn array_index_round_trip() {
    // from the original suite
    assert_eq!(
        eval("map(range(6), elements[value]) = elements where elements = [5,6,7,8,9,10]"),
        Value::Bool(true)
    );
}

// === asserting ===

#[test]
fn asserting_passes_through() {
    assert_eq!(eval("a asserting a > 0 where a = 3"), Value::Int(3));
}

#[test]
fn asserting_failure_is_fatal() {
    let expr = parse("a asserting a > 10, a < 100 where a = 3");
    let scope = MapCallable::new();
    let mut ctx = EvalContext::new();
    let err = expr.evaluate(&scope, &mut ctx).unwrap_err();
    assert!(err.to_string().contains("a > 10"));
}

// === is / casts ===

#[test]
fn is_tests_run_at_runtime() {
    assert_eq!(eval_with("a is int", &[("a", Value::Int(1))]), Value::Bool(true));
    assert_eq!(eval_with("a is list", &[("a", Value::Int(1))]), Value::Bool(false));
    assert_eq!(eval_with("a is not null", &[("a", Value::Null)]), Value::Bool(false));
}

#[test]
fn narrowing_cast_checks_and_passes() {
    assert_eq!(eval_with("int <- a", &[("a", Value::Int(4))]), Value::Int(4));
}

#[test]
fn narrowing_cast_failure_is_fatal() {
    let expr = parse("int <- a");
    let scope = MapCallable::from_pairs([("a".to_string(), Value::string("x"))]);
    let mut ctx = EvalContext::new();
    assert!(expr.evaluate(&scope, &mut ctx).is_err());
}

#[test]
fn is_narrows_union_types_in_branches() {
    let expr = parse("if(a is int, a + 1, 0) where a = 3");
    // the whole thing folds or at least types as int
    assert!(matches!(
        expr.ty.kind(),
        TypeKind::Int | TypeKind::Any | TypeKind::Union(_)
    ));
    assert_eq!(eval("if(a is int, a + 1, 0) where a = 3"), Value::Int(4));
}

// === strings ===

#[test]
fn interpolation_splices_expressions() {
    assert_eq!(
        eval("'hp: ${hp * 2}!' where hp = 21"),
        Value::string("hp: 42!")
    );
}

#[test]
fn raw_strings_keep_everything() {
    assert_eq!(eval("q((4+2()))"), Value::string("(4+2())"));
}

// === command sequencing ===

#[test]
fn semicolon_defers_side_effects() {
    let expr = parse("set('a', 1); set('b', 2)");
    assert!(matches!(expr.ty.kind(), TypeKind::Commands));

    let scope = MapCallable::from_pairs([
        ("a".to_string(), Value::Null),
        ("b".to_string(), Value::Null),
    ]);
    let mut ctx = EvalContext::new();
    let commands = expr.evaluate(&scope, &mut ctx).unwrap();
    // nothing ran yet
    assert_eq!(scope.get("a", &mut ctx).unwrap(), Value::Null);
    let scope_dyn: &dyn Callable = &scope;
    scope_dyn.run_command(&commands, &mut ctx).unwrap();
    assert_eq!(scope.get("a", &mut ctx).unwrap(), Value::Int(1));
    assert_eq!(scope.get("b", &mut ctx).unwrap(), Value::Int(2));
}

// === slot resolution ===

#[test]
fn layout_symbols_resolve_to_slots() {
    let mut layout = cadence_cfl_ast::ScopeLayout::new();
    layout.add("hp", Type::int());
    let opts = ParseOptions {
        layout: Some(layout),
        ..ParseOptions::default()
    };
    let expr = parse_expression("hp + 1", &opts).unwrap();
    let mut saw_slot = false;
    expr.walk(&mut |node| {
        if let ExprKind::Identifier { slot, .. } = &node.kind {
            saw_slot |= slot.is_some();
        }
    });
    assert!(saw_slot, "hp should resolve to a slot against the layout");
}
