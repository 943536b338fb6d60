//! Lexical, syntactic, and strict-mode failure paths.

use cadence_cfl_ast::{ScopeLayout, Type};
use cadence_cfl_parser::{
    parse_expression, parse_formula, ParseError, ParseErrorKind, ParseOptions, StrictMode,
};

fn parse_err(source: &str) -> ParseError {
    parse_formula(source, &ParseOptions::default())
        .expect_err(&format!("expected {source:?} to fail"))
}

fn strict_opts(names: &[(&str, Type)]) -> ParseOptions {
    let mut layout = ScopeLayout::new();
    for (name, ty) in names {
        layout.add(*name, ty.clone());
    }
    ParseOptions {
        strict: StrictMode::Abort,
        layout: Some(layout),
        ..ParseOptions::default()
    }
}

#[test]
fn unrecognized_characters_are_lexical_errors() {
    let err = parse_err("1 + $");
    assert_eq!(err.kind, ParseErrorKind::Lex);
}

#[test]
fn unterminated_string_is_a_lexical_error() {
    let err = parse_err("'oops");
    assert_eq!(err.kind, ParseErrorKind::Lex);
}

#[test]
fn unmatched_brackets() {
    assert!(parse_formula("(1 + 2", &ParseOptions::default()).is_err());
    assert!(parse_formula("[1, 2", &ParseOptions::default()).is_err());
    assert!(parse_formula("1 + 2)", &ParseOptions::default()).is_err());
}

#[test]
fn malformed_where_binding() {
    let err = parse_err("x where 3 = 4");
    assert_eq!(err.kind, ParseErrorKind::InvalidSyntax);
    let err = parse_err("x where a");
    assert_eq!(err.kind, ParseErrorKind::InvalidSyntax);
}

#[test]
fn duplicate_where_binding() {
    let err = parse_err("x where a = 1, a = 2");
    assert!(err.message.contains("duplicate"));
}

#[test]
fn guard_chain_needs_recursive_case() {
    let err = parse_err("base x <= 0: 1");
    assert!(err.message.contains("recursive"));
}

#[test]
fn if_arity_is_checked() {
    let err = parse_err("if(true)");
    assert!(err.message.contains("if()"));
    assert!(parse_formula("if(true, 1)", &ParseOptions::default()).is_ok());
}

#[test]
fn builtin_arity_is_checked_at_parse_time() {
    let err = parse_err("abs()");
    assert!(err.message.contains("abs()"));
}

#[test]
fn functions_keyword_is_reserved() {
    let err = parse_err("functions { }");
    assert!(err.message.contains("host"));
}

#[test]
fn default_arguments_must_be_constant() {
    let err = parse_err("def f(x = 1d6) x; f()");
    assert!(err.message.contains("constant"));
}

#[test]
fn non_defaulted_parameter_cannot_follow_defaulted() {
    let err = parse_err("def f(x = 1, y) x; f(1, 2)");
    assert_eq!(err.kind, ParseErrorKind::InvalidSyntax);
}

#[test]
fn errors_pinpoint_their_location() {
    let source = "1 + (2 *";
    let err = parse_err(source);
    assert!(err.span.start > 0);
}

// === strict mode ===

#[test]
fn strict_abort_rejects_unknown_identifiers() {
    let opts = strict_opts(&[("hitpoints", Type::int())]);
    let err = parse_expression("hitpoits + 1", &opts).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::StaticType);
    assert!(
        err.message.contains("did you mean 'hitpoints'"),
        "unique close candidate should be suggested: {}",
        err.message
    );
}

#[test]
fn strict_suggestion_suppressed_on_tie() {
    let opts = strict_opts(&[("speed_x", Type::int()), ("speed_y", Type::int())]);
    let err = parse_expression("speed_z + 1", &opts).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::StaticType);
    assert!(
        !err.message.contains("did you mean"),
        "tied candidates must suppress the suggestion: {}",
        err.message
    );
}

#[test]
fn strict_off_lets_unknowns_through() {
    let opts = ParseOptions {
        layout: Some(ScopeLayout::new()),
        ..ParseOptions::default()
    };
    assert!(parse_expression("mystery + 1", &opts).is_ok());
}

#[test]
fn strict_checks_operator_operands() {
    let opts = strict_opts(&[("name", Type::string())]);
    let err = parse_expression("name / 2", &opts).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::StaticType);
}

#[test]
fn strict_checks_builtin_argument_types() {
    let opts = strict_opts(&[("name", Type::string())]);
    let err = parse_expression("sqrt(name)", &opts).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::StaticType);
}

#[test]
fn strict_allows_well_typed_formulas() {
    let opts = strict_opts(&[("hp", Type::int()), ("name", Type::string())]);
    assert!(parse_expression("abs(hp) + size(name)", &opts).is_ok());
    assert!(parse_expression("name + ': ' + str(hp)", &opts).is_ok());
}

#[test]
fn where_names_are_not_unknown() {
    let opts = strict_opts(&[]);
    assert!(parse_expression("a + b where a = 1, b = 2", &opts).is_ok());
}
