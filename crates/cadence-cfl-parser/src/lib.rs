// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Parser and static checker for the Cadence formula language.
//!
//! Turns formula source into typed, constant-reduced [`cadence_cfl_ast`]
//! expression trees. Parsing is operator-precedence splitting over the
//! token array, threading a static symbol table so identifiers resolve
//! to parse-time slots and lambdas learn their captured bindings in the
//! same pass. The type-expression grammar shares the token stream;
//! strict mode adds unknown-identifier, operator, and call-signature
//! checks with a configurable warn/abort policy.
//!
//! Most hosts go through the facade crate (`cadence-cfl`) instead of
//! calling [`parse_formula`] directly.

mod error;
mod options;
mod parser;
mod suggest;
mod symbols;

pub use error::{PResult, ParseError, ParseErrorKind};
pub use options::{ParseOptions, StrictMode};
pub use parser::{parse_expression, parse_formula, parse_type_source, ParsedFormula};
pub use suggest::{closest_match, edit_distance};
pub use symbols::{Resolution, SymbolTable};

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_cfl_ast::{EvalContext, MapCallable, Value};

    fn eval(source: &str) -> Value {
        let parsed = parse_formula(source, &ParseOptions::default()).expect("parse");
        let scope = MapCallable::new();
        let mut ctx = EvalContext::new();
        parsed
            .body
            .main
            .evaluate(&scope, &mut ctx)
            .expect("evaluate")
    }

    #[test]
    fn arithmetic_folds_at_parse_time() {
        let parsed = parse_formula("1 + 2 * 3", &ParseOptions::default()).unwrap();
        assert_eq!(
            parsed.body.main.constant_value(),
            Some(&Value::Int(7))
        );
    }

    #[test]
    fn scope_reads_stay_dynamic() {
        let parsed = parse_formula("hp + 1", &ParseOptions::default()).unwrap();
        assert!(parsed.body.main.constant_value().is_none());
    }

    #[test]
    fn dice_never_fold() {
        let parsed = parse_formula("4d6", &ParseOptions::default()).unwrap();
        assert!(parsed.body.main.constant_value().is_none());
    }

    #[test]
    fn empty_formula_is_null() {
        assert_eq!(eval(""), Value::Null);
    }

    #[test]
    fn reduction_is_idempotent() {
        // folding an already-folded tree reproduces the same value
        let first = parse_formula("(1 + 2) * 3", &ParseOptions::default()).unwrap();
        let again = parse_formula("9", &ParseOptions::default()).unwrap();
        assert_eq!(
            first.body.main.constant_value(),
            again.body.main.constant_value()
        );
    }
}
