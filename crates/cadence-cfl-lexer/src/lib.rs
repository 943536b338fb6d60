// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Lexical analysis for the Cadence formula language.
//!
//! # Design
//!
//! - `Token` — all formula token types (keywords, operators, literals,
//!   identifiers, brackets)
//! - Whitespace and comments are stripped during lexing (not tokens)
//! - Decimal literals keep their source text so the written fraction
//!   survives to the parser exactly
//! - String literals keep interpolation markers (`${...}`) verbatim;
//!   the parser expands them
//!
//! Capitalized identifiers lex as a distinct [`Token::TypeName`]: they
//! are reserved for type names and generic type variables.
//!
//! The dice operator is the one context-sensitive spot: `4d6` is a
//! whole-literal roll, while `n d 6` reaches the parser as the
//! identifier `d` in operator position (a lone `d` can never be a
//! variable reference).
//!
//! # Examples
//!
//! ```
//! use cadence_cfl_lexer::{tokenize, Token};
//! let tokens = tokenize("hp + 4 where hp = 10").unwrap();
//! assert!(matches!(tokens[0].0, Token::Ident(_)));
//! assert!(matches!(tokens[2].0, Token::Int(4)));
//! ```

use logos::{Lexer, Logos};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// A string literal's contents and flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrLit {
    /// Raw text between the delimiters; `${...}` markers intact.
    pub text: String,
    /// `~...~` strings run through the host translation hook.
    pub translate: bool,
}

fn lex_quoted(lex: &mut Lexer<Token>) -> Option<StrLit> {
    let rem = lex.remainder();
    let end = rem.find('\'')?;
    let text = rem[..end].to_string();
    lex.bump(end + 1);
    Some(StrLit {
        text,
        translate: false,
    })
}

fn lex_translated(lex: &mut Lexer<Token>) -> Option<StrLit> {
    let rem = lex.remainder();
    let end = rem.find('~')?;
    let text = rem[..end].to_string();
    lex.bump(end + 1);
    Some(StrLit {
        text,
        translate: true,
    })
}

/// `q(...)` raw string: scan for the balancing close paren.
fn lex_raw(lex: &mut Lexer<Token>) -> Option<StrLit> {
    let rem = lex.remainder();
    let mut depth = 1usize;
    for (i, c) in rem.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let text = rem[..i].to_string();
                    lex.bump(i + 1);
                    return Some(StrLit {
                        text,
                        translate: false,
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// `4d6` whole-literal dice roll.
fn lex_dice(lex: &mut Lexer<Token>) -> Option<(i64, i64)> {
    let slice = lex.slice();
    let (rolls, sides) = slice.split_once('d')?;
    Some((rolls.parse().ok()?, sides.parse().ok()?))
}

fn lex_hex(lex: &mut Lexer<Token>) -> Option<i64> {
    i64::from_str_radix(&lex.slice()[2..], 16).ok()
}

/// A formula token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")] // Skip whitespace
#[logos(skip r"#[^\n]*")] // Skip # comments
#[logos(skip r"/\*([^*]|\*[^/])*\*/")] // Skip /* */ comments
pub enum Token {
    // === Keywords ===
    /// Keyword `def`
    #[token("def")]
    Def,
    /// Keyword `let`
    #[token("let")]
    Let,
    /// Keyword `where`
    #[token("where")]
    Where,
    /// Keyword `asserting`
    #[token("asserting")]
    Asserting,
    /// Keyword `base`
    #[token("base")]
    Base,
    /// Keyword `recursive`
    #[token("recursive")]
    Recursive,
    /// Keyword `enum`
    #[token("enum")]
    Enum,
    /// Keyword `functions` (reserved; function packages are registered
    /// by the host, not declared in formulas)
    #[token("functions")]
    Functions,
    /// Keyword `null`
    #[token("null")]
    Null,
    /// Keyword `true`
    #[token("true")]
    True,
    /// Keyword `false`
    #[token("false")]
    False,

    // === Word operators ===
    /// Operator `and`
    #[token("and")]
    And,
    /// Operator `or`
    #[token("or")]
    Or,
    /// Operator `not` (also half of `not in`)
    #[token("not")]
    Not,
    /// Operator `in`
    #[token("in")]
    In,
    /// Operator `is` (also half of `is not`)
    #[token("is")]
    Is,

    // === Literals ===
    /// Whole-literal dice roll `4d6`: (rolls, sides)
    #[regex(r"[0-9]+d[0-9]+", lex_dice, priority = 10)]
    DiceRoll((i64, i64)),
    /// Decimal literal; source text kept for exact redisplay
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().to_string())]
    #[regex(r"\.[0-9]+", |lex| lex.slice().to_string())]
    DecimalLit(String),
    /// Integer literal (decimal or `0x` hex)
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok(), priority = 5)]
    #[regex(r"0x[0-9a-fA-F]+", lex_hex)]
    Int(i64),
    /// Quoted string `'...'`
    #[token("'", lex_quoted)]
    /// Raw string `q(...)`, balanced-paren scanned
    #[token("q(", lex_raw)]
    Str(StrLit),
    /// Translated string `~...~`
    #[token("~", lex_translated)]
    TranslatedStr(StrLit),

    // === Identifiers ===
    /// Lowercase identifier
    #[regex(r"[a-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string(), priority = 3)]
    Ident(String),
    /// Capitalized identifier, reserved for type names and generic
    /// variables
    #[regex(r"[A-Z][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    TypeName(String),

    // === Symbol operators ===
    /// `+`
    #[token("+")]
    Plus,
    /// `-`
    #[token("-")]
    Minus,
    /// `*`
    #[token("*")]
    Star,
    /// `/`
    #[token("/")]
    Slash,
    /// `%`
    #[token("%")]
    Percent,
    /// `^`
    #[token("^")]
    Caret,
    /// `=`
    #[token("=")]
    Eq,
    /// `!=`
    #[token("!=")]
    NotEq,
    /// `<` (also opens type argument lists)
    #[token("<")]
    Lt,
    /// `<=`
    #[token("<=")]
    LtEq,
    /// `>`
    #[token(">")]
    Gt,
    /// `>=`
    #[token(">=")]
    GtEq,

    // === Punctuation ===
    /// `;`
    #[token(";")]
    Semicolon,
    /// `:`
    #[token(":")]
    Colon,
    /// `::`
    #[token("::")]
    ColonColon,
    /// `,`
    #[token(",")]
    Comma,
    /// `.`
    #[token(".")]
    Dot,
    /// `|`
    #[token("|")]
    Pipe,
    /// `->`
    #[token("->")]
    Arrow,
    /// `<-`
    #[token("<-")]
    LeftArrow,
    /// `?` (optional record keys)
    #[token("?")]
    Question,

    // === Brackets ===
    /// `(`
    #[token("(")]
    LParen,
    /// `)`
    #[token(")")]
    RParen,
    /// `[`
    #[token("[")]
    LSquare,
    /// `]`
    #[token("]")]
    RSquare,
    /// `{`
    #[token("{")]
    LCurly,
    /// `}`
    #[token("}")]
    RCurly,
    /// `<<`
    #[token("<<")]
    LDoubleAngle,
    /// `>>`
    #[token(">>")]
    RDoubleAngle,
}

impl Token {
    /// Keyword/identifier text where that makes sense, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) | Token::TypeName(name) => format!("'{name}'"),
            Token::Int(i) => format!("'{i}'"),
            Token::DecimalLit(text) => format!("'{text}'"),
            Token::Str(_) | Token::TranslatedStr(_) => "string literal".to_string(),
            other => format!("'{other:?}'"),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// A lexical failure: an unrecognized or unterminated character run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized characters at bytes {}..{}", span.start, span.end)]
pub struct LexError {
    pub span: Range<usize>,
}

/// Tokenize a whole formula, pairing each token with its byte span.
/// Fails on the first unrecognized character run.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, LexError> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(source).spanned() {
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => return Err(LexError { span }),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("where hp whereabouts"),
            vec![
                Token::Where,
                Token::Ident("hp".into()),
                Token::Ident("whereabouts".into()),
            ]
        );
    }

    #[test]
    fn capitalized_identifiers_are_type_names() {
        assert_eq!(
            kinds("T value"),
            vec![Token::TypeName("T".into()), Token::Ident("value".into())]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("42 0.5 .25 0xff"),
            vec![
                Token::Int(42),
                Token::DecimalLit("0.5".into()),
                Token::DecimalLit(".25".into()),
                Token::Int(255),
            ]
        );
    }

    #[test]
    fn decimal_text_is_preserved() {
        // trailing zeros in the source must reach the parser untouched
        assert_eq!(kinds("0.0005"), vec![Token::DecimalLit("0.0005".into())]);
    }

    #[test]
    fn dice_literal_and_operator_form() {
        assert_eq!(kinds("4d6"), vec![Token::DiceRoll((4, 6))]);
        // with space, `d` reaches the parser as an identifier operator
        assert_eq!(
            kinds("n d 6"),
            vec![Token::Ident("n".into()), Token::Ident("d".into()), Token::Int(6)]
        );
        // but `d6` alone is a normal identifier
        assert_eq!(kinds("d6"), vec![Token::Ident("d6".into())]);
    }

    #[test]
    fn strings() {
        assert_eq!(
            kinds("'abc'"),
            vec![Token::Str(StrLit {
                text: "abc".into(),
                translate: false
            })]
        );
        assert_eq!(
            kinds("q(a(b)c)"),
            vec![Token::Str(StrLit {
                text: "a(b)c".into(),
                translate: false
            })]
        );
        assert_eq!(
            kinds("~hello~"),
            vec![Token::TranslatedStr(StrLit {
                text: "hello".into(),
                translate: true
            })]
        );
    }

    #[test]
    fn interpolation_marker_is_kept_verbatim() {
        assert_eq!(
            kinds("'a ${x} b'"),
            vec![Token::Str(StrLit {
                text: "a ${x} b".into(),
                translate: false
            })]
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("-> <- :: << >> <= >= !="),
            vec![
                Token::Arrow,
                Token::LeftArrow,
                Token::ColonColon,
                Token::LDoubleAngle,
                Token::RDoubleAngle,
                Token::LtEq,
                Token::GtEq,
                Token::NotEq,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 # a comment\n+ 2 /* block */ + 3"),
            vec![
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::Plus,
                Token::Int(3),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("'abc").is_err());
    }

    #[test]
    fn unrecognized_characters_error_with_location() {
        let err = tokenize("1 + $").unwrap_err();
        assert_eq!(err.span.start, 4);
    }
}
