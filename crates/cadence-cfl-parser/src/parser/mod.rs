//! The expression parser.
//!
//! Operator-precedence parsing over the whole token array: each call
//! scans its token range for the loosest-binding operator at bracket
//! depth zero, splits there, and recurses into the sides. Splitting
//! (rather than climbing) lets binding forms parse their bindings
//! *before* the expression the bindings are visible in, which is what
//! makes slot resolution for `where`, guard chains, and `asserting`
//! narrowing work in one pass.
//!
//! Submodules: [`scan`] token-range scanning, [`expr`] the operator and
//! leaf grammar, [`types`] the type-expression grammar, [`fold`] the
//! static optimizer.

mod expr;
mod fold;
mod scan;
mod types;

use std::ops::Range;
use std::sync::Arc;

use cadence_cfl_ast::{
    Expr, ExprKind, FunctionBody, GuardedCase, Span, Type, Value,
};
use cadence_cfl_lexer::{tokenize, Token};

use crate::error::{PResult, ParseError};
use crate::options::{ParseOptions, StrictMode};
use crate::symbols::SymbolTable;

pub use types::parse_type_source;

pub(crate) type Tok = (Token, Range<usize>);

/// A parsed formula: guard chain (usually empty), main expression, and
/// the static result type.
#[derive(Debug, Clone)]
pub struct ParsedFormula {
    pub body: FunctionBody,
    pub ty: Type,
}

/// Parse one formula source into a typed, constant-reduced AST.
pub fn parse_formula(source: &str, opts: &ParseOptions) -> PResult<ParsedFormula> {
    let toks = tokenize(source).map_err(|e| {
        let line = line_of(source, e.span.start);
        ParseError::from_lex(e, opts.source_id, line)
    })?;
    if toks.is_empty() {
        // an empty formula evaluates to null
        let span = Span::zero(opts.source_id);
        return Ok(ParsedFormula {
            body: FunctionBody {
                guards: Vec::new(),
                main: Arc::new(Expr::literal(Value::Null, span)),
            },
            ty: Type::null(),
        });
    }

    let mut parser = Parser::new(source, &toks, opts);
    let body = if matches!(toks[0].0, Token::Base) {
        parser.parse_guard_chain(0, toks.len())?
    } else {
        let main = parser.parse_sequence(0, toks.len())?;
        FunctionBody {
            guards: Vec::new(),
            main: Arc::new(main),
        }
    };
    let ty = body.main.ty.clone();
    Ok(ParsedFormula { body, ty })
}

/// Parse a single expression; the test surface for grammar suites.
pub fn parse_expression(source: &str, opts: &ParseOptions) -> PResult<Expr> {
    let parsed = parse_formula(source, opts)?;
    if !parsed.body.guards.is_empty() {
        return Err(ParseError::invalid(
            "guard chains are only valid in function bodies",
            parsed.body.main.span,
        ));
    }
    Ok(Arc::try_unwrap(parsed.body.main).unwrap_or_else(|arc| (*arc).clone()))
}

fn line_of(source: &str, offset: usize) -> u16 {
    source[..offset.min(source.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count() as u16
        + 1
}

pub(crate) struct Parser<'a> {
    pub(crate) source: &'a str,
    pub(crate) toks: &'a [Tok],
    pub(crate) opts: &'a ParseOptions,
    pub(crate) symbols: SymbolTable,
    /// Generic type-parameter scopes opened by `def<<T>>`.
    pub(crate) generics: Vec<Vec<String>>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str, toks: &'a [Tok], opts: &'a ParseOptions) -> Self {
        Self {
            source,
            toks,
            opts,
            symbols: SymbolTable::from_layout(opts.layout.as_ref(), opts.host_slots),
            generics: Vec::new(),
        }
    }

    /// Span covering tokens `lo..hi`.
    pub(crate) fn span(&self, lo: usize, hi: usize) -> Span {
        let start = self.toks.get(lo).map(|(_, s)| s.start).unwrap_or(0);
        let end = self
            .toks
            .get(hi.saturating_sub(1))
            .map(|(_, s)| s.end)
            .unwrap_or(start);
        Span::new(
            self.opts.source_id,
            start as u32,
            end as u32,
            line_of(self.source, start),
        )
    }

    /// The source text of tokens `lo..hi`, for diagnostics.
    pub(crate) fn excerpt(&self, lo: usize, hi: usize) -> String {
        let span = self.span(lo, hi);
        self.source
            .get(span.start as usize..span.end as usize)
            .unwrap_or("")
            .trim()
            .to_string()
    }

    /// Raise a strict-mode finding per the configured policy.
    pub(crate) fn report(&self, message: String, span: Span) -> PResult<()> {
        match self.opts.strict {
            StrictMode::Off => Ok(()),
            StrictMode::Warn => {
                tracing::warn!(
                    line = span.start_line,
                    "static check: {message}"
                );
                Ok(())
            }
            StrictMode::Abort => Err(ParseError::static_type(message, span)),
        }
    }

    /// Parse a `;`-separated sequence. A segment of the form
    /// `def name(...) ...` or `let name = ...` binds one slot for the
    /// remainder; remaining value segments chain into a deferred command
    /// sequence.
    pub(crate) fn parse_sequence(&mut self, lo: usize, hi: usize) -> PResult<Expr> {
        let segments = self.split_on(lo, hi, |t| matches!(t, Token::Semicolon))?;
        self.parse_segments(&segments)
    }

    fn parse_segments(&mut self, segments: &[Range<usize>]) -> PResult<Expr> {
        let (seg, rest) = match segments.split_first() {
            Some(pair) => pair,
            None => {
                return Err(ParseError::eof(
                    "expected an expression after ';'",
                    self.span(self.toks.len(), self.toks.len()),
                ));
            }
        };
        // tolerate a trailing semicolon
        if seg.is_empty() && rest.is_empty() {
            return Err(ParseError::eof(
                "expected an expression",
                self.span(self.toks.len(), self.toks.len()),
            ));
        }

        if let Some((name, value)) = self.parse_binding_segment(seg.clone())? {
            if rest.is_empty() || (rest.len() == 1 && rest[0].is_empty()) {
                return Err(ParseError::invalid(
                    format!("'{name}' is defined but never used; a sequence must end in an expression"),
                    self.span(seg.start, seg.end),
                ));
            }
            let ty = value.ty.clone();
            self.symbols.push_frame([(name.clone(), ty)]);
            let body = self.parse_segments(rest);
            self.symbols.pop_frame();
            let body = body?;
            let span = value.span.merge(&body.span);
            let ty = body.ty.clone();
            return Ok(self.finish(Expr::new(
                ExprKind::Let {
                    name,
                    value: Box::new(value),
                    body: Box::new(body),
                },
                span,
                ty,
            )));
        }

        let first = self.parse_expr(seg.start, seg.end)?;
        if rest.is_empty() || (rest.len() == 1 && rest[0].is_empty()) {
            return Ok(first);
        }
        let second = self.parse_segments(rest)?;
        let span = first.span.merge(&second.span);
        Ok(self.finish(Expr::new(
            ExprKind::CommandSeq {
                first: Box::new(first),
                second: Box::new(second),
            },
            span,
            Type::commands(),
        )))
    }

    /// `def name(...) ...` or `let name = expr` at sequence level.
    fn parse_binding_segment(&mut self, seg: Range<usize>) -> PResult<Option<(String, Expr)>> {
        if seg.is_empty() {
            return Ok(None);
        }
        match &self.toks[seg.start].0 {
            Token::Def => {
                let name = match self.toks.get(seg.start + 1).map(|(t, _)| t) {
                    Some(Token::Ident(name)) => name.clone(),
                    // anonymous def: a value, not a binding
                    _ => return Ok(None),
                };
                let lambda = self.parse_lambda(seg.start, seg.end)?;
                Ok(Some((name, lambda)))
            }
            Token::Let => {
                let name = match self.toks.get(seg.start + 1).map(|(t, _)| t) {
                    Some(Token::Ident(name)) => name.clone(),
                    _ => {
                        return Err(ParseError::unexpected(
                            "expected a name after 'let'",
                            self.span(seg.start, seg.end),
                        ));
                    }
                };
                match self.toks.get(seg.start + 2).map(|(t, _)| t) {
                    Some(Token::Eq) => {}
                    _ => {
                        return Err(ParseError::unexpected(
                            format!("expected '=' after 'let {name}'"),
                            self.span(seg.start, seg.end),
                        ));
                    }
                }
                let value = self.parse_expr(seg.start + 3, seg.end)?;
                Ok(Some((name, value)))
            }
            Token::Functions => Err(ParseError::invalid(
                "function packages are registered by the host, not declared in formulas",
                self.span(seg.start, seg.start + 1),
            )),
            _ => Ok(None),
        }
    }

    /// Parse a `base <guard>: <expr> ... recursive: <expr>` chain, with
    /// an optional trailing `where` whose bindings are visible to every
    /// guard and case.
    pub(crate) fn parse_guard_chain(&mut self, lo: usize, hi: usize) -> PResult<FunctionBody> {
        // segment boundaries first, so a trailing where can be hoisted
        // over the whole chain before anything parses
        let mut cases: Vec<(Range<usize>, Range<usize>)> = Vec::new();
        let mut cur = lo;
        let recursive_range;
        loop {
            match self.toks.get(cur).map(|(t, _)| t) {
                Some(Token::Base) => {
                    let colon = self
                        .find_at_depth0(cur + 1, hi, |t| matches!(t, Token::Colon))
                        .ok_or_else(|| {
                            ParseError::invalid(
                                "expected ':' after the base guard",
                                self.span(cur, hi),
                            )
                        })?;
                    let end = self
                        .find_at_depth0(colon + 1, hi, |t| {
                            matches!(t, Token::Base | Token::Recursive)
                        })
                        .ok_or_else(|| {
                            ParseError::invalid(
                                "a guard chain must end in a 'recursive:' case",
                                self.span(cur, hi),
                            )
                        })?;
                    cases.push((cur + 1..colon, colon + 1..end));
                    cur = end;
                }
                Some(Token::Recursive) => {
                    match self.toks.get(cur + 1).map(|(t, _)| t) {
                        Some(Token::Colon) => {}
                        _ => {
                            return Err(ParseError::unexpected(
                                "expected ':' after 'recursive'",
                                self.span(cur, (cur + 2).min(hi)),
                            ));
                        }
                    }
                    recursive_range = cur + 2..hi;
                    break;
                }
                _ => {
                    return Err(ParseError::unexpected(
                        "expected 'base' or 'recursive'",
                        self.span(cur, (cur + 1).min(hi)),
                    ));
                }
            }
        }
        if recursive_range.is_empty() {
            return Err(ParseError::eof(
                "expected an expression after 'recursive:'",
                self.span(hi.saturating_sub(1), hi),
            ));
        }

        // a where after the recursive case scopes the entire chain
        let global_where =
            self.find_at_depth0(recursive_range.start, hi, |t| matches!(t, Token::Where));
        let (rec_end, where_bindings) = match global_where {
            Some(w) => (w, Some(self.parse_where_groups(w, hi)?)),
            None => (hi, None),
        };

        fn wrap(bindings: &Option<Vec<cadence_cfl_ast::WhereBinding>>, expr: Expr) -> Arc<Expr> {
            match bindings {
                Some(bindings) => {
                    let span = expr.span;
                    let ty = expr.ty.clone();
                    Arc::new(Expr::new(
                        ExprKind::Where {
                            bindings: bindings.clone(),
                            body: Box::new(expr),
                        },
                        span,
                        ty,
                    ))
                }
                None => Arc::new(expr),
            }
        }

        let mut guards = Vec::new();
        for (guard_range, body_range) in &cases {
            let guard = self.parse_expr(guard_range.start, guard_range.end)?;
            let body = self.parse_expr(body_range.start, body_range.end)?;
            guards.push(GuardedCase {
                guard: wrap(&where_bindings, guard),
                body: wrap(&where_bindings, body),
            });
        }
        let main = self.parse_expr(recursive_range.start, rec_end)?;
        let main = wrap(&where_bindings, main);
        if where_bindings.is_some() {
            self.symbols.pop_frame();
        }
        Ok(FunctionBody { guards, main })
    }
}
