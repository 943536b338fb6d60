//! Operator and leaf grammar.
//!
//! `parse_expr` asks the scanner for the loosest operator in its range
//! and dispatches here. Binding forms (`where`, lambdas, comprehensions,
//! the loop primitives) parse their bindings first and push the matching
//! symbol frame before the governed expression parses, so identifiers
//! resolve to slots in the same pass. `and`/`or`/`asserting`/`if` apply
//! flow narrowing to the symbol table around the branch that benefits.

use std::ops::Range;
use std::sync::Arc;

use cadence_cfl_ast::{
    AssertGuard, BinaryOp, CallTarget, CompClause, Decimal, Expr, ExprKind, FunctionBody,
    FunctionValue, LogicOp, Param, Span, Type, TypeKind, UnaryOp, Value, WhereBinding,
};
use cadence_cfl_lexer::{tokenize, StrLit, Token};

use super::scan::{Split, SplitOp};
use super::Parser;
use crate::error::{PResult, ParseError};
use crate::suggest::closest_match;
use crate::symbols::{Resolution, SymbolTable};

impl<'a> Parser<'a> {
    pub(crate) fn parse_expr(&mut self, lo: usize, hi: usize) -> PResult<Expr> {
        if lo >= hi {
            return Err(ParseError::eof(
                "expected an expression",
                self.span(lo.min(self.toks.len()), hi.min(self.toks.len())),
            ));
        }
        let split = self.find_split(lo, hi)?;
        // `;` splits before anything, then a leading `def` swallows the
        // rest of its segment as the lambda body
        let expr = if matches!(
            split,
            Some(Split {
                op: SplitOp::Sequence,
                ..
            })
        ) {
            self.parse_sequence(lo, hi)?
        } else if matches!(self.toks[lo].0, Token::Def) {
            self.parse_lambda(lo, hi)?
        } else if let Some(split) = split {
            self.parse_operator(lo, hi, split)?
        } else {
            self.parse_leaf(lo, hi)?
        };
        Ok(self.finish(expr))
    }

    fn parse_operator(&mut self, lo: usize, hi: usize, split: Split) -> PResult<Expr> {
        let pos = split.pos;
        let span = self.span(lo, hi);
        match split.op {
            SplitOp::Sequence => self.parse_sequence(lo, hi),

            SplitOp::Where => {
                let first = self
                    .find_at_depth0(lo, hi, |t| matches!(t, Token::Where))
                    .expect("split saw a where");
                if first == lo {
                    return Err(ParseError::unexpected(
                        "expected an expression before 'where'",
                        self.span(lo, lo + 1),
                    ));
                }
                let bindings = self.parse_where_groups(first, hi)?;
                let body = self.parse_expr(lo, first);
                self.symbols.pop_frame();
                let body = body?;
                let ty = body.ty.clone();
                Ok(Expr::new(
                    ExprKind::Where {
                        bindings,
                        body: Box::new(body),
                    },
                    span,
                    ty,
                ))
            }

            SplitOp::Asserting => {
                let pipe = self.find_at_depth0(pos + 1, hi, |t| matches!(t, Token::Pipe));
                let conds_end = pipe.unwrap_or(hi);
                // the debug message expression is validated, and its
                // source text joins the failure message
                let debug_text = match pipe {
                    Some(p) => {
                        self.parse_expr(p + 1, hi)?;
                        Some(self.excerpt(p + 1, hi))
                    }
                    None => None,
                };
                let mut guards = Vec::new();
                let mut narrowed = Vec::new();
                for range in self.split_on(pos + 1, conds_end, |t| matches!(t, Token::Comma))? {
                    if range.is_empty() {
                        return Err(ParseError::invalid(
                            "empty assertion condition",
                            self.span(pos, conds_end),
                        ));
                    }
                    let cond = self.parse_expr(range.start, range.end)?;
                    let mut text = self.excerpt(range.start, range.end);
                    if let Some(debug) = &debug_text {
                        text.push_str(" | ");
                        text.push_str(debug);
                    }
                    self.narrowings(&cond, true, &mut narrowed);
                    guards.push(AssertGuard { cond, text });
                }
                if guards.is_empty() {
                    return Err(ParseError::invalid(
                        "'asserting' needs at least one condition",
                        span,
                    ));
                }
                let saved = self.apply_narrowings(&narrowed);
                let body = self.parse_expr(lo, pos);
                self.symbols.restore(saved);
                let body = body?;
                let ty = body.ty.clone();
                Ok(Expr::new(
                    ExprKind::Assert {
                        body: Box::new(body),
                        guards,
                    },
                    span,
                    ty,
                ))
            }

            SplitOp::Cast { narrowing } => {
                let target = self.parse_type_range(lo, pos)?;
                let expr = self.parse_expr(pos + 1, hi)?;
                let compatible = self.with_resolver(|r| {
                    target.is_compatible_with(&expr.ty, r)
                        || expr.ty.is_compatible_with(&target, r)
                });
                if !expr.ty.is_any() && !compatible {
                    self.report(
                        format!("a {} can never be a {}", expr.ty, target),
                        span,
                    )?;
                }
                Ok(Expr::new(
                    ExprKind::Cast {
                        expr: Box::new(expr),
                        target: target.clone(),
                        narrowing,
                    },
                    span,
                    target,
                ))
            }

            SplitOp::Or | SplitOp::And => {
                let op = if matches!(split.op, SplitOp::And) {
                    LogicOp::And
                } else {
                    LogicOp::Or
                };
                let left = self.parse_expr(lo, pos)?;
                // the right branch knows the left's outcome
                let mut narrowed = Vec::new();
                self.narrowings(&left, op == LogicOp::And, &mut narrowed);
                let saved = self.apply_narrowings(&narrowed);
                let right = self.parse_expr(pos + 1, hi);
                self.symbols.restore(saved);
                let right = right?;
                let ty = self.with_resolver(|r| {
                    Type::union_of(vec![left.ty.clone(), right.ty.clone()], r)
                });
                Ok(Expr::new(
                    ExprKind::AndOr {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                    ty,
                ))
            }

            SplitOp::Not => {
                if pos != lo {
                    return Err(ParseError::unexpected(
                        "'not' is a prefix operator",
                        self.span(pos, pos + 1),
                    ));
                }
                let operand = self.parse_expr(lo + 1, hi)?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                    Type::bool(),
                ))
            }

            SplitOp::Is { negated } => {
                let expr = self.parse_expr(lo, pos)?;
                let type_start = pos + 1 + usize::from(negated);
                let test = self.parse_type_range(type_start, hi)?;
                Ok(Expr::new(
                    ExprKind::IsType {
                        expr: Box::new(expr),
                        test,
                        negated,
                    },
                    span,
                    Type::bool(),
                ))
            }

            SplitOp::Binary(op) => {
                let left = self.parse_expr(lo, pos - split.back)?;
                let right = self.parse_expr(pos + 1, hi)?;
                self.check_operands(op, &left, &right, span)?;
                let ty = self.binary_result_type(op, &left.ty, &right.ty);
                Ok(Expr::new(
                    ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                    ty,
                ))
            }

            SplitOp::Instantiate => {
                let close = self.matching_close(pos, hi)?;
                if close != hi - 1 {
                    return Err(ParseError::unexpected(
                        "unexpected tokens after '>>'",
                        self.span(close + 1, hi),
                    ));
                }
                let target = self.parse_expr(lo, pos)?;
                let mut type_args = Vec::new();
                for range in self.split_on(pos + 1, close, |t| matches!(t, Token::Comma))? {
                    type_args.push(self.parse_type_range(range.start, range.end)?);
                }
                let ty = self.instantiated_type(&target, &type_args);
                Ok(Expr::new(
                    ExprKind::GenericInstantiation {
                        target: Box::new(target),
                        type_args,
                    },
                    span,
                    ty,
                ))
            }

            SplitOp::Index => {
                let close = self.matching_close(pos, hi)?;
                if close != hi - 1 {
                    return Err(ParseError::unexpected(
                        "unexpected tokens after ']'",
                        self.span(close + 1, hi),
                    ));
                }
                let object = self.parse_expr(lo, pos)?;
                match self.find_at_depth0(pos + 1, close, |t| matches!(t, Token::Colon)) {
                    Some(colon) => {
                        let begin = if colon > pos + 1 {
                            Some(Box::new(self.parse_expr(pos + 1, colon)?))
                        } else {
                            None
                        };
                        let end = if close > colon + 1 {
                            Some(Box::new(self.parse_expr(colon + 1, close)?))
                        } else {
                            None
                        };
                        let ty = object.ty.clone();
                        Ok(Expr::new(
                            ExprKind::Slice {
                                object: Box::new(object),
                                begin,
                                end,
                            },
                            span,
                            ty,
                        ))
                    }
                    None => {
                        let index = self.parse_expr(pos + 1, close)?;
                        let ty = self.index_result_type(&object.ty);
                        Ok(Expr::new(
                            ExprKind::Index {
                                object: Box::new(object),
                                index: Box::new(index),
                            },
                            span,
                            ty,
                        ))
                    }
                }
            }

            SplitOp::Call => self.parse_call(lo, hi, pos),

            SplitOp::Dot => {
                let object = self.parse_expr(lo, pos)?;
                let field = match self.toks.get(pos + 1).map(|(t, _)| t) {
                    Some(Token::Ident(name)) if pos + 2 == hi => name.clone(),
                    _ => {
                        return Err(ParseError::unexpected(
                            "expected a member name after '.'",
                            self.span(pos, hi),
                        ));
                    }
                };
                let ty = object.ty.member_type(&field).unwrap_or_else(Type::any);
                if let TypeKind::SpecificMap { .. } | TypeKind::Interface(_) = object.ty.kind() {
                    if object.ty.member_type(&field).is_none() {
                        self.report(
                            format!("{} has no member '{field}'", object.ty),
                            span,
                        )?;
                    }
                }
                Ok(Expr::new(
                    ExprKind::Dot {
                        object: Box::new(object),
                        field,
                    },
                    span,
                    ty,
                ))
            }
        }
    }

    /// Parse every chained `where` group from `first` to `hi` into one
    /// merged binding frame, which is left pushed for the caller to
    /// parse the governed expression in.
    pub(crate) fn parse_where_groups(
        &mut self,
        first: usize,
        hi: usize,
    ) -> PResult<Vec<WhereBinding>> {
        let positions = self.collect_at_depth0(first, hi, |t| matches!(t, Token::Where));
        let mut pieces: Vec<(String, Range<usize>)> = Vec::new();
        for (group_idx, group_start) in positions.iter().enumerate() {
            let group_end = positions
                .get(group_idx + 1)
                .copied()
                .unwrap_or(hi);
            for range in
                self.split_on(group_start + 1, group_end, |t| matches!(t, Token::Comma))?
            {
                let name = match self.toks.get(range.start).map(|(t, _)| t) {
                    Some(Token::Ident(name)) if !range.is_empty() => name.clone(),
                    _ => {
                        return Err(ParseError::invalid(
                            "expected 'name = expression' in where clause",
                            self.span(range.start.min(hi), range.end.min(hi)),
                        ));
                    }
                };
                if !matches!(
                    self.toks.get(range.start + 1).map(|(t, _)| t),
                    Some(Token::Eq)
                ) || range.len() < 3
                {
                    return Err(ParseError::invalid(
                        format!("expected '=' after where binding '{name}'"),
                        self.span(range.start, range.end),
                    ));
                }
                if pieces.iter().any(|(n, _)| *n == name) {
                    return Err(ParseError::invalid(
                        format!("duplicate where binding '{name}'"),
                        self.span(range.start, range.start + 1),
                    ));
                }
                pieces.push((name, range.start + 2..range.end));
            }
        }

        self.symbols.push_frame(
            pieces
                .iter()
                .map(|(name, _)| (name.clone(), Type::any())),
        );
        let mut bindings = Vec::with_capacity(pieces.len());
        for (name, range) in pieces {
            let expr = match self.parse_expr(range.start, range.end) {
                Ok(expr) => expr,
                Err(err) => {
                    self.symbols.pop_frame();
                    return Err(err);
                }
            };
            self.symbols.set_type(&name, expr.ty.clone());
            bindings.push(WhereBinding {
                name,
                expr: Arc::new(expr),
            });
        }
        Ok(bindings)
    }

    fn parse_call(&mut self, lo: usize, hi: usize, open: usize) -> PResult<Expr> {
        let close = self.matching_close(open, hi)?;
        if close != hi - 1 {
            return Err(ParseError::unexpected(
                "unexpected tokens after ')'",
                self.span(close + 1, hi),
            ));
        }
        let span = self.span(lo, hi);
        let mut arg_ranges: Vec<Range<usize>> =
            self.split_on(open + 1, close, |t| matches!(t, Token::Comma))?;
        if arg_ranges.len() == 1 && arg_ranges[0].is_empty() {
            arg_ranges.clear();
        }

        // special language forms, unless the name is shadowed
        if open == lo + 1 {
            if let Token::Ident(name) = &self.toks[lo].0 {
                let name = name.clone();
                if !self.symbols_shadow(&name) {
                    match name.as_str() {
                        "if" => return self.parse_if(span, &arg_ranges),
                        "map" | "filter" | "find" => {
                            return self.parse_loop(span, &name, &arg_ranges);
                        }
                        _ => {}
                    }
                }
                return self.parse_named_call(span, lo, &name, &arg_ranges);
            }
        }

        let target = self.parse_expr(lo, open)?;
        let args = self.parse_args(&arg_ranges)?;
        let ty = match target.ty.kind() {
            TypeKind::Function { ret, .. } => ret.clone(),
            _ => Type::any(),
        };
        Ok(Expr::new(
            ExprKind::Call {
                target: CallTarget::Dynamic(Box::new(target)),
                args,
            },
            span,
            ty,
        ))
    }

    fn parse_named_call(
        &mut self,
        span: Span,
        lo: usize,
        name: &str,
        arg_ranges: &[Range<usize>],
    ) -> PResult<Expr> {
        match self.symbols.resolve(name) {
            Resolution::Slot(slot, ty) => {
                let args = self.parse_args(arg_ranges)?;
                self.check_function_value_call(name, &ty, &args, span)?;
                let ret = match ty.kind() {
                    TypeKind::Function { ret, .. } => ret.clone(),
                    _ => Type::any(),
                };
                let target = Expr::new(
                    ExprKind::Identifier {
                        name: name.to_string(),
                        slot: Some(slot),
                    },
                    self.span(lo, lo + 1),
                    ty,
                );
                Ok(Expr::new(
                    ExprKind::Call {
                        target: CallTarget::Dynamic(Box::new(target)),
                        args,
                    },
                    span,
                    ret,
                ))
            }
            Resolution::Dynamic(ty) => {
                let args = self.parse_args(arg_ranges)?;
                let ret = match ty.kind() {
                    TypeKind::Function { ret, .. } => ret.clone(),
                    _ => Type::any(),
                };
                let target = Expr::new(
                    ExprKind::Identifier {
                        name: name.to_string(),
                        slot: None,
                    },
                    self.span(lo, lo + 1),
                    ty,
                );
                Ok(Expr::new(
                    ExprKind::Call {
                        target: CallTarget::Dynamic(Box::new(target)),
                        args,
                    },
                    span,
                    ret,
                ))
            }
            Resolution::Unknown => {
                if let Some(builtin) = self.opts.functions.get(name).cloned() {
                    let sig = builtin.signature();
                    if arg_ranges.len() < sig.min_args
                        || (!sig.variadic && arg_ranges.len() > sig.args.len())
                    {
                        return Err(ParseError::invalid(
                            format!(
                                "{name}() takes {} argument(s), got {}",
                                sig.min_args,
                                arg_ranges.len()
                            ),
                            span,
                        ));
                    }
                    let args = self.parse_args(arg_ranges)?;
                    let ret = self.builtin_return_type(name, &sig, &args, span)?;
                    return Ok(Expr::new(
                        ExprKind::Call {
                            target: CallTarget::Builtin(builtin),
                            args,
                        },
                        span,
                        ret,
                    ));
                }
                let mut message = format!("unknown function '{name}'");
                let builtins: Vec<&str> = self.opts.functions.names().collect();
                if let Some(suggestion) = closest_match(name, builtins.iter().copied()) {
                    message.push_str(&format!("; did you mean '{suggestion}'?"));
                }
                self.report(message, span)?;
                let args = self.parse_args(arg_ranges)?;
                let target = Expr::new(
                    ExprKind::Identifier {
                        name: name.to_string(),
                        slot: None,
                    },
                    self.span(lo, lo + 1),
                    Type::any(),
                );
                Ok(Expr::new(
                    ExprKind::Call {
                        target: CallTarget::Dynamic(Box::new(target)),
                        args,
                    },
                    span,
                    Type::any(),
                ))
            }
        }
    }

    fn parse_args(&mut self, ranges: &[Range<usize>]) -> PResult<Vec<Expr>> {
        let mut args = Vec::with_capacity(ranges.len());
        for range in ranges {
            args.push(self.parse_expr(range.start, range.end)?);
        }
        Ok(args)
    }

    /// `if(cond, then[, else])` with branch narrowing.
    fn parse_if(&mut self, span: Span, arg_ranges: &[Range<usize>]) -> PResult<Expr> {
        if !(2..=3).contains(&arg_ranges.len()) {
            return Err(ParseError::invalid(
                format!("if() takes 2 or 3 arguments, got {}", arg_ranges.len()),
                span,
            ));
        }
        let cond = self.parse_expr(arg_ranges[0].start, arg_ranges[0].end)?;

        let mut narrowed = Vec::new();
        self.narrowings(&cond, true, &mut narrowed);
        let saved = self.apply_narrowings(&narrowed);
        let then = self.parse_expr(arg_ranges[1].start, arg_ranges[1].end);
        self.symbols.restore(saved);
        let then = then?;

        let otherwise = match arg_ranges.get(2) {
            Some(range) => {
                let mut narrowed = Vec::new();
                self.narrowings(&cond, false, &mut narrowed);
                let saved = self.apply_narrowings(&narrowed);
                let result = self.parse_expr(range.start, range.end);
                self.symbols.restore(saved);
                result?
            }
            None => Expr::literal(Value::Null, span),
        };
        let ty = self.with_resolver(|r| {
            Type::union_of(vec![then.ty.clone(), otherwise.ty.clone()], r)
        });
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
            ty,
        ))
    }

    /// `map(seq, body)`, `filter(seq, name, body)`, `find(seq, body)` —
    /// the vectorized loop primitives. The body parses inside a frame
    /// laid out like the runtime iteration scope: element, index, key.
    fn parse_loop(
        &mut self,
        span: Span,
        name: &str,
        arg_ranges: &[Range<usize>],
    ) -> PResult<Expr> {
        if !(2..=3).contains(&arg_ranges.len()) {
            return Err(ParseError::invalid(
                format!("{name}() takes 2 or 3 arguments, got {}", arg_ranges.len()),
                span,
            ));
        }
        let seq = self.parse_expr(arg_ranges[0].start, arg_ranges[0].end)?;
        let binding = if arg_ranges.len() == 3 {
            let range = &arg_ranges[1];
            match self.toks.get(range.start).map(|(t, _)| t) {
                Some(Token::Ident(n)) if range.len() == 1 => n.clone(),
                Some(Token::Str(s)) if range.len() == 1 => s.text.clone(),
                _ => {
                    return Err(ParseError::invalid(
                        format!("{name}()'s second argument must be a binding name"),
                        self.span(range.start, range.end),
                    ));
                }
            }
        } else {
            "value".to_string()
        };
        let (elem_ty, key_ty) = self.element_types(&seq.ty);

        self.symbols.push_frame([
            (binding.clone(), elem_ty.clone()),
            ("index".to_string(), Type::int()),
            ("key".to_string(), key_ty),
        ]);
        let body_range = arg_ranges.last().expect("arity checked");
        let body = self.parse_expr(body_range.start, body_range.end);
        self.symbols.pop_frame();
        let body = body?;

        let (kind, ty) = match name {
            "map" => {
                let ty = Type::list(body.ty.clone());
                (
                    ExprKind::MapOp {
                        seq: Box::new(seq),
                        binding,
                        body: Box::new(body),
                    },
                    ty,
                )
            }
            "filter" => {
                let ty = seq.ty.clone();
                (
                    ExprKind::FilterOp {
                        seq: Box::new(seq),
                        binding,
                        body: Box::new(body),
                    },
                    ty,
                )
            }
            _ => {
                let ty = self.with_resolver(|r| {
                    Type::union_of(vec![elem_ty, Type::null()], r)
                });
                (
                    ExprKind::FindOp {
                        seq: Box::new(seq),
                        binding,
                        body: Box::new(body),
                    },
                    ty,
                )
            }
        };
        Ok(Expr::new(kind, span, ty))
    }

    fn parse_leaf(&mut self, lo: usize, hi: usize) -> PResult<Expr> {
        let span = self.span(lo, hi);
        if hi - lo == 1 {
            return self.parse_atom(lo);
        }
        match &self.toks[lo].0 {
            Token::Minus => {
                let operand = self.parse_expr(lo + 1, hi)?;
                let ty = if operand.ty.is_numeric() {
                    operand.ty.clone()
                } else {
                    Type::any()
                };
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                    span,
                    ty,
                ))
            }
            Token::Not => {
                let operand = self.parse_expr(lo + 1, hi)?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                    Type::bool(),
                ))
            }
            Token::LParen => {
                let close = self.matching_close(lo, hi)?;
                if close != hi - 1 {
                    return Err(ParseError::unexpected(
                        "unexpected tokens after ')'",
                        self.span(close + 1, hi),
                    ));
                }
                self.parse_expr(lo + 1, close)
            }
            Token::LSquare => self.parse_list(lo, hi),
            Token::LCurly => self.parse_map(lo, hi),
            Token::Def => self.parse_lambda(lo, hi),
            // `enum north` — enum values are interned strings at runtime
            Token::Enum if hi == lo + 2 => match &self.toks[lo + 1].0 {
                Token::Ident(name) => Ok(Expr::literal(Value::string(name), span)),
                other => Err(ParseError::unexpected(
                    format!("expected an enum value, found {other}"),
                    self.span(lo + 1, hi),
                )),
            },
            Token::Functions => Err(ParseError::invalid(
                "function packages are registered by the host, not declared in formulas",
                self.span(lo, lo + 1),
            )),
            other => Err(ParseError::unexpected(
                format!("unexpected {other}"),
                self.span(lo, lo + 1),
            )),
        }
    }

    fn parse_atom(&mut self, at: usize) -> PResult<Expr> {
        let span = self.span(at, at + 1);
        match &self.toks[at].0 {
            Token::Int(i) => Ok(Expr::literal(Value::Int(*i), span)),
            Token::DecimalLit(text) => match Decimal::parse(text) {
                Some(d) => Ok(Expr::literal(Value::Decimal(d), span)),
                None => Err(ParseError::invalid(
                    format!("malformed decimal literal '{text}'"),
                    span,
                )),
            },
            Token::DiceRoll((rolls, sides)) => Ok(Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Dice,
                    left: Box::new(Expr::literal(Value::Int(*rolls), span)),
                    right: Box::new(Expr::literal(Value::Int(*sides), span)),
                },
                span,
                Type::int(),
            )),
            Token::Str(lit) => self.parse_string(lit.clone(), span),
            Token::TranslatedStr(lit) => {
                let mut lit = lit.clone();
                if let Some(translate) = self.opts.translate {
                    lit.text = translate(&lit.text);
                }
                self.parse_string(lit, span)
            }
            Token::True => Ok(Expr::literal(Value::Bool(true), span)),
            Token::False => Ok(Expr::literal(Value::Bool(false), span)),
            Token::Null => Ok(Expr::literal(Value::Null, span)),
            Token::Ident(name) => {
                let name = name.clone();
                self.identifier(&name, span)
            }
            Token::TypeName(name) => Err(ParseError::unexpected(
                format!("type name '{name}' in expression position"),
                span,
            )),
            other => Err(ParseError::unexpected(format!("unexpected {other}"), span)),
        }
    }

    fn identifier(&mut self, name: &str, span: Span) -> PResult<Expr> {
        match self.symbols.resolve(name) {
            Resolution::Slot(slot, ty) => Ok(Expr::new(
                ExprKind::Identifier {
                    name: name.to_string(),
                    slot: Some(slot),
                },
                span,
                ty,
            )),
            Resolution::Dynamic(ty) => Ok(Expr::new(
                ExprKind::Identifier {
                    name: name.to_string(),
                    slot: None,
                },
                span,
                ty,
            )),
            Resolution::Unknown => {
                if self.symbols.has_host_frame() {
                    let mut message = format!("unknown identifier '{name}'");
                    let known = self.symbols.visible_names();
                    if let Some(suggestion) =
                        closest_match(name, known.iter().map(String::as_str))
                    {
                        message.push_str(&format!("; did you mean '{suggestion}'?"));
                    }
                    self.report(message, span)?;
                }
                Ok(Expr::new(
                    ExprKind::Identifier {
                        name: name.to_string(),
                        slot: None,
                    },
                    span,
                    Type::any(),
                ))
            }
        }
    }

    /// `[a, b, c]` list literal or `[expr | x <- seq, cond, ...]`
    /// comprehension.
    fn parse_list(&mut self, lo: usize, hi: usize) -> PResult<Expr> {
        let close = self.matching_close(lo, hi)?;
        if close != hi - 1 {
            return Err(ParseError::unexpected(
                "unexpected tokens after ']'",
                self.span(close + 1, hi),
            ));
        }
        let span = self.span(lo, hi);
        if let Some(pipe) = self.find_at_depth0(lo + 1, close, |t| matches!(t, Token::Pipe)) {
            return self.parse_comprehension(lo, close, pipe, span);
        }
        let mut items = Vec::new();
        for range in self.split_on(lo + 1, close, |t| matches!(t, Token::Comma))? {
            if range.is_empty() && items.is_empty() {
                continue; // `[]`
            }
            items.push(self.parse_expr(range.start, range.end)?);
        }
        let elem = if items.is_empty() {
            Type::any()
        } else {
            self.with_resolver(|r| {
                Type::union_of(items.iter().map(|i| i.ty.clone()).collect(), r)
            })
        };
        Ok(Expr::new(ExprKind::ListLit(items), span, Type::list(elem)))
    }

    /// `[yield | name <- seq, filter, name2 <- seq2, ...]`. All
    /// generator names live in one frame; filters narrow what later
    /// clauses and the yield see.
    fn parse_comprehension(
        &mut self,
        lo: usize,
        close: usize,
        pipe: usize,
        span: Span,
    ) -> PResult<Expr> {
        let clause_ranges = self.split_on(pipe + 1, close, |t| matches!(t, Token::Comma))?;
        // generator names first, so every clause parses in the frame
        let mut binding_names = Vec::new();
        let mut shapes = Vec::new();
        for range in &clause_ranges {
            let is_gen = matches!(
                (
                    self.toks.get(range.start).map(|(t, _)| t),
                    self.toks.get(range.start + 1).map(|(t, _)| t),
                ),
                (Some(Token::Ident(_)), Some(Token::LeftArrow))
            ) && range.len() >= 3;
            if is_gen {
                if let Token::Ident(name) = &self.toks[range.start].0 {
                    binding_names.push(name.clone());
                }
            }
            shapes.push(is_gen);
        }
        if binding_names.is_empty() {
            return Err(ParseError::invalid(
                "a comprehension needs at least one 'name <- list' generator",
                span,
            ));
        }

        self.symbols.push_frame(
            binding_names
                .iter()
                .map(|name| (name.clone(), Type::any())),
        );
        let result = (|| {
            let mut clauses = Vec::new();
            for (range, is_gen) in clause_ranges.iter().zip(&shapes) {
                if *is_gen {
                    let name = match &self.toks[range.start].0 {
                        Token::Ident(name) => name.clone(),
                        _ => unreachable!("shape checked"),
                    };
                    let seq = self.parse_expr(range.start + 2, range.end)?;
                    let (elem, _) = self.element_types(&seq.ty);
                    self.symbols.set_type(&name, elem);
                    clauses.push(CompClause::Generator { name, seq });
                } else {
                    let cond = self.parse_expr(range.start, range.end)?;
                    let mut narrowed = Vec::new();
                    self.narrowings(&cond, true, &mut narrowed);
                    for (name, ty) in narrowed {
                        self.symbols.set_type(&name, ty);
                    }
                    clauses.push(CompClause::Filter(cond));
                }
            }
            let yield_expr = self.parse_expr(lo + 1, pipe)?;
            Ok((clauses, yield_expr))
        })();
        self.symbols.pop_frame();
        let (clauses, yield_expr) = result?;

        let ty = Type::list(yield_expr.ty.clone());
        Ok(Expr::new(
            ExprKind::Comprehension {
                yield_expr: Box::new(yield_expr),
                clauses,
                binding_names,
            },
            span,
            ty,
        ))
    }

    /// `{k: v, ...}` (or the older `{k -> v}` spelling) map literal.
    fn parse_map(&mut self, lo: usize, hi: usize) -> PResult<Expr> {
        let close = self.matching_close(lo, hi)?;
        if close != hi - 1 {
            return Err(ParseError::unexpected(
                "unexpected tokens after '}'",
                self.span(close + 1, hi),
            ));
        }
        let span = self.span(lo, hi);
        let mut pairs = Vec::new();
        for range in self.split_on(lo + 1, close, |t| matches!(t, Token::Comma))? {
            if range.is_empty() && pairs.is_empty() {
                continue; // `{}`
            }
            let sep = self
                .find_at_depth0(range.start, range.end, |t| {
                    matches!(t, Token::Colon | Token::Arrow)
                })
                .ok_or_else(|| {
                    ParseError::invalid(
                        "expected 'key: value' in map literal",
                        self.span(range.start, range.end),
                    )
                })?;
            let key = self.parse_expr(range.start, sep)?;
            let value = self.parse_expr(sep + 1, range.end)?;
            pairs.push((key, value));
        }
        let ty = self.map_literal_type(&pairs);
        Ok(Expr::new(ExprKind::MapLit(pairs), span, ty))
    }

    /// `'text with ${expressions}'`.
    fn parse_string(&mut self, lit: StrLit, span: Span) -> PResult<Expr> {
        if !lit.text.contains("${") {
            return Ok(Expr::literal(Value::string(&lit.text), span));
        }
        let mut pieces = Vec::new();
        let mut rest = lit.text.as_str();
        while let Some(start) = rest.find("${") {
            if !rest[..start].is_empty() {
                pieces.push(Expr::literal(Value::string(&rest[..start]), span));
            }
            let after = &rest[start + 2..];
            let mut depth = 1usize;
            let mut end = None;
            for (i, c) in after.char_indices() {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| {
                ParseError::invalid("unterminated '${' in string", span)
            })?;
            let mut piece = self.parse_snippet(&after[..end], span)?;
            piece.span = span;
            pieces.push(piece);
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            pieces.push(Expr::literal(Value::string(rest), span));
        }
        Ok(Expr::new(
            ExprKind::Interpolate(pieces),
            span,
            Type::string(),
        ))
    }

    /// Re-enter the parser on embedded source (string interpolation),
    /// sharing the symbol table so slots resolve identically.
    fn parse_snippet(&mut self, text: &str, span: Span) -> PResult<Expr> {
        let toks = tokenize(text)
            .map_err(|e| ParseError::from_lex(e, self.opts.source_id, span.start_line))?;
        if toks.is_empty() {
            return Err(ParseError::invalid("empty '${}' in string", span));
        }
        let mut sub = Parser {
            source: text,
            toks: &toks,
            opts: self.opts,
            symbols: std::mem::take(&mut self.symbols),
            generics: std::mem::take(&mut self.generics),
        };
        let result = sub.parse_expr(0, toks.len());
        self.symbols = sub.symbols;
        self.generics = sub.generics;
        result
    }

    /// `def [name] [<<T,...>>] (params) [-> type] body`.
    pub(crate) fn parse_lambda(&mut self, lo: usize, hi: usize) -> PResult<Expr> {
        let span = self.span(lo, hi);
        let mut pos = lo + 1;
        let name = match self.toks.get(pos).map(|(t, _)| t) {
            Some(Token::Ident(name)) => {
                pos += 1;
                Some(name.clone())
            }
            _ => None,
        };

        let mut type_params = Vec::new();
        if matches!(self.toks.get(pos).map(|(t, _)| t), Some(Token::LDoubleAngle)) {
            let close = self.matching_close(pos, hi)?;
            for range in self.split_on(pos + 1, close, |t| matches!(t, Token::Comma))? {
                match self.toks.get(range.start).map(|(t, _)| t) {
                    Some(Token::TypeName(n)) if range.len() == 1 => type_params.push(n.clone()),
                    _ => {
                        return Err(ParseError::invalid(
                            "expected a capitalized type parameter",
                            self.span(range.start, range.end.max(range.start + 1)),
                        ));
                    }
                }
            }
            pos = close + 1;
        }
        self.generics.push(type_params.clone());
        let result = self.parse_lambda_inner(lo, hi, pos, name, type_params, span);
        self.generics.pop();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_lambda_inner(
        &mut self,
        _lo: usize,
        hi: usize,
        mut pos: usize,
        name: Option<String>,
        type_params: Vec<String>,
        span: Span,
    ) -> PResult<Expr> {
        if !matches!(self.toks.get(pos).map(|(t, _)| t), Some(Token::LParen)) {
            return Err(ParseError::unexpected(
                "expected '(' after 'def'",
                self.span(pos.min(hi), (pos + 1).min(hi)),
            ));
        }
        let close = self.matching_close(pos, hi)?;
        let mut params: Vec<Param> = Vec::new();
        for range in self.split_on(pos + 1, close, |t| matches!(t, Token::Comma))? {
            if range.is_empty() && params.is_empty() {
                continue; // `def()`
            }
            params.push(self.parse_param(range, params.last())?);
        }
        pos = close + 1;

        let declared_ret = if matches!(self.toks.get(pos).map(|(t, _)| t), Some(Token::Arrow)) {
            pos += 1;
            Some(self.parse_type_union(&mut pos, hi)?)
        } else {
            None
        };
        if pos >= hi {
            return Err(ParseError::eof("a function needs a body", span));
        }

        let self_name = name.clone().unwrap_or_else(|| "recurse".to_string());
        let provisional = Type::function(
            params.iter().map(|p| p.ty.clone()).collect(),
            declared_ret.clone().unwrap_or_else(Type::any),
            params.iter().filter(|p| p.default.is_none()).count(),
        );
        self.symbols.push_boundary(
            params.iter().map(|p| (p.name.clone(), p.ty.clone())),
            self_name,
            provisional,
        );

        let body = if matches!(self.toks.get(pos).map(|(t, _)| t), Some(Token::Base)) {
            self.parse_guard_chain(pos, hi)
        } else {
            self.parse_expr(pos, hi).map(|main| FunctionBody {
                guards: Vec::new(),
                main: Arc::new(main),
            })
        };
        let frame = self.symbols.pop_frame();
        let body = body?;

        let inferred = body.main.ty.clone();
        if let Some(declared) = &declared_ret {
            let ok = self.with_resolver(|r| declared.is_compatible_with(&inferred, r));
            if !ok && !inferred.is_any() {
                self.report(
                    format!("function body has type {inferred}, declared -> {declared}"),
                    body.main.span,
                )?;
            }
        }
        let ret = declared_ret.unwrap_or(inferred);

        let captures = SymbolTable::captures_of(&frame);
        let capture_names: Vec<String> = captures.iter().map(|(n, _, _)| n.clone()).collect();
        let capture_slots: Vec<_> = captures.iter().map(|(_, slot, _)| *slot).collect();

        let template = Arc::new(FunctionValue::new(
            name,
            params,
            ret,
            type_params,
            capture_names,
            body,
        ));
        let ty = template.signature();
        Ok(Expr::new(
            ExprKind::Lambda {
                template,
                captures: capture_slots,
            },
            span,
            ty,
        ))
    }

    /// One parameter: `[type] name [= default]`. Defaults must be
    /// constants and may only appear on the trailing parameters.
    fn parse_param(&mut self, range: Range<usize>, prev: Option<&Param>) -> PResult<Param> {
        if range.is_empty() {
            return Err(ParseError::invalid(
                "empty parameter",
                self.span(range.start.min(self.toks.len()), range.end.min(self.toks.len())),
            ));
        }
        let eq = self.find_at_depth0(range.start, range.end, |t| matches!(t, Token::Eq));
        let decl_end = eq.unwrap_or(range.end);
        let name_at = decl_end
            .checked_sub(1)
            .filter(|at| *at >= range.start)
            .ok_or_else(|| {
                ParseError::invalid("expected a parameter name", self.span(range.start, range.end))
            })?;
        let name = match &self.toks[name_at].0 {
            Token::Ident(name) => name.clone(),
            other => {
                return Err(ParseError::unexpected(
                    format!("expected a parameter name, found {other}"),
                    self.span(name_at, name_at + 1),
                ));
            }
        };
        let ty = if name_at > range.start {
            self.parse_type_range(range.start, name_at)?
        } else {
            Type::any()
        };
        let default = match eq {
            Some(eq) => {
                let expr = self.parse_expr(eq + 1, range.end)?;
                match expr.constant_value() {
                    Some(value) => Some(value.clone()),
                    None => {
                        return Err(ParseError::invalid(
                            format!("default for '{name}' must be a constant"),
                            expr.span,
                        ));
                    }
                }
            }
            None => {
                if prev.is_some_and(|p| p.default.is_some()) {
                    return Err(ParseError::invalid(
                        format!("parameter '{name}' without a default follows one with"),
                        self.span(range.start, range.end),
                    ));
                }
                None
            }
        };
        Ok(Param { name, ty, default })
    }

    // === static-type helpers ===

    fn symbols_shadow(&self, name: &str) -> bool {
        self.symbols.peek(name).is_some()
    }

    /// Element and key types when iterating a value of this type.
    fn element_types(&self, ty: &Type) -> (Type, Type) {
        match ty.kind() {
            TypeKind::List(elem) => (elem.clone(), Type::null()),
            TypeKind::SpecificList(items) => (
                self.with_resolver(|r| Type::union_of(items.clone(), r)),
                Type::null(),
            ),
            TypeKind::Map { key, value } => (value.clone(), key.clone()),
            _ => (Type::any(), Type::any()),
        }
    }

    fn index_result_type(&self, ty: &Type) -> Type {
        match ty.kind() {
            TypeKind::Map { value, .. } => self.with_resolver(|r| {
                Type::union_of(vec![value.clone(), Type::null()], r)
            }),
            TypeKind::String => Type::string(),
            _ => ty.index_element().unwrap_or_else(Type::any),
        }
    }

    fn map_literal_type(&self, pairs: &[(Expr, Expr)]) -> Type {
        if pairs.is_empty() {
            return Type::map(Type::any(), Type::any());
        }
        // exact-key record type when every key is a string constant
        let keys: Option<Vec<&str>> = pairs
            .iter()
            .map(|(k, _)| k.constant_value().and_then(Value::as_str))
            .collect();
        if let Some(keys) = keys {
            let required = keys
                .into_iter()
                .zip(pairs.iter().map(|(_, v)| v.ty.clone()))
                .map(|(k, t)| (k.to_string(), t))
                .collect();
            return Type::new(TypeKind::SpecificMap {
                required,
                optional: Default::default(),
            });
        }
        self.with_resolver(|r| {
            Type::map(
                Type::union_of(pairs.iter().map(|(k, _)| k.ty.clone()).collect(), r),
                Type::union_of(pairs.iter().map(|(_, v)| v.ty.clone()).collect(), r),
            )
        })
    }

    fn binary_result_type(&self, op: BinaryOp, left: &Type, right: &Type) -> Type {
        use BinaryOp::*;
        match op {
            Eq | Ne | Lt | Le | Gt | Ge | In | NotIn => Type::bool(),
            Dice => Type::int(),
            Add | Sub | Mul | Div | Mod | Pow => {
                let (l, r) = (left.kind(), right.kind());
                if op == Add && (matches!(l, TypeKind::String) || matches!(r, TypeKind::String))
                {
                    return Type::string();
                }
                if op == Add && matches!((l, r), (TypeKind::List(_), TypeKind::List(_))) {
                    return self.with_resolver(|res| {
                        Type::union_of(vec![left.clone(), right.clone()], res)
                    });
                }
                match (l, r) {
                    (TypeKind::Int, TypeKind::Int) => Type::int(),
                    (TypeKind::Decimal, TypeKind::Int | TypeKind::Decimal)
                    | (TypeKind::Int, TypeKind::Decimal) => Type::decimal(),
                    _ => Type::any(),
                }
            }
        }
    }

    fn check_operands(&self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> PResult<()> {
        use BinaryOp::*;
        let known = |t: &Type| !t.is_any() && !t.contains_generic();
        let numericish = |t: &Type| {
            t.is_numeric() || matches!(t.kind(), TypeKind::Null | TypeKind::Bool)
        };
        let bad = match op {
            Sub | Div | Mod | Pow | Dice => {
                (known(&left.ty) && !numericish(&left.ty))
                    || (known(&right.ty) && !numericish(&right.ty))
            }
            Mul => {
                (known(&left.ty)
                    && !numericish(&left.ty)
                    && !matches!(left.ty.kind(), TypeKind::List(_) | TypeKind::SpecificList(_)))
                    || (known(&right.ty) && !numericish(&right.ty))
            }
            Add => {
                known(&left.ty)
                    && known(&right.ty)
                    && !numericish(&left.ty)
                    && !matches!(
                        left.ty.kind(),
                        TypeKind::String
                            | TypeKind::List(_)
                            | TypeKind::SpecificList(_)
                            | TypeKind::Map { .. }
                            | TypeKind::SpecificMap { .. }
                    )
                    && !matches!(right.ty.kind(), TypeKind::String)
            }
            In | NotIn => {
                known(&right.ty)
                    && !matches!(
                        right.ty.kind(),
                        TypeKind::List(_)
                            | TypeKind::SpecificList(_)
                            | TypeKind::Map { .. }
                            | TypeKind::SpecificMap { .. }
                    )
            }
            _ => false,
        };
        if bad {
            self.report(
                format!("'{op}' cannot combine {} and {}", left.ty, right.ty),
                span,
            )?;
        }
        Ok(())
    }

    fn check_function_value_call(
        &self,
        name: &str,
        ty: &Type,
        args: &[Expr],
        span: Span,
    ) -> PResult<()> {
        if let TypeKind::Function {
            args: expected,
            min_args,
            ..
        } = ty.kind()
        {
            if args.len() < *min_args || args.len() > expected.len() {
                self.report(
                    format!(
                        "{name}() takes {} to {} argument(s), got {}",
                        min_args,
                        expected.len(),
                        args.len()
                    ),
                    span,
                )?;
            }
            for (arg, want) in args.iter().zip(expected) {
                let ok = self.with_resolver(|r| want.is_compatible_with(&arg.ty, r));
                if !ok && !arg.ty.is_any() && !want.contains_generic() {
                    self.report(
                        format!("{name}() expects {want}, got {}", arg.ty),
                        arg.span,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Builtin return type after unifying generic parameters against the
    /// supplied argument types.
    fn builtin_return_type(
        &self,
        name: &str,
        sig: &cadence_cfl_ast::FunctionSig,
        args: &[Expr],
        span: Span,
    ) -> PResult<Type> {
        for (i, arg) in args.iter().enumerate() {
            if let Some(want) = sig.arg_type(i) {
                if want.contains_generic() || arg.ty.is_any() {
                    continue;
                }
                let ok = self.with_resolver(|r| want.is_compatible_with(&arg.ty, r));
                if !ok {
                    self.report(
                        format!("{name}() expects {want}, got {}", arg.ty),
                        arg.span,
                    )?;
                }
            }
        }
        if sig.type_params.is_empty() {
            return Ok(sig.ret.clone());
        }
        let mut bindings = std::collections::HashMap::new();
        for (i, arg) in args.iter().enumerate() {
            if arg.ty.is_any() {
                continue;
            }
            if let Some(want) = sig.arg_type(i) {
                if want.contains_generic() {
                    let result = self.with_resolver(|r| {
                        want.unify(&arg.ty, &mut bindings, r)
                    });
                    if let Err(e) = result {
                        self.report(format!("in {name}(): {e}"), span)?;
                        return Ok(Type::any());
                    }
                }
            }
        }
        let ret = sig.ret.substitute(&bindings);
        if ret.contains_generic() {
            return Ok(Type::any());
        }
        Ok(ret)
    }

    fn instantiated_type(&self, target: &Expr, type_args: &[Type]) -> Type {
        if let Some(Value::Function(f)) = target.constant_value() {
            if let Ok(specialized) = f.instantiate(type_args) {
                return specialized.signature();
            }
        }
        Type::any()
    }

    /// What a condition's truth (or falsity) teaches about identifier
    /// types: `x is T`, bare truthiness, `not`, `and`/`or` spreading,
    /// and null (in)equality.
    pub(crate) fn narrowings(
        &self,
        cond: &Expr,
        positive: bool,
        out: &mut Vec<(String, Type)>,
    ) {
        match &cond.kind {
            ExprKind::IsType {
                expr,
                test,
                negated,
            } => {
                if let ExprKind::Identifier { name, .. } = &expr.kind {
                    let holds = positive != *negated;
                    let ty = if holds {
                        self.with_resolver(|r| expr.ty.narrowed_to(test, r))
                    } else {
                        expr.ty.with_exclusion(test)
                    };
                    out.push((name.clone(), ty));
                }
            }
            ExprKind::Identifier { name, .. } if positive => {
                out.push((name.clone(), cond.ty.null_excluded()));
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.narrowings(operand, !positive, out),
            ExprKind::AndOr { op, left, right } => {
                let spreads = match op {
                    LogicOp::And => positive,
                    LogicOp::Or => !positive,
                };
                if spreads {
                    self.narrowings(left, positive, out);
                    self.narrowings(right, positive, out);
                }
            }
            ExprKind::Binary { op, left, right } => {
                let null_side = |e: &Expr| e.constant_value().is_some_and(Value::is_null);
                let ident = |e: &Expr| match &e.kind {
                    ExprKind::Identifier { name, .. } => Some((name.clone(), e.ty.clone())),
                    _ => None,
                };
                let excludes_null = match op {
                    BinaryOp::Ne => positive,
                    BinaryOp::Eq => !positive,
                    _ => return,
                };
                if excludes_null {
                    if let Some((name, ty)) = ident(left).filter(|_| null_side(right)) {
                        out.push((name, ty.null_excluded()));
                    } else if let Some((name, ty)) = ident(right).filter(|_| null_side(left)) {
                        out.push((name, ty.null_excluded()));
                    }
                }
            }
            _ => {}
        }
    }

    pub(crate) fn apply_narrowings(
        &mut self,
        narrowed: &[(String, Type)],
    ) -> Vec<(usize, usize, Type)> {
        narrowed
            .iter()
            .filter_map(|(name, ty)| self.symbols.narrow(name, ty.clone()))
            .collect()
    }
}
