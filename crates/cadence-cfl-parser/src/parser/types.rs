//! The type-expression grammar.
//!
//! Parsed from the same token stream as expressions: primitives,
//! `[T]` / `[T1,T2]`, `{K -> V}` / `{key: T, key2?: T}`,
//! `function(T,...) -> T`, `enum{a,b,c}`, `class name` / `obj name`,
//! `interface{id: T, ...}`, capitalized generic variables, and `|`
//! unions. Capitalized names resolve against the external type registry
//! when one is attached, lazily parsing and caching declarations on
//! first use; otherwise they are generic variables.

use indexmap::IndexMap;
use std::sync::{Arc, RwLock};

use cadence_cfl_ast::{NamedType, Type, TypeKind, TypeRegistry};
use cadence_cfl_lexer::{tokenize, Token};

use super::Parser;
use crate::error::{PResult, ParseError};
use crate::options::ParseOptions;

/// Parse a standalone type declaration, as hosts do when filling the
/// named-type registry.
pub fn parse_type_source(source: &str, opts: &ParseOptions) -> PResult<Type> {
    let toks = tokenize(source)
        .map_err(|e| ParseError::from_lex(e, opts.source_id, 1))?;
    let mut parser = Parser::new(source, &toks, opts);
    parser.parse_type_range(0, toks.len())
}

impl<'a> Parser<'a> {
    /// Parse tokens `lo..hi` as exactly one type expression.
    pub(crate) fn parse_type_range(&mut self, lo: usize, hi: usize) -> PResult<Type> {
        let mut pos = lo;
        let ty = self.parse_type_union(&mut pos, hi)?;
        if pos != hi {
            return Err(ParseError::unexpected(
                format!("unexpected {} after type", self.toks[pos].0),
                self.span(pos, hi),
            ));
        }
        Ok(ty)
    }

    /// Parse a type starting at `*pos`, consuming as much as the
    /// grammar allows (used for `->` return annotations followed by a
    /// function body).
    pub(crate) fn parse_type_union(&mut self, pos: &mut usize, hi: usize) -> PResult<Type> {
        let mut items = vec![self.parse_type_item(pos, hi)?];
        while matches!(self.toks.get(*pos).map(|(t, _)| t), Some(Token::Pipe))
            && *pos + 1 < hi
        {
            *pos += 1;
            items.push(self.parse_type_item(pos, hi)?);
        }
        if items.len() == 1 {
            return Ok(items.pop().expect("len checked"));
        }
        Ok(self.with_resolver(|resolver| Type::union_of(items, resolver)))
    }

    fn parse_type_item(&mut self, pos: &mut usize, hi: usize) -> PResult<Type> {
        let start = *pos;
        let tok = match self.toks.get(*pos) {
            Some((tok, _)) if *pos < hi => tok,
            _ => {
                return Err(ParseError::eof(
                    "expected a type",
                    self.span(start, start),
                ));
            }
        };
        *pos += 1;
        match tok {
            Token::Null => Ok(Type::null()),
            Token::Ident(name) => match name.as_str() {
                "int" => Ok(Type::int()),
                "decimal" => Ok(Type::decimal()),
                "string" => Ok(Type::string()),
                "bool" => Ok(Type::bool()),
                "any" => Ok(Type::any()),
                "commands" => Ok(Type::commands()),
                "list" => Ok(Type::list(Type::any())),
                "map" => Ok(Type::map(Type::any(), Type::any())),
                "object" => Ok(Type::new(TypeKind::Object(String::new()))),
                "function" => self.parse_function_type(pos, hi),
                "class" => {
                    let name = self.parse_dotted_name(pos, hi)?;
                    Ok(Type::new(TypeKind::Class(name)))
                }
                "obj" => {
                    let name = self.parse_dotted_name(pos, hi)?;
                    Ok(Type::new(TypeKind::Object(name)))
                }
                "interface" => {
                    let members = self.parse_key_type_block(pos, hi, false)?;
                    Ok(Type::new(TypeKind::Interface(
                        members.into_iter().map(|(k, t, _)| (k, t)).collect(),
                    )))
                }
                other => Err(ParseError::unexpected(
                    format!("'{other}' is not a type"),
                    self.span(start, *pos),
                )),
            },
            Token::Enum => {
                self.expect_at(pos, hi, &Token::LCurly, "expected '{' after 'enum'")?;
                let mut values = Vec::new();
                loop {
                    match self.toks.get(*pos).map(|(t, _)| t) {
                        Some(Token::Ident(v)) => {
                            values.push(v.clone());
                            *pos += 1;
                        }
                        _ => {
                            return Err(ParseError::unexpected(
                                "expected an enum value",
                                self.span(*pos, (*pos + 1).min(hi)),
                            ));
                        }
                    }
                    match self.toks.get(*pos).map(|(t, _)| t) {
                        Some(Token::Comma) => *pos += 1,
                        Some(Token::RCurly) => {
                            *pos += 1;
                            break;
                        }
                        _ => {
                            return Err(ParseError::unexpected(
                                "expected ',' or '}' in enum",
                                self.span(*pos, (*pos + 1).min(hi)),
                            ));
                        }
                    }
                }
                Ok(Type::enumeration(values))
            }
            Token::TypeName(name) => {
                let name = name.clone();
                if self.generics.iter().any(|scope| scope.contains(&name)) {
                    return Ok(Type::generic(name));
                }
                self.resolve_named_type(&name, start)
            }
            Token::LSquare => {
                let close = self.matching_close(start, hi)?;
                let parts = self.split_on(start + 1, close, |t| matches!(t, Token::Comma))?;
                let mut types = Vec::with_capacity(parts.len());
                for part in &parts {
                    types.push(self.parse_type_range(part.start, part.end)?);
                }
                *pos = close + 1;
                match types.len() {
                    0 => Err(ParseError::invalid(
                        "a list type needs an element type",
                        self.span(start, close + 1),
                    )),
                    1 => Ok(Type::list(types.pop().expect("len checked"))),
                    _ => Ok(Type::new(TypeKind::SpecificList(types))),
                }
            }
            Token::LCurly => {
                let close = self.matching_close(start, hi)?;
                // `{key: T}` record or `{K -> V}` map
                let record = matches!(
                    (
                        self.toks.get(start + 1).map(|(t, _)| t),
                        self.toks.get(start + 2).map(|(t, _)| t),
                    ),
                    (
                        Some(Token::Ident(_) | Token::Str(_)),
                        Some(Token::Colon | Token::Question),
                    )
                );
                if record {
                    *pos = start;
                    let members = self.parse_key_type_block(pos, hi, true)?;
                    let mut required = IndexMap::new();
                    let mut optional = IndexMap::new();
                    for (key, ty, opt) in members {
                        if opt {
                            optional.insert(key, ty);
                        } else {
                            required.insert(key, ty);
                        }
                    }
                    return Ok(Type::new(TypeKind::SpecificMap { required, optional }));
                }
                let arrow = self
                    .find_at_depth0(start + 1, close, |t| matches!(t, Token::Arrow))
                    .ok_or_else(|| {
                        ParseError::invalid(
                            "expected 'key -> value' in map type",
                            self.span(start, close + 1),
                        )
                    })?;
                let key = self.parse_type_range(start + 1, arrow)?;
                let value = self.parse_type_range(arrow + 1, close)?;
                *pos = close + 1;
                Ok(Type::map(key, value))
            }
            other => Err(ParseError::unexpected(
                format!("expected a type, found {other}"),
                self.span(start, *pos),
            )),
        }
    }

    /// `function(T, ...) -> T`, or bare `function` for "any function".
    fn parse_function_type(&mut self, pos: &mut usize, hi: usize) -> PResult<Type> {
        if !matches!(self.toks.get(*pos).map(|(t, _)| t), Some(Token::LParen)) {
            return Ok(Type::function(Vec::new(), Type::any(), 0));
        }
        let open = *pos;
        let close = self.matching_close(open, hi)?;
        let parts = self.split_on(open + 1, close, |t| matches!(t, Token::Comma))?;
        let mut args = Vec::new();
        for part in &parts {
            if part.is_empty() {
                continue;
            }
            args.push(self.parse_type_range(part.start, part.end)?);
        }
        *pos = close + 1;
        self.expect_at(pos, hi, &Token::Arrow, "expected '->' after function arguments")?;
        let ret = self.parse_type_union(pos, hi)?;
        let min_args = args.len();
        Ok(Type::function(args, ret, min_args))
    }

    /// `{id: T, id2?: T, ...}` for records and interfaces.
    fn parse_key_type_block(
        &mut self,
        pos: &mut usize,
        hi: usize,
        _allow_optional: bool,
    ) -> PResult<Vec<(String, Type, bool)>> {
        self.expect_at(pos, hi, &Token::LCurly, "expected '{'")?;
        let open = *pos - 1;
        let close = self.matching_close(open, hi)?;
        let mut members = Vec::new();
        let parts = self.split_on(open + 1, close, |t| matches!(t, Token::Comma))?;
        for part in &parts {
            if part.is_empty() {
                continue;
            }
            let key = match &self.toks[part.start].0 {
                Token::Ident(k) => k.clone(),
                Token::Str(s) => s.text.clone(),
                other => {
                    return Err(ParseError::unexpected(
                        format!("expected a member name, found {other}"),
                        self.span(part.start, part.start + 1),
                    ));
                }
            };
            let mut at = part.start + 1;
            let optional = matches!(self.toks.get(at).map(|(t, _)| t), Some(Token::Question));
            if optional {
                at += 1;
            }
            if !matches!(self.toks.get(at).map(|(t, _)| t), Some(Token::Colon)) {
                return Err(ParseError::unexpected(
                    format!("expected ':' after member '{key}'"),
                    self.span(part.start, part.end),
                ));
            }
            let ty = self.parse_type_range(at + 1, part.end)?;
            members.push((key, ty, optional));
        }
        *pos = close + 1;
        Ok(members)
    }

    /// Dotted hierarchical name: `unit.vehicle.tank`.
    fn parse_dotted_name(&mut self, pos: &mut usize, hi: usize) -> PResult<String> {
        let mut name = String::new();
        loop {
            match self.toks.get(*pos).map(|(t, _)| t) {
                Some(Token::Ident(part)) if *pos < hi => {
                    name.push_str(part);
                    *pos += 1;
                }
                _ => {
                    return Err(ParseError::unexpected(
                        "expected a class name",
                        self.span(*pos, (*pos + 1).min(hi)),
                    ));
                }
            }
            if matches!(self.toks.get(*pos).map(|(t, _)| t), Some(Token::Dot)) && *pos + 1 < hi
            {
                name.push('.');
                *pos += 1;
            } else {
                return Ok(name);
            }
        }
    }

    /// Resolve a capitalized name against the external registry, lazily
    /// parsing and caching its declaration; an unregistered name is a
    /// generic type variable.
    fn resolve_named_type(&mut self, name: &str, at: usize) -> PResult<Type> {
        let Some(registry) = self.opts.types.clone() else {
            return Ok(Type::generic(name));
        };
        let state = registry
            .read()
            .expect("type registry poisoned")
            .lookup(name);
        match state {
            None => Ok(Type::generic(name)),
            Some(NamedType::Resolved(ty)) => Ok(ty),
            Some(NamedType::Resolving) => Err(ParseError::invalid(
                format!("type '{name}' is declared in terms of itself"),
                self.span(at, at + 1),
            )),
            Some(NamedType::Unresolved(source)) => {
                registry
                    .write()
                    .expect("type registry poisoned")
                    .store(name, NamedType::Resolving);
                let result = parse_named_declaration(&source, &registry, self.opts);
                match result {
                    Ok(ty) => {
                        registry
                            .write()
                            .expect("type registry poisoned")
                            .store(name, NamedType::Resolved(ty.clone()));
                        Ok(ty)
                    }
                    Err(mut err) => {
                        registry
                            .write()
                            .expect("type registry poisoned")
                            .store(name, NamedType::Unresolved(source));
                        err.message = format!("in declaration of '{name}': {}", err.message);
                        Err(err)
                    }
                }
            }
        }
    }

    pub(crate) fn with_resolver<R>(
        &self,
        f: impl FnOnce(&dyn cadence_cfl_ast::TypeResolver) -> R,
    ) -> R {
        match &self.opts.types {
            Some(registry) => {
                let registry = registry.read().expect("type registry poisoned");
                f(&*registry)
            }
            None => f(&cadence_cfl_ast::NullResolver),
        }
    }

    pub(crate) fn matching_close(&self, open: usize, hi: usize) -> PResult<usize> {
        let mut depth: i32 = 0;
        for i in open..hi {
            match &self.toks[i].0 {
                Token::LParen | Token::LSquare | Token::LCurly | Token::LDoubleAngle => {
                    depth += 1;
                }
                Token::RParen | Token::RSquare | Token::RCurly | Token::RDoubleAngle => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(ParseError::invalid(
            "unmatched opening bracket",
            self.span(open, open + 1),
        ))
    }

    fn expect_at(
        &self,
        pos: &mut usize,
        hi: usize,
        expected: &Token,
        message: &str,
    ) -> PResult<()> {
        match self.toks.get(*pos) {
            Some((tok, _))
                if *pos < hi
                    && std::mem::discriminant(tok) == std::mem::discriminant(expected) =>
            {
                *pos += 1;
                Ok(())
            }
            _ => Err(ParseError::unexpected(
                message.to_string(),
                self.span(*pos, (*pos + 1).min(hi)),
            )),
        }
    }
}

fn parse_named_declaration(
    source: &str,
    registry: &Arc<RwLock<TypeRegistry>>,
    opts: &ParseOptions,
) -> PResult<Type> {
    let mut sub_opts = opts.clone();
    sub_opts.types = Some(registry.clone());
    parse_type_source(source, &sub_opts)
}
