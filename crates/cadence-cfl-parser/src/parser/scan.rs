//! Token-range scanning.
//!
//! The splitter walks a token range once, tracking bracket depth, and
//! picks the loosest-binding operator at depth zero; ties go to the
//! rightmost occurrence so binary operators associate left. Everything
//! context-sensitive lives in [`Parser::classify`]: a `-` or `d` in
//! operand position is not an operator, a `[`/`(` after an operand is a
//! postfix index/call, `not` fuses with a following `in`, and `is`
//! fuses with a following `not`.

use std::ops::Range;

use cadence_cfl_ast::BinaryOp;
use cadence_cfl_lexer::Token;

use super::Parser;
use crate::error::{PResult, ParseError};

/// Where and how to split a token range.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Split {
    pub pos: usize,
    /// Tokens consumed to the left of `pos` as part of the operator
    /// (`not in` consumes the preceding `not`).
    pub back: usize,
    pub op: SplitOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SplitOp {
    Sequence,
    Where,
    Asserting,
    Cast { narrowing: bool },
    Or,
    And,
    Not,
    Binary(BinaryOp),
    Is { negated: bool },
    Instantiate,
    Index,
    Call,
    Dot,
}

impl SplitOp {
    fn precedence(self) -> u8 {
        match self {
            SplitOp::Sequence => 0,
            SplitOp::Where => 1,
            SplitOp::Asserting => 2,
            SplitOp::Cast { .. } => 3,
            SplitOp::Or => 4,
            SplitOp::And => 5,
            SplitOp::Not => 6,
            SplitOp::Binary(BinaryOp::In | BinaryOp::NotIn) => 7,
            SplitOp::Is { .. } => 8,
            SplitOp::Binary(
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge,
            ) => 9,
            SplitOp::Binary(BinaryOp::Add | BinaryOp::Sub) => 10,
            SplitOp::Binary(BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod) => 11,
            SplitOp::Binary(BinaryOp::Pow) => 12,
            SplitOp::Binary(BinaryOp::Dice) => 13,
            SplitOp::Instantiate => 14,
            SplitOp::Index | SplitOp::Call | SplitOp::Dot => 15,
        }
    }
}

impl<'a> Parser<'a> {
    /// Whether the token before `i` ends an operand, making a following
    /// `-`, `d`, `[`, `(`, or `<<` an infix/postfix operator rather than
    /// a prefix or literal opener.
    fn operand_ends_before(&self, i: usize, lo: usize) -> bool {
        if i <= lo {
            return false;
        }
        matches!(
            self.toks[i - 1].0,
            Token::Int(_)
                | Token::DecimalLit(_)
                | Token::DiceRoll(_)
                | Token::Str(_)
                | Token::TranslatedStr(_)
                | Token::Ident(_)
                | Token::TypeName(_)
                | Token::True
                | Token::False
                | Token::Null
                | Token::RParen
                | Token::RSquare
                | Token::RCurly
                | Token::RDoubleAngle
        )
    }

    /// Classify the token at `i` as an operator candidate, if it is one
    /// in this position.
    fn classify(&self, i: usize, lo: usize, hi: usize) -> Option<Split> {
        let split = |op: SplitOp| Some(Split { pos: i, back: 0, op });
        match &self.toks[i].0 {
            Token::Semicolon => split(SplitOp::Sequence),
            Token::Where => split(SplitOp::Where),
            Token::Asserting => split(SplitOp::Asserting),
            Token::ColonColon => split(SplitOp::Cast { narrowing: false }),
            Token::LeftArrow => split(SplitOp::Cast { narrowing: true }),
            Token::Or => split(SplitOp::Or),
            Token::And => split(SplitOp::And),
            Token::Not => {
                // only a split candidate at the very front; mid-range
                // `not` is either half of `not in` (found at the `in`)
                // or a prefix inside the right operand of a looser split
                if i == lo {
                    split(SplitOp::Not)
                } else {
                    None
                }
            }
            Token::In => {
                if i > lo && matches!(self.toks[i - 1].0, Token::Not) {
                    Some(Split {
                        pos: i,
                        back: 1,
                        op: SplitOp::Binary(BinaryOp::NotIn),
                    })
                } else {
                    split(SplitOp::Binary(BinaryOp::In))
                }
            }
            Token::Is => {
                let negated =
                    matches!(self.toks.get(i + 1).map(|(t, _)| t), Some(Token::Not));
                split(SplitOp::Is { negated })
            }
            Token::Eq => split(SplitOp::Binary(BinaryOp::Eq)),
            Token::NotEq => split(SplitOp::Binary(BinaryOp::Ne)),
            Token::Lt => split(SplitOp::Binary(BinaryOp::Lt)),
            Token::LtEq => split(SplitOp::Binary(BinaryOp::Le)),
            Token::Gt => split(SplitOp::Binary(BinaryOp::Gt)),
            Token::GtEq => split(SplitOp::Binary(BinaryOp::Ge)),
            Token::Plus => split(SplitOp::Binary(BinaryOp::Add)),
            Token::Minus => {
                if self.operand_ends_before(i, lo) {
                    split(SplitOp::Binary(BinaryOp::Sub))
                } else {
                    None // unary
                }
            }
            Token::Star => split(SplitOp::Binary(BinaryOp::Mul)),
            Token::Slash => split(SplitOp::Binary(BinaryOp::Div)),
            Token::Percent => split(SplitOp::Binary(BinaryOp::Mod)),
            Token::Caret => split(SplitOp::Binary(BinaryOp::Pow)),
            Token::Ident(name) if name == "d" => {
                if self.operand_ends_before(i, lo) && i + 1 < hi {
                    split(SplitOp::Binary(BinaryOp::Dice))
                } else {
                    None
                }
            }
            Token::LDoubleAngle => {
                // only a generic instantiation when the range ends at
                // the matching `>>`; otherwise a postfix call or index
                // further right is the outermost operation
                if self.operand_ends_before(i, lo)
                    && matches!(self.toks[hi - 1].0, Token::RDoubleAngle)
                {
                    split(SplitOp::Instantiate)
                } else {
                    None
                }
            }
            Token::LSquare => {
                if self.operand_ends_before(i, lo) {
                    split(SplitOp::Index)
                } else {
                    None // list literal / comprehension opener
                }
            }
            Token::LParen => {
                if self.operand_ends_before(i, lo) {
                    split(SplitOp::Call)
                } else {
                    None // grouping opener
                }
            }
            Token::Dot => split(SplitOp::Dot),
            _ => None,
        }
    }

    /// Find the loosest-binding operator at depth zero; ties pick the
    /// rightmost occurrence (left associativity).
    pub(crate) fn find_split(&self, lo: usize, hi: usize) -> PResult<Option<Split>> {
        let mut opens: Vec<usize> = Vec::new();
        let mut best: Option<Split> = None;
        for i in lo..hi {
            if opens.is_empty() {
                if let Some(candidate) = self.classify(i, lo, hi) {
                    let better = match &best {
                        Some(current) => {
                            candidate.op.precedence() <= current.op.precedence()
                        }
                        None => true,
                    };
                    if better {
                        best = Some(candidate);
                    }
                }
            }
            match &self.toks[i].0 {
                Token::LParen | Token::LSquare | Token::LCurly | Token::LDoubleAngle => {
                    opens.push(i);
                }
                Token::RParen | Token::RSquare | Token::RCurly | Token::RDoubleAngle => {
                    if opens.pop().is_none() {
                        return Err(ParseError::invalid(
                            "unmatched closing bracket",
                            self.span(i, i + 1),
                        ));
                    }
                }
                _ => {}
            }
        }
        if let Some(open) = opens.first() {
            return Err(ParseError::invalid(
                "unmatched opening bracket",
                self.span(*open, *open + 1),
            ));
        }
        Ok(best)
    }

    /// First position in `lo..hi` at depth zero matching `pred`.
    pub(crate) fn find_at_depth0(
        &self,
        lo: usize,
        hi: usize,
        pred: impl Fn(&Token) -> bool,
    ) -> Option<usize> {
        let mut depth: i32 = 0;
        for i in lo..hi {
            match &self.toks[i].0 {
                t if depth == 0 && pred(t) => return Some(i),
                Token::LParen | Token::LSquare | Token::LCurly | Token::LDoubleAngle => {
                    depth += 1;
                }
                Token::RParen | Token::RSquare | Token::RCurly | Token::RDoubleAngle => {
                    depth -= 1;
                }
                _ => {}
            }
        }
        None
    }

    /// All positions in `lo..hi` at depth zero matching `pred`.
    pub(crate) fn collect_at_depth0(
        &self,
        lo: usize,
        hi: usize,
        pred: impl Fn(&Token) -> bool,
    ) -> Vec<usize> {
        let mut depth: i32 = 0;
        let mut out = Vec::new();
        for i in lo..hi {
            match &self.toks[i].0 {
                t if depth == 0 && pred(t) => out.push(i),
                Token::LParen | Token::LSquare | Token::LCurly | Token::LDoubleAngle => {
                    depth += 1;
                }
                Token::RParen | Token::RSquare | Token::RCurly | Token::RDoubleAngle => {
                    depth -= 1;
                }
                _ => {}
            }
        }
        out
    }

    /// Split `lo..hi` into the ranges between depth-zero separators.
    /// An empty input yields no ranges; a trailing separator yields a
    /// trailing empty range the caller can ignore.
    pub(crate) fn split_on(
        &self,
        lo: usize,
        hi: usize,
        pred: impl Fn(&Token) -> bool,
    ) -> PResult<Vec<Range<usize>>> {
        if lo >= hi {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut start = lo;
        for pos in self.collect_at_depth0(lo, hi, &pred) {
            out.push(start..pos);
            start = pos + 1;
        }
        out.push(start..hi);
        Ok(out)
    }
}
