//! Recursive-descent parser: `or` binds loosest, then `and`, then `not`.

use crate::error::GuardCompileError;

use super::ast::{Expr, Operand};
use super::lexer::{Token, TokenKind, error};

/// Deepest allowed nesting of parentheses and `not`.
pub const MAX_NESTING: usize = 64;

/// Most operands a single guard may contain.
pub const MAX_TERMS: usize = 1024;

pub(super) struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    terms: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            depth: 0,
            terms: 0,
        }
    }

    pub fn parse(mut self) -> Result<Expr, GuardCompileError> {
        if matches!(self.peek().kind, TokenKind::Eof) {
            return Err(error(self.src, 0, "empty guard expression"));
        }
        let expr = self.or()?;
        let tok = self.peek();
        if !matches!(tok.kind, TokenKind::Eof) {
            return Err(error(self.src, tok.offset, "unexpected trailing input"));
        }
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    /// Enter one level of parentheses or `not`.
    fn descend(&mut self, offset: usize) -> Result<(), GuardCompileError> {
        if self.depth >= MAX_NESTING {
            return Err(error(
                self.src,
                offset,
                format!("guard is nested deeper than {MAX_NESTING} levels"),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, GuardCompileError> {
        let mut terms = vec![self.and()?];
        while matches!(self.peek().kind, TokenKind::Or) {
            self.bump();
            terms.push(self.and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Any(terms)
        })
    }

    fn and(&mut self) -> Result<Expr, GuardCompileError> {
        let mut terms = vec![self.unary()?];
        while matches!(self.peek().kind, TokenKind::And) {
            self.bump();
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::All(terms)
        })
    }

    fn unary(&mut self) -> Result<Expr, GuardCompileError> {
        if matches!(self.peek().kind, TokenKind::Not) {
            let tok = self.bump();
            self.descend(tok.offset)?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, GuardCompileError> {
        if matches!(self.peek().kind, TokenKind::LParen) {
            let open = self.bump();
            self.descend(open.offset)?;
            let inner = self.or()?;
            let close = self.bump();
            if !matches!(close.kind, TokenKind::RParen) {
                return Err(error(self.src, close.offset, "expected ')'"));
            }
            self.depth -= 1;
            return Ok(inner);
        }

        let start = self.peek().offset;
        self.terms += 1;
        if self.terms > MAX_TERMS {
            return Err(error(
                self.src,
                start,
                format!("guard has more than {MAX_TERMS} terms"),
            ));
        }
        let lhs = self.operand()?;
        if let TokenKind::Cmp(op) = self.peek().kind {
            self.bump();
            let rhs = self.operand()?;
            return Ok(Expr::Compare { lhs, op, rhs });
        }

        match lhs {
            Operand::Bool(b) => Ok(Expr::Const(b)),
            Operand::Number(n) if n == 0.0 => Ok(Expr::Const(false)),
            Operand::Number(n) if n == 1.0 => Ok(Expr::Const(true)),
            Operand::Number(_) => Err(error(
                self.src,
                start,
                "a bare numeric literal must be 0 or 1",
            )),
            Operand::Str(_) => Err(error(
                self.src,
                start,
                "a string literal cannot stand alone",
            )),
            field @ (Operand::Field(_) | Operand::Tokens(_)) => Ok(Expr::Truthy(field)),
        }
    }

    fn operand(&mut self) -> Result<Operand, GuardCompileError> {
        let tok = self.bump();
        match tok.kind {
            TokenKind::Number(n) => Ok(Operand::Number(n)),
            TokenKind::Str(s) => Ok(Operand::Str(s)),
            TokenKind::True => Ok(Operand::Bool(true)),
            TokenKind::False => Ok(Operand::Bool(false)),
            TokenKind::Ident(name) => self.path(&name, tok.offset),
            TokenKind::Eof => Err(error(self.src, tok.offset, "unexpected end of expression")),
            other => Err(error(
                self.src,
                tok.offset,
                format!("expected a value, found {other:?}"),
            )),
        }
    }

    fn path(&self, name: &str, offset: usize) -> Result<Operand, GuardCompileError> {
        let segments: Vec<&str> = name.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(error(self.src, offset, format!("malformed path '{name}'")));
        }
        match segments.as_slice() {
            ["marking"] => Err(error(self.src, offset, "`marking` needs a place: marking.<place>")),
            ["marking", place] => Ok(Operand::Tokens((*place).to_string())),
            ["marking", ..] => Err(error(
                self.src,
                offset,
                format!("'{name}' is not a place reference"),
            )),
            _ => Ok(Operand::Field(
                segments.into_iter().map(str::to_string).collect(),
            )),
        }
    }
}
