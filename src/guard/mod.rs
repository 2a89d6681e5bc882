//! Guard compiler.
//!
//! [`compile_guard`] turns a small boolean expression into a [`Guard`]
//! evaluated against `(context, marking)`. All syntax errors surface at
//! compile time; evaluation never fails and is a pure function of its
//! inputs, which the analysis engine depends on.
//!
//! ```text
//! score >= 90
//! approved and marking.review == 0
//! not (tier == "free" or retries > 3)
//! 1
//! ```

mod ast;
mod lexer;
mod parser;

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::error::GuardCompileError;
use crate::firing::Context;
use crate::net::Marking;

pub use ast::CmpOp;
pub use parser::{MAX_NESTING, MAX_TERMS};
use ast::{Expr, Operand};

/// A compiled guard predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    source: String,
    expr: Expr,
}

/// Compile `expression` eagerly. Malformed input fails here, never at
/// evaluation time.
pub fn compile_guard(expression: &str) -> Result<Guard, GuardCompileError> {
    let tokens = lexer::Lexer::new(expression).tokenize()?;
    let expr = parser::Parser::new(expression, tokens).parse()?;
    Ok(Guard {
        source: expression.to_string(),
        expr,
    })
}

impl Guard {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, context: &Context, marking: &Marking) -> bool {
        eval(&self.expr, context, marking)
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A resolved operand value.
#[derive(Debug, PartialEq)]
enum Val<'a> {
    Num(f64),
    Str(&'a str),
    Bool(bool),
    /// Arrays and objects: only their emptiness matters.
    Composite(bool),
    Missing,
}

fn eval(expr: &Expr, ctx: &Context, marking: &Marking) -> bool {
    match expr {
        Expr::Const(b) => *b,
        Expr::Truthy(op) => truthy(&resolve(op, ctx, marking)),
        Expr::Compare { lhs, op, rhs } => {
            compare(&resolve(lhs, ctx, marking), *op, &resolve(rhs, ctx, marking))
        }
        Expr::All(terms) => terms.iter().all(|t| eval(t, ctx, marking)),
        Expr::Any(terms) => terms.iter().any(|t| eval(t, ctx, marking)),
        Expr::Not(inner) => !eval(inner, ctx, marking),
    }
}

fn resolve<'a>(op: &'a Operand, ctx: &'a Context, marking: &Marking) -> Val<'a> {
    match op {
        Operand::Number(n) => Val::Num(*n),
        Operand::Str(s) => Val::Str(s),
        Operand::Bool(b) => Val::Bool(*b),
        Operand::Tokens(place) => Val::Num(f64::from(marking.tokens(place))),
        Operand::Field(path) => {
            let mut segments = path.iter();
            let Some(first) = segments.next() else {
                return Val::Missing;
            };
            let mut cur = ctx.get(first);
            for seg in segments {
                cur = cur.and_then(|v| v.get(seg));
            }
            match cur {
                Some(Value::Number(n)) => n.as_f64().map_or(Val::Missing, Val::Num),
                Some(Value::String(s)) => Val::Str(s),
                Some(Value::Bool(b)) => Val::Bool(*b),
                Some(Value::Array(a)) => Val::Composite(!a.is_empty()),
                Some(Value::Object(o)) => Val::Composite(!o.is_empty()),
                Some(Value::Null) | None => Val::Missing,
            }
        }
    }
}

fn truthy(v: &Val<'_>) -> bool {
    match v {
        Val::Num(n) => *n != 0.0,
        Val::Str(s) => !s.is_empty(),
        Val::Bool(b) => *b,
        Val::Composite(non_empty) => *non_empty,
        Val::Missing => false,
    }
}

fn compare(lhs: &Val<'_>, op: CmpOp, rhs: &Val<'_>) -> bool {
    let ordering = match (lhs, rhs) {
        (Val::Missing, _) | (_, Val::Missing) => return false,
        (Val::Num(a), Val::Num(b)) => a.partial_cmp(b),
        (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
        (Val::Bool(a), Val::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match (ordering, op) {
        (Some(o), CmpOp::Eq) => o == Ordering::Equal,
        (Some(o), CmpOp::Ne) => o != Ordering::Equal,
        (Some(o), CmpOp::Lt) => o == Ordering::Less,
        (Some(o), CmpOp::Le) => o != Ordering::Greater,
        (Some(o), CmpOp::Gt) => o == Ordering::Greater,
        (Some(o), CmpOp::Ge) => o != Ordering::Less,
        // Values of different types are never equal and never ordered.
        (None, CmpOp::Ne) => true,
        (None, _) => false,
    }
}
