use std::fmt;

/// Comparison operator of a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Operand {
    /// Dotted path into the context document.
    Field(Vec<String>),
    /// `marking.<place>`
    Tokens(String),
    Number(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Const(bool),
    Truthy(Operand),
    Compare { lhs: Operand, op: CmpOp, rhs: Operand },
    /// Flattened `and` chain; never fewer than two terms.
    All(Vec<Expr>),
    /// Flattened `or` chain; never fewer than two terms.
    Any(Vec<Expr>),
    Not(Box<Expr>),
}
