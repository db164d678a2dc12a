//! Expression nodes.

use vexel_common::span::Span;

use crate::ast::stmt::Stmt;
use crate::ast::types::{Prim, Type, TypeAnn};
use crate::ast::NodeId;

/// An expression. `ty` is the denormalized result of type checking: set for
/// every value-producing expression, `None` for statement-only forms
/// (iteration, repeat, statement-position void calls and assignments).
#[derive(Clone, Debug)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub ty: Option<Type>,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(id: NodeId, span: Span, kind: ExprKind) -> Self {
        Self { id, span, ty: None, kind }
    }

    /// Whether this expression is an identifier, and its name if so.
    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    /// Integer literal: magnitude plus optional width suffix (`1u8`).
    Int { value: u64, suffix: Option<Prim> },
    Float(f64),
    Str(String),
    /// Character literal, already decoded to its byte value.
    Char(u8),
    Ident(String),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnOp, operand: Box<Expr> },
    /// A call. `callee` is the function name, possibly already qualified
    /// (`T::f` after method rewrite, `f_G_…` after monomorphization).
    /// Receivers evaluate left-to-right before the arguments.
    Call { callee: String, receivers: Vec<Expr>, args: Vec<Expr> },
    Index { base: Box<Expr>, index: Box<Expr> },
    /// Member access; tuple elements use the `__N` field convention.
    Member { base: Box<Expr>, field: String },
    ArrayLit(Vec<Expr>),
    /// `(e1, e2, …)`, n >= 2. Typed as a synthetic `tuple<N>_…` record.
    TupleLit(Vec<Expr>),
    Block { stmts: Vec<Stmt>, tail: Option<Box<Expr>> },
    /// `cond ? then : alt`.
    Conditional { cond: Box<Expr>, then: Box<Expr>, alt: Box<Expr> },
    /// `#type(operand)`.
    Cast { target: TypeAnn, operand: Box<Expr> },
    /// `target = value`. Introduces a new local when the target identifier
    /// is not resolvable in any enclosing scope.
    Assign { target: Box<Expr>, value: Box<Expr> },
    Range { lo: Box<Expr>, hi: Box<Expr> },
    /// `|operand|`.
    Length(Box<Expr>),
    /// `iterable @ body`, or `iterable @@ body` for the sorted variant.
    /// The checker rewrites this to [`ExprKind::Repeat`] when the head
    /// turns out to be a boolean condition.
    Iterate { iterable: Box<Expr>, body: Box<Expr>, sorted: bool },
    /// `(cond) @ body`: re-evaluate body while cond holds.
    Repeat { cond: Box<Expr>, body: Box<Expr> },
    /// `%"path"`: compile-time file or directory embed.
    Resource(String),
    /// `` `cmd` ``: shell capture, opt-in.
    Process(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Source spelling; also the method name used for operator overloads
    /// (`T::+` etc.).
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    /// Operators that require unsigned integer operands.
    pub fn is_unsigned_only(self) -> bool {
        matches!(self, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr | BinOp::Rem)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    /// Operators a user type may overload via `T::op` methods.
    pub fn overloadable(self) -> bool {
        matches!(
            self,
            BinOp::Add
                | BinOp::Sub
                | BinOp::Mul
                | BinOp::Div
                | BinOp::Rem
                | BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    /// `-x`
    Neg,
    /// `!x` (boolean)
    Not,
    /// `~x` (bitwise, unsigned only)
    BitNot,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
            UnOp::BitNot => "~",
        }
    }
}
