//! Statement nodes and declarations.

use vexel_common::span::Span;

use crate::ast::expr::Expr;
use crate::ast::types::TypeAnn;
use crate::ast::NodeId;

#[derive(Clone, Debug)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub annotations: Vec<Annotation>,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(id: NodeId, span: Span, kind: StmtKind) -> Self {
        Self { id, span, annotations: Vec::new(), kind }
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Expr(Expr),
    /// `=> expr?;`
    Return(Option<Expr>),
    /// `<<;`
    Break,
    /// `>>;`
    Continue,
    VarDecl(VarDecl),
    FuncDecl(FuncDecl),
    TypeDecl(TypeDecl),
    /// `::a::b;`
    Import { segments: Vec<String> },
    /// `cond ? stmt` -- no else branch, no value.
    CondStmt { cond: Expr, then: Box<Stmt> },
}

/// How a declaration binds to the outside world.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Linkage {
    Normal,
    /// `^name`: visible to other modules and to the backend ABI.
    Exported,
    /// `!name`: declared here, defined by the environment.
    External,
}

#[derive(Clone, Debug)]
pub struct VarDecl {
    pub name: String,
    pub ty: Option<TypeAnn>,
    pub init: Option<Expr>,
    /// `~name`: reassignment allowed.
    pub mutable: bool,
    pub linkage: Linkage,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: Option<TypeAnn>,
    /// `$name`: captures the unevaluated argument expression; substituted
    /// at each use site inside the body.
    pub is_expr_param: bool,
}

#[derive(Clone, Debug)]
pub struct FuncDecl {
    /// Bare name: an identifier, an operator spelling (`+`), or `@`/`@@`
    /// for iteration methods.
    pub name: String,
    /// `#T::name` methods record the owning type name here. Symbol lookup
    /// uses [`FuncDecl::qualified_name`].
    pub type_ns: Option<String>,
    /// Reference-bound parameters written in parens before the name.
    pub receivers: Vec<Param>,
    pub params: Vec<Param>,
    /// `-> #t` or `-> (#a, #b)`. `None` means the return type is inferred
    /// from the body (a type-variable return slot).
    pub ret: Option<Vec<TypeAnn>>,
    /// `None` for external declarations.
    pub body: Option<Expr>,
    pub exported: bool,
    pub external: bool,
    /// Monomorphized clones are flagged so later passes can tell templates
    /// from instantiations.
    pub instantiated: bool,
}

impl FuncDecl {
    /// A value parameter without an explicit type, or an inferred return
    /// slot, makes the function generic. Expression parameters do not by
    /// themselves; their substitution happens at use sites either way.
    /// Method receivers without an annotation implicitly have the method's
    /// `#T::` type, and iteration methods (`@`/`@@`) are statement-only,
    /// so neither makes a method generic.
    pub fn is_generic(&self) -> bool {
        if self.external {
            return false;
        }
        let iteration_method = self.name == "@" || self.name == "@@";
        self.ret.is_none() && self.body.is_some() && !iteration_method
            || self.params.iter().any(|p| !p.is_expr_param && p.ty.is_none())
            || self.receivers.iter().any(|p| p.ty.is_none() && self.type_ns.is_none())
    }

    /// The name symbols are registered under: `T::name` for methods,
    /// the bare name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.type_ns {
            Some(ns) => format!("{ns}::{}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeAnn,
}

#[derive(Clone, Debug)]
pub struct TypeDecl {
    pub name: String,
    pub fields: Vec<Field>,
}

/// An annotation prefix: `[[name]]` or `[[name(arg, …)]]`.
///
/// Annotations are opaque at parse time; the validator decides which names
/// it recognizes. Arguments are kept as raw source text.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub args: Vec<String>,
    pub span: Span,
}
