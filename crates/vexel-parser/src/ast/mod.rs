//! The Vexel AST: a plain owned tree of tagged variants.
//!
//! Every expression and statement carries a [`NodeId`] unique within its
//! `Program`; cross-pass side tables (bindings, compile-time facts) key on
//! `(instance, NodeId)` instead of node pointers. Cloning a subtree for
//! monomorphization must re-mint ids through the program's [`NodeIds`].

pub mod display;
pub mod expr;
pub mod remap;
pub mod stmt;
pub mod types;
pub mod walk;

pub use expr::{BinOp, Expr, ExprKind, UnOp};
pub use stmt::{Annotation, Field, FuncDecl, Linkage, Param, Stmt, StmtKind, TypeDecl, VarDecl};
pub use types::{Prim, PrimFamily, TyVar, Type, TypeAnn, TypeAnnKind};

/// Identity of an AST node within one `Program`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Monotonic [`NodeId`] source, shared by the parser and the monomorphizer.
#[derive(Debug, Default)]
pub struct NodeIds {
    next: u32,
}

impl NodeIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// One parsed source file.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub statements: Vec<Stmt>,
}

/// Span-insensitive equality of two declarations, used for re-import
/// equivalence checks: two declarations are equivalent when their canonical
/// renderings coincide (equality of the token stream up to trivia).
pub fn decl_shape_eq(a: &Stmt, b: &Stmt) -> bool {
    display::render_stmt(a) == display::render_stmt(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_monotonic() {
        let mut ids = NodeIds::new();
        let a = ids.mint();
        let b = ids.mint();
        assert!(a < b);
        assert_eq!(a, NodeId(0));
    }
}
