//! Deep clone with fresh node ids.
//!
//! Monomorphization clones a generic template body; the clone must get new
//! node ids so the side tables of the instantiation never collide with the
//! template's entries.

use crate::ast::expr::{Expr, ExprKind};
use crate::ast::stmt::{Stmt, StmtKind};
use crate::ast::NodeIds;

pub fn clone_expr_with_new_ids(expr: &Expr, ids: &mut NodeIds) -> Expr {
    let mut clone = expr.clone();
    renumber_expr(&mut clone, ids);
    clone
}

pub fn clone_stmt_with_new_ids(stmt: &Stmt, ids: &mut NodeIds) -> Stmt {
    let mut clone = stmt.clone();
    renumber_stmt(&mut clone, ids);
    clone
}

fn renumber_expr(expr: &mut Expr, ids: &mut NodeIds) {
    expr.id = ids.mint();
    match &mut expr.kind {
        ExprKind::Int { .. }
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Char(_)
        | ExprKind::Ident(_)
        | ExprKind::Resource(_)
        | ExprKind::Process(_) => {}
        ExprKind::Binary { lhs, rhs, .. } => {
            renumber_expr(lhs, ids);
            renumber_expr(rhs, ids);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => renumber_expr(operand, ids),
        ExprKind::Call { receivers, args, .. } => {
            for receiver in receivers {
                renumber_expr(receiver, ids);
            }
            for arg in args {
                renumber_expr(arg, ids);
            }
        }
        ExprKind::Index { base, index } => {
            renumber_expr(base, ids);
            renumber_expr(index, ids);
        }
        ExprKind::Member { base, .. } => renumber_expr(base, ids),
        ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
            for elem in elems {
                renumber_expr(elem, ids);
            }
        }
        ExprKind::Block { stmts, tail } => {
            for stmt in stmts {
                renumber_stmt(stmt, ids);
            }
            if let Some(tail) = tail {
                renumber_expr(tail, ids);
            }
        }
        ExprKind::Conditional { cond, then, alt } => {
            renumber_expr(cond, ids);
            renumber_expr(then, ids);
            renumber_expr(alt, ids);
        }
        ExprKind::Cast { operand, .. } => renumber_expr(operand, ids),
        ExprKind::Assign { target, value } => {
            renumber_expr(target, ids);
            renumber_expr(value, ids);
        }
        ExprKind::Range { lo, hi } => {
            renumber_expr(lo, ids);
            renumber_expr(hi, ids);
        }
        ExprKind::Iterate { iterable, body, .. } => {
            renumber_expr(iterable, ids);
            renumber_expr(body, ids);
        }
        ExprKind::Repeat { cond, body } => {
            renumber_expr(cond, ids);
            renumber_expr(body, ids);
        }
    }
}

fn renumber_stmt(stmt: &mut Stmt, ids: &mut NodeIds) {
    stmt.id = ids.mint();
    match &mut stmt.kind {
        StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => renumber_expr(expr, ids),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Import { .. } => {}
        StmtKind::VarDecl(decl) => {
            if let Some(init) = &mut decl.init {
                renumber_expr(init, ids);
            }
        }
        StmtKind::FuncDecl(func) => {
            for param in func.receivers.iter_mut().chain(func.params.iter_mut()) {
                param.id = ids.mint();
            }
            if let Some(body) = &mut func.body {
                renumber_expr(body, ids);
            }
        }
        StmtKind::TypeDecl(decl) => {
            for field in &mut decl.fields {
                field.id = ids.mint();
            }
        }
        StmtKind::CondStmt { cond, then } => {
            renumber_expr(cond, ids);
            renumber_stmt(then, ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::walk::for_each_expr_in_stmt;
    use crate::ast::NodeIds;
    use vexel_common::span::FileId;

    #[test]
    fn clone_assigns_disjoint_ids() {
        let mut ids = NodeIds::new();
        let module =
            crate::parse(FileId(0), "&add(a, b) { a + b }", &mut ids).expect("parse");
        let template = &module.statements[0];

        let clone = clone_stmt_with_new_ids(template, &mut ids);

        let mut original_ids = std::collections::HashSet::new();
        for_each_expr_in_stmt(template, &mut |e| {
            original_ids.insert(e.id);
        });
        let mut fresh = 0usize;
        for_each_expr_in_stmt(&clone, &mut |e| {
            assert!(!original_ids.contains(&e.id), "clone reused id {:?}", e.id);
            fresh += 1;
        });
        assert!(fresh > 0);
        assert_ne!(clone.id, template.id);
    }
}
