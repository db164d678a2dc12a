//! Pre-order traversal helpers shared by the frontend passes.
//!
//! Passes that only need to *observe* nodes (import discovery, sub-expression
//! collection, call collection) use these; passes that rewrite the tree do
//! their own recursion.

use crate::ast::expr::{Expr, ExprKind};
use crate::ast::stmt::{Stmt, StmtKind};
use crate::ast::types::{TypeAnn, TypeAnnKind};

/// Visit `expr` and every expression nested inside it, including array size
/// expressions inside cast targets.
pub fn for_each_expr<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Int { .. }
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Char(_)
        | ExprKind::Ident(_)
        | ExprKind::Resource(_)
        | ExprKind::Process(_) => {}
        ExprKind::Binary { lhs, rhs, .. } => {
            for_each_expr(lhs, f);
            for_each_expr(rhs, f);
        }
        ExprKind::Unary { operand, .. } => for_each_expr(operand, f),
        ExprKind::Call { receivers, args, .. } => {
            for receiver in receivers {
                for_each_expr(receiver, f);
            }
            for arg in args {
                for_each_expr(arg, f);
            }
        }
        ExprKind::Index { base, index } => {
            for_each_expr(base, f);
            for_each_expr(index, f);
        }
        ExprKind::Member { base, .. } => for_each_expr(base, f),
        ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
            for elem in elems {
                for_each_expr(elem, f);
            }
        }
        ExprKind::Block { stmts, tail } => {
            for stmt in stmts {
                for_each_expr_in_stmt(stmt, f);
            }
            if let Some(tail) = tail {
                for_each_expr(tail, f);
            }
        }
        ExprKind::Conditional { cond, then, alt } => {
            for_each_expr(cond, f);
            for_each_expr(then, f);
            for_each_expr(alt, f);
        }
        ExprKind::Cast { target, operand } => {
            for_each_expr_in_type_ann(target, f);
            for_each_expr(operand, f);
        }
        ExprKind::Assign { target, value } => {
            for_each_expr(target, f);
            for_each_expr(value, f);
        }
        ExprKind::Range { lo, hi } => {
            for_each_expr(lo, f);
            for_each_expr(hi, f);
        }
        ExprKind::Length(operand) => for_each_expr(operand, f),
        ExprKind::Iterate { iterable, body, .. } => {
            for_each_expr(iterable, f);
            for_each_expr(body, f);
        }
        ExprKind::Repeat { cond, body } => {
            for_each_expr(cond, f);
            for_each_expr(body, f);
        }
    }
}

/// Visit every expression appearing in a statement, recursively.
pub fn for_each_expr_in_stmt<'a>(stmt: &'a Stmt, f: &mut impl FnMut(&'a Expr)) {
    match &stmt.kind {
        StmtKind::Expr(expr) => for_each_expr(expr, f),
        StmtKind::Return(Some(expr)) => for_each_expr(expr, f),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Import { .. } => {}
        StmtKind::VarDecl(decl) => {
            if let Some(ty) = &decl.ty {
                for_each_expr_in_type_ann(ty, f);
            }
            if let Some(init) = &decl.init {
                for_each_expr(init, f);
            }
        }
        StmtKind::FuncDecl(func) => {
            for param in func.receivers.iter().chain(&func.params) {
                if let Some(ty) = &param.ty {
                    for_each_expr_in_type_ann(ty, f);
                }
            }
            if let Some(ret) = &func.ret {
                for ty in ret {
                    for_each_expr_in_type_ann(ty, f);
                }
            }
            if let Some(body) = &func.body {
                for_each_expr(body, f);
            }
        }
        StmtKind::TypeDecl(decl) => {
            for field in &decl.fields {
                for_each_expr_in_type_ann(&field.ty, f);
            }
        }
        StmtKind::CondStmt { cond, then } => {
            for_each_expr(cond, f);
            for_each_expr_in_stmt(then, f);
        }
    }
}

fn for_each_expr_in_type_ann<'a>(ann: &'a TypeAnn, f: &mut impl FnMut(&'a Expr)) {
    match &ann.kind {
        TypeAnnKind::Named(_) => {}
        TypeAnnKind::Array(elem, size) => {
            for_each_expr_in_type_ann(elem, f);
            for_each_expr(size, f);
        }
    }
}

/// Mutable pre-order visit of an expression and everything nested in it.
/// Used by passes that annotate nodes in place (type stamping).
pub fn for_each_expr_mut(expr: &mut Expr, f: &mut impl FnMut(&mut Expr)) {
    f(expr);
    match &mut expr.kind {
        ExprKind::Int { .. }
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Char(_)
        | ExprKind::Ident(_)
        | ExprKind::Resource(_)
        | ExprKind::Process(_) => {}
        ExprKind::Binary { lhs, rhs, .. } => {
            for_each_expr_mut(lhs, f);
            for_each_expr_mut(rhs, f);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => for_each_expr_mut(operand, f),
        ExprKind::Call { receivers, args, .. } => {
            for receiver in receivers {
                for_each_expr_mut(receiver, f);
            }
            for arg in args {
                for_each_expr_mut(arg, f);
            }
        }
        ExprKind::Index { base, index } => {
            for_each_expr_mut(base, f);
            for_each_expr_mut(index, f);
        }
        ExprKind::Member { base, .. } => for_each_expr_mut(base, f),
        ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
            for elem in elems {
                for_each_expr_mut(elem, f);
            }
        }
        ExprKind::Block { stmts, tail } => {
            for stmt in stmts {
                for_each_expr_in_stmt_mut(stmt, f);
            }
            if let Some(tail) = tail {
                for_each_expr_mut(tail, f);
            }
        }
        ExprKind::Conditional { cond, then, alt } => {
            for_each_expr_mut(cond, f);
            for_each_expr_mut(then, f);
            for_each_expr_mut(alt, f);
        }
        ExprKind::Cast { operand, .. } => for_each_expr_mut(operand, f),
        ExprKind::Assign { target, value } => {
            for_each_expr_mut(target, f);
            for_each_expr_mut(value, f);
        }
        ExprKind::Range { lo, hi } => {
            for_each_expr_mut(lo, f);
            for_each_expr_mut(hi, f);
        }
        ExprKind::Iterate { iterable, body, .. } => {
            for_each_expr_mut(iterable, f);
            for_each_expr_mut(body, f);
        }
        ExprKind::Repeat { cond, body } => {
            for_each_expr_mut(cond, f);
            for_each_expr_mut(body, f);
        }
    }
}

/// Mutable variant of [`for_each_expr_in_stmt`].
pub fn for_each_expr_in_stmt_mut(stmt: &mut Stmt, f: &mut impl FnMut(&mut Expr)) {
    match &mut stmt.kind {
        StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => for_each_expr_mut(expr, f),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Import { .. } => {}
        StmtKind::VarDecl(decl) => {
            if let Some(init) = &mut decl.init {
                for_each_expr_mut(init, f);
            }
        }
        StmtKind::FuncDecl(func) => {
            if let Some(body) = &mut func.body {
                for_each_expr_mut(body, f);
            }
        }
        StmtKind::TypeDecl(_) => {}
        StmtKind::CondStmt { cond, then } => {
            for_each_expr_mut(cond, f);
            for_each_expr_in_stmt_mut(then, f);
        }
    }
}

/// Visit every statement in a statement tree: the statement itself, then
/// statements nested inside block expressions and conditional statements,
/// at any depth.
pub fn for_each_stmt<'a>(stmt: &'a Stmt, f: &mut impl FnMut(&'a Stmt)) {
    f(stmt);
    match &stmt.kind {
        StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => for_each_stmt_in_expr(expr, f),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Import { .. } => {}
        StmtKind::VarDecl(decl) => {
            if let Some(init) = &decl.init {
                for_each_stmt_in_expr(init, f);
            }
        }
        StmtKind::FuncDecl(func) => {
            if let Some(body) = &func.body {
                for_each_stmt_in_expr(body, f);
            }
        }
        StmtKind::TypeDecl(_) => {}
        StmtKind::CondStmt { cond, then } => {
            for_each_stmt_in_expr(cond, f);
            for_each_stmt(then, f);
        }
    }
}

/// Visit every statement nested inside an expression (block bodies, loop
/// bodies, conditional arms).
pub fn for_each_stmt_in_expr<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Stmt)) {
    match &expr.kind {
        ExprKind::Int { .. }
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Char(_)
        | ExprKind::Ident(_)
        | ExprKind::Resource(_)
        | ExprKind::Process(_) => {}
        ExprKind::Binary { lhs, rhs, .. } => {
            for_each_stmt_in_expr(lhs, f);
            for_each_stmt_in_expr(rhs, f);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => {
            for_each_stmt_in_expr(operand, f)
        }
        ExprKind::Call { receivers, args, .. } => {
            for receiver in receivers {
                for_each_stmt_in_expr(receiver, f);
            }
            for arg in args {
                for_each_stmt_in_expr(arg, f);
            }
        }
        ExprKind::Index { base, index } => {
            for_each_stmt_in_expr(base, f);
            for_each_stmt_in_expr(index, f);
        }
        ExprKind::Member { base, .. } => for_each_stmt_in_expr(base, f),
        ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
            for elem in elems {
                for_each_stmt_in_expr(elem, f);
            }
        }
        ExprKind::Block { stmts, tail } => {
            for stmt in stmts {
                for_each_stmt(stmt, f);
            }
            if let Some(tail) = tail {
                for_each_stmt_in_expr(tail, f);
            }
        }
        ExprKind::Conditional { cond, then, alt } => {
            for_each_stmt_in_expr(cond, f);
            for_each_stmt_in_expr(then, f);
            for_each_stmt_in_expr(alt, f);
        }
        ExprKind::Cast { operand, .. } => for_each_stmt_in_expr(operand, f),
        ExprKind::Assign { target, value } => {
            for_each_stmt_in_expr(target, f);
            for_each_stmt_in_expr(value, f);
        }
        ExprKind::Range { lo, hi } => {
            for_each_stmt_in_expr(lo, f);
            for_each_stmt_in_expr(hi, f);
        }
        ExprKind::Iterate { iterable, body, .. } => {
            for_each_stmt_in_expr(iterable, f);
            for_each_stmt_in_expr(body, f);
        }
        ExprKind::Repeat { cond, body } => {
            for_each_stmt_in_expr(cond, f);
            for_each_stmt_in_expr(body, f);
        }
    }
}
