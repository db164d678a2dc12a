//! Canonical single-line rendering of AST nodes.
//!
//! Used for re-import equivalence (span-insensitive declaration equality),
//! for log tracing, and by tests that assert on residualized shapes. The
//! rendering is not meant to round-trip through the parser; it is a stable
//! canonical form.

use std::fmt::Write;

use crate::ast::expr::{Expr, ExprKind};
use crate::ast::stmt::{Linkage, Param, Stmt, StmtKind};
use crate::ast::types::{TypeAnn, TypeAnnKind};

pub fn render_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

pub fn render_stmt(stmt: &Stmt) -> String {
    let mut out = String::new();
    write_stmt(&mut out, stmt);
    out
}

fn write_expr(out: &mut String, expr: &Expr) {
    match &expr.kind {
        ExprKind::Int { value, suffix } => {
            let _ = write!(out, "{value}");
            if let Some(suffix) = suffix {
                let _ = write!(out, "{suffix}");
            }
        }
        ExprKind::Float(v) => {
            let _ = write!(out, "{v:?}");
        }
        ExprKind::Str(s) => {
            let _ = write!(out, "{s:?}");
        }
        ExprKind::Char(c) => {
            let _ = write!(out, "'\\{c}'");
        }
        ExprKind::Ident(name) => out.push_str(name),
        ExprKind::Binary { op, lhs, rhs } => {
            out.push('(');
            write_expr(out, lhs);
            let _ = write!(out, " {} ", op.symbol());
            write_expr(out, rhs);
            out.push(')');
        }
        ExprKind::Unary { op, operand } => {
            out.push_str(op.symbol());
            write_expr(out, operand);
        }
        ExprKind::Call { callee, receivers, args } => {
            if !receivers.is_empty() {
                out.push('(');
                write_list(out, receivers);
                out.push_str(").");
            }
            out.push_str(callee);
            out.push('(');
            write_list(out, args);
            out.push(')');
        }
        ExprKind::Index { base, index } => {
            write_expr(out, base);
            out.push('[');
            write_expr(out, index);
            out.push(']');
        }
        ExprKind::Member { base, field } => {
            write_expr(out, base);
            out.push('.');
            out.push_str(field);
        }
        ExprKind::ArrayLit(elems) => {
            out.push('[');
            write_list(out, elems);
            out.push(']');
        }
        ExprKind::TupleLit(elems) => {
            out.push('(');
            write_list(out, elems);
            out.push(')');
        }
        ExprKind::Block { stmts, tail } => {
            out.push_str("{ ");
            for stmt in stmts {
                write_stmt(out, stmt);
                out.push(' ');
            }
            if let Some(tail) = tail {
                write_expr(out, tail);
                out.push(' ');
            }
            out.push('}');
        }
        ExprKind::Conditional { cond, then, alt } => {
            out.push('(');
            write_expr(out, cond);
            out.push_str(" ? ");
            write_expr(out, then);
            out.push_str(" : ");
            write_expr(out, alt);
            out.push(')');
        }
        ExprKind::Cast { target, operand } => {
            out.push('#');
            write_type_ann(out, target);
            out.push('(');
            write_expr(out, operand);
            out.push(')');
        }
        ExprKind::Assign { target, value } => {
            write_expr(out, target);
            out.push_str(" = ");
            write_expr(out, value);
        }
        ExprKind::Range { lo, hi } => {
            write_expr(out, lo);
            out.push_str("..");
            write_expr(out, hi);
        }
        ExprKind::Length(operand) => {
            out.push('|');
            write_expr(out, operand);
            out.push('|');
        }
        ExprKind::Iterate { iterable, body, sorted } => {
            write_expr(out, iterable);
            out.push_str(if *sorted { " @@ " } else { " @ " });
            write_expr(out, body);
        }
        ExprKind::Repeat { cond, body } => {
            out.push('(');
            write_expr(out, cond);
            out.push_str(") @ ");
            write_expr(out, body);
        }
        ExprKind::Resource(path) => {
            let _ = write!(out, "%{path:?}");
        }
        ExprKind::Process(cmd) => {
            let _ = write!(out, "`{cmd}`");
        }
    }
}

fn write_list(out: &mut String, exprs: &[Expr]) {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, expr);
    }
}

fn write_stmt(out: &mut String, stmt: &Stmt) {
    for ann in &stmt.annotations {
        let _ = write!(out, "[[{}", ann.name);
        if !ann.args.is_empty() {
            let _ = write!(out, "({})", ann.args.join(", "));
        }
        out.push_str("]] ");
    }
    match &stmt.kind {
        StmtKind::Expr(expr) => {
            write_expr(out, expr);
            out.push(';');
        }
        StmtKind::Return(value) => {
            out.push_str("=>");
            if let Some(value) = value {
                out.push(' ');
                write_expr(out, value);
            }
            out.push(';');
        }
        StmtKind::Break => out.push_str("<<;"),
        StmtKind::Continue => out.push_str(">>;"),
        StmtKind::VarDecl(decl) => {
            if decl.mutable {
                out.push('~');
            }
            match decl.linkage {
                Linkage::Exported => out.push('^'),
                Linkage::External => out.push('!'),
                Linkage::Normal => {}
            }
            out.push_str(&decl.name);
            if let Some(ty) = &decl.ty {
                out.push_str(": #");
                write_type_ann(out, ty);
            }
            if let Some(init) = &decl.init {
                out.push_str(" = ");
                write_expr(out, init);
            }
            out.push(';');
        }
        StmtKind::FuncDecl(func) => {
            out.push('&');
            if func.exported {
                out.push('^');
            }
            if func.external {
                out.push('!');
            }
            if !func.receivers.is_empty() {
                out.push('(');
                write_params(out, &func.receivers);
                out.push(')');
            }
            if let Some(ns) = &func.type_ns {
                let _ = write!(out, "#{ns}::");
            }
            out.push_str(&func.name);
            out.push('(');
            write_params(out, &func.params);
            out.push(')');
            if let Some(ret) = &func.ret {
                out.push_str(" -> ");
                if ret.len() > 1 {
                    out.push('(');
                }
                for (i, ty) in ret.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('#');
                    write_type_ann(out, ty);
                }
                if ret.len() > 1 {
                    out.push(')');
                }
            }
            match &func.body {
                Some(body) => {
                    out.push(' ');
                    write_expr(out, body);
                }
                None => out.push(';'),
            }
        }
        StmtKind::TypeDecl(decl) => {
            let _ = write!(out, "#{} {{ ", decl.name);
            for (i, field) in decl.fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}: #", field.name);
                write_type_ann(out, &field.ty);
            }
            out.push_str(" }");
        }
        StmtKind::Import { segments } => {
            for segment in segments {
                let _ = write!(out, "::{segment}");
            }
            out.push(';');
        }
        StmtKind::CondStmt { cond, then } => {
            write_expr(out, cond);
            out.push_str(" ? ");
            write_stmt(out, then);
        }
    }
}

fn write_params(out: &mut String, params: &[Param]) {
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if param.is_expr_param {
            out.push('$');
        }
        out.push_str(&param.name);
        if let Some(ty) = &param.ty {
            out.push_str(": #");
            write_type_ann(out, ty);
        }
    }
}

fn write_type_ann(out: &mut String, ann: &TypeAnn) {
    match &ann.kind {
        TypeAnnKind::Named(name) => out.push_str(name),
        TypeAnnKind::Array(elem, size) => {
            write_type_ann(out, elem);
            out.push('[');
            write_expr(out, size);
            out.push(']');
        }
    }
}
