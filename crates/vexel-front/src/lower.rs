//! Lowering: syntactic normalization of the merged module.
//!
//! Three rewrites, none of which changes inferred types:
//! - loop bodies (`@`, `@@`, repeat) are wrapped in a block when they are
//!   not one already;
//! - an iteration whose head checked as a boolean becomes a repeat node;
//! - multi-assignments `a, b = f()` desugar to a temporary plus field
//!   extractions.
//!
//! Running the pass twice yields an identical tree.

use log::debug;

use vexel_common::diag::CompileError;
use vexel_common::span::Span;
use vexel_parser::ast::expr::{Expr, ExprKind};
use vexel_parser::ast::stmt::{Linkage, Stmt, StmtKind, VarDecl};
use vexel_parser::ast::types::{Prim, Type};

use crate::program::InstanceId;
use crate::scope::{Symbol, SymbolId, SymbolKind};
use crate::session::Session;

pub fn lower_program(sess: &mut Session) -> Result<(), CompileError> {
    let mut merged = std::mem::take(&mut sess.merged);
    for item in &mut merged.items {
        lower_stmt(sess, item.instance, &mut item.stmt);
    }
    sess.merged = merged;
    debug!("lowered merged module");
    Ok(())
}

fn lower_stmt(sess: &mut Session, instance: InstanceId, stmt: &mut Stmt) {
    // Multi-assign desugaring replaces the whole statement.
    if let StmtKind::Expr(expr) = &stmt.kind {
        if matches!(
            &expr.kind,
            ExprKind::Assign { target, .. } if matches!(target.kind, ExprKind::TupleLit(_))
        ) {
            let StmtKind::Expr(expr) = std::mem::replace(
                &mut stmt.kind,
                StmtKind::Break, // placeholder, overwritten below
            ) else {
                unreachable!()
            };
            let mut block = desugar_multi_assign(sess, instance, expr);
            lower_expr(sess, instance, &mut block);
            stmt.kind = StmtKind::Expr(block);
            return;
        }
    }

    match &mut stmt.kind {
        StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => lower_expr(sess, instance, expr),
        StmtKind::VarDecl(decl) => {
            if let Some(init) = &mut decl.init {
                lower_expr(sess, instance, init);
            }
        }
        StmtKind::FuncDecl(func) => {
            if let Some(body) = &mut func.body {
                lower_expr(sess, instance, body);
            }
        }
        StmtKind::CondStmt { cond, then } => {
            lower_expr(sess, instance, cond);
            lower_stmt(sess, instance, then);
        }
        _ => {}
    }
}

fn lower_expr(sess: &mut Session, instance: InstanceId, expr: &mut Expr) {
    // Children first; the loop rewrites below inspect lowered children.
    match &mut expr.kind {
        ExprKind::Int { .. }
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Char(_)
        | ExprKind::Ident(_)
        | ExprKind::Resource(_)
        | ExprKind::Process(_) => {}
        ExprKind::Binary { lhs, rhs, .. } => {
            lower_expr(sess, instance, lhs);
            lower_expr(sess, instance, rhs);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => {
            lower_expr(sess, instance, operand)
        }
        ExprKind::Call { receivers, args, .. } => {
            for receiver in receivers {
                lower_expr(sess, instance, receiver);
            }
            for arg in args {
                lower_expr(sess, instance, arg);
            }
        }
        ExprKind::Index { base, index } => {
            lower_expr(sess, instance, base);
            lower_expr(sess, instance, index);
        }
        ExprKind::Member { base, .. } => lower_expr(sess, instance, base),
        ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
            for elem in elems {
                lower_expr(sess, instance, elem);
            }
        }
        ExprKind::Block { stmts, tail } => {
            for stmt in stmts {
                lower_stmt(sess, instance, stmt);
            }
            if let Some(tail) = tail {
                lower_expr(sess, instance, tail);
            }
        }
        ExprKind::Conditional { cond, then, alt } => {
            lower_expr(sess, instance, cond);
            lower_expr(sess, instance, then);
            lower_expr(sess, instance, alt);
        }
        ExprKind::Cast { operand, .. } => lower_expr(sess, instance, operand),
        ExprKind::Assign { target, value } => {
            lower_expr(sess, instance, target);
            lower_expr(sess, instance, value);
        }
        ExprKind::Range { lo, hi } => {
            lower_expr(sess, instance, lo);
            lower_expr(sess, instance, hi);
        }
        ExprKind::Iterate { iterable, body, .. } => {
            lower_expr(sess, instance, iterable);
            lower_expr(sess, instance, body);
        }
        ExprKind::Repeat { cond, body } => {
            lower_expr(sess, instance, cond);
            lower_expr(sess, instance, body);
        }
    }

    // Iteration with a boolean head is a repeat loop.
    let bool_head = matches!(
        &expr.kind,
        ExprKind::Iterate { iterable, .. } if head_is_bool(iterable)
    );
    if bool_head {
        let ExprKind::Iterate { iterable, body, sorted } =
            std::mem::replace(&mut expr.kind, ExprKind::Int { value: 0, suffix: None })
        else {
            unreachable!()
        };
        debug_assert!(!sorted, "the checker rejects sorted repeats");
        expr.kind = ExprKind::Repeat { cond: iterable, body };
    }

    // Loop bodies become blocks.
    match &mut expr.kind {
        ExprKind::Iterate { body, .. } | ExprKind::Repeat { body, .. } => {
            if !matches!(body.kind, ExprKind::Block { .. }) {
                let inner = std::mem::replace(&mut **body, *placeholder());
                **body = wrap_in_block(sess, inner);
            }
        }
        _ => {}
    }
}

fn head_is_bool(head: &Expr) -> bool {
    matches!(head.ty, Some(Type::Prim(Prim::Bool)))
}

fn placeholder() -> Box<Expr> {
    Box::new(Expr::new(
        vexel_parser::ast::NodeId(u32::MAX),
        Span::synthetic(vexel_common::span::FileId(0)),
        ExprKind::Int { value: 0, suffix: None },
    ))
}

fn wrap_in_block(sess: &mut Session, inner: Expr) -> Expr {
    let id = sess.program.ids.mint();
    let span = inner.span;
    let ty = inner.ty.clone();
    let mut block = Expr::new(id, span, ExprKind::Block { stmts: Vec::new(), tail: Some(Box::new(inner)) });
    block.ty = ty;
    block
}

/// `a, b = f()` becomes `{ __mrN = f(); a = __mrN.__0; b = __mrN.__1; }`.
fn desugar_multi_assign(sess: &mut Session, instance: InstanceId, assign: Expr) -> Expr {
    let ExprKind::Assign { target, value } = assign.kind else { unreachable!() };
    let ExprKind::TupleLit(elems) = target.kind else { unreachable!() };
    let span = assign.span;

    let tuple_ty = value.ty.clone();
    let field_types: Vec<Option<Type>> = match &tuple_ty {
        Some(Type::Named(name)) => match sess.tuple_types.get(name) {
            Some(fields) => fields.iter().map(|t| Some(t.clone())).collect(),
            None => vec![None; elems.len()],
        },
        _ => vec![None; elems.len()],
    };

    let module = sess.program.instance(instance).module;
    let scope = sess.program.instance(instance).scope;

    // The temporary.
    let tmp_name = format!("__mr{}", assign.id.0);
    let tmp_symbol = sess.symbols.add(Symbol {
        id: SymbolId(0),
        kind: SymbolKind::Variable,
        name: tmp_name.clone(),
        ty: tuple_ty.clone(),
        mutable: false,
        exported: false,
        external: false,
        decl: assign.id,
        decl_span: span,
        module,
        instance,
        scope,
        is_local: true,
        expr_param: false,
    });

    let mut stmts = Vec::with_capacity(1 + elems.len());
    let decl_id = sess.program.ids.mint();
    sess.bindings.bind(instance, decl_id, tmp_symbol);
    stmts.push(Stmt::new(
        decl_id,
        span,
        StmtKind::VarDecl(VarDecl {
            name: tmp_name.clone(),
            ty: None,
            init: Some(*value),
            mutable: false,
            linkage: Linkage::Normal,
        }),
    ));

    for (i, elem) in elems.into_iter().enumerate() {
        let field_ty = field_types.get(i).cloned().flatten();

        let tmp_ref_id = sess.program.ids.mint();
        sess.bindings.bind(instance, tmp_ref_id, tmp_symbol);
        let mut tmp_ref = Expr::new(tmp_ref_id, span, ExprKind::Ident(tmp_name.clone()));
        tmp_ref.ty = tuple_ty.clone();
        if let Some(ty) = &tuple_ty {
            sess.types.note_expr_type(tmp_ref_id, ty);
        }

        let member_id = sess.program.ids.mint();
        let mut member = Expr::new(
            member_id,
            span,
            ExprKind::Member { base: Box::new(tmp_ref), field: format!("__{i}") },
        );
        member.ty = field_ty.clone();
        if let Some(ty) = &field_ty {
            sess.types.note_expr_type(member_id, ty);
        }

        let assign_id = sess.program.ids.mint();
        let elem_assign = Expr::new(
            assign_id,
            span,
            ExprKind::Assign { target: Box::new(elem), value: Box::new(member) },
        );

        let stmt_id = sess.program.ids.mint();
        stmts.push(Stmt::new(stmt_id, span, StmtKind::Expr(elem_assign)));
    }

    let block_id = sess.program.ids.mint();
    Expr::new(block_id, span, ExprKind::Block { stmts, tail: None })
}
