//! Used globals and used type names, transitively from reachable code.

use rustc_hash::FxHashSet;

use vexel_common::diag::CompileError;
use vexel_common::worklist::Worklist;
use vexel_parser::ast::types::Type;
use vexel_parser::ast::walk::for_each_expr_in_stmt;
use vexel_parser::ast::{ExprKind, Stmt, StmtKind};

use crate::scope::{SymbolId, SymbolKind};

use super::{AnalysisCx, AnalysisFacts};

pub(crate) fn compute(cx: &AnalysisCx, facts: &mut AnalysisFacts) -> Result<(), CompileError> {
    let mut globals: Worklist<SymbolId> = Worklist::new();
    let mut types: FxHashSet<String> = FxHashSet::default();

    // Reachable function signatures seed the type walk.
    for &symbol in &facts.reachable {
        let Some(sig) = cx.sess.sig(symbol) else { continue };
        for ty in sig.receivers.iter().chain(&sig.params).filter_map(|p| p.ty.as_ref()) {
            note_type(ty, &mut types);
        }
        if let Some(ret) = &sig.ret {
            note_type(ret, &mut types);
        }
    }

    // Reachable bodies reference globals and types.
    for &symbol in &facts.reachable {
        let Some(fn_item) = cx.fn_items.get(&symbol) else { continue };
        let item = &cx.sess.merged.items[fn_item.item];
        walk_stmt(cx, fn_item.instance, &item.stmt, &mut globals, &mut types);
    }

    // Used globals' initializers re-enter the walk.
    while let Some(global) = globals.pop() {
        if !facts.used_globals.insert(global) {
            continue;
        }
        let info = cx.sess.symbols.get(global);
        if let Some(ty) = &info.ty {
            note_type(ty, &mut types);
        }
        let decl = info.decl;
        let instance = info.instance;
        if let Some(item) = cx
            .sess
            .merged
            .items
            .iter()
            .find(|i| i.instance == instance && i.stmt.id == decl)
        {
            walk_stmt(cx, instance, &item.stmt, &mut globals, &mut types);
        }
    }

    // Field types of used records continue the walk to fixpoint.
    let mut frontier: Vec<String> = types.iter().cloned().collect();
    while let Some(name) = frontier.pop() {
        let Some(fields) = cx.sess.fields_of(crate::program::ENTRY_INSTANCE, &name) else {
            continue;
        };
        for (_, ty) in fields {
            let mut fresh = FxHashSet::default();
            note_type(&ty, &mut fresh);
            for name in fresh {
                if types.insert(name.clone()) {
                    frontier.push(name);
                }
            }
        }
    }

    facts.used_types = types;
    Ok(())
}

fn walk_stmt(
    cx: &AnalysisCx,
    instance: crate::program::InstanceId,
    stmt: &Stmt,
    globals: &mut Worklist<SymbolId>,
    types: &mut FxHashSet<String>,
) {
    if let StmtKind::VarDecl(_) = &stmt.kind {
        // Initializer expressions are visited below.
    }
    for_each_expr_in_stmt(stmt, &mut |expr| {
        if let Some(ty) = &expr.ty {
            note_type(ty, types);
        }
        if let ExprKind::Ident(_) = &expr.kind {
            if let Some(symbol) = cx.sess.bindings.resolve(instance, expr.id) {
                let info = cx.sess.symbols.get(symbol);
                if !info.is_local
                    && matches!(info.kind, SymbolKind::Variable | SymbolKind::Constant)
                {
                    globals.push(symbol);
                }
            }
        }
    });
}

fn note_type(ty: &Type, types: &mut FxHashSet<String>) {
    match ty {
        Type::Named(name) => {
            types.insert(name.clone());
        }
        Type::Array(elem, _) => note_type(elem, types),
        _ => {}
    }
}
