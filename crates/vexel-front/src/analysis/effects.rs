//! Effects: global writes and purity, closed transitively.

use rustc_hash::FxHashMap;

use vexel_common::diag::CompileError;
use vexel_parser::ast::walk::for_each_expr_in_stmt;
use vexel_parser::ast::ExprKind;

use crate::scope::SymbolId;

use super::{calls::collect_calls, mutability::lvalue_root, AnalysisCx, AnalysisFacts};

pub(crate) fn compute(cx: &AnalysisCx, facts: &mut AnalysisFacts) -> Result<(), CompileError> {
    // Direct observations per function.
    let mut direct_write: FxHashMap<SymbolId, bool> = FxHashMap::default();
    let mut calls_unknown: FxHashMap<SymbolId, bool> = FxHashMap::default();
    let mut callees: FxHashMap<SymbolId, Vec<SymbolId>> = FxHashMap::default();

    for &symbol in &facts.reachable {
        let info = cx.sess.symbols.get(symbol);
        if info.external {
            // Externals may do anything.
            direct_write.insert(symbol, true);
            calls_unknown.insert(symbol, true);
            callees.insert(symbol, Vec::new());
            continue;
        }
        let Some(fn_item) = cx.fn_items.get(&symbol) else { continue };
        let instance = fn_item.instance;
        let item = &cx.sess.merged.items[fn_item.item];

        let mut writes = false;
        let mut unknown = false;
        for_each_expr_in_stmt(&item.stmt, &mut |expr| match &expr.kind {
            ExprKind::Assign { target, .. } => {
                let Some(root) = lvalue_root(target) else { return };
                match cx.sess.bindings.resolve(instance, root.id) {
                    Some(root_sym) => {
                        if !cx.sess.symbols.get(root_sym).is_local {
                            writes = true;
                        }
                    }
                    None => unknown = true,
                }
            }
            ExprKind::Call { .. } => {
                if cx.sess.bindings.resolve(instance, expr.id).is_none() {
                    unknown = true;
                }
            }
            ExprKind::Process(_) => unknown = true,
            _ => {}
        });

        direct_write.insert(symbol, writes);
        calls_unknown.insert(symbol, unknown);
        callees.insert(symbol, collect_calls(cx.sess, instance, &item.stmt));
    }

    // Transitive closure of `writes_global`.
    let mut writes_global: FxHashMap<SymbolId, bool> = direct_write.clone();
    for (symbol, unknown) in &calls_unknown {
        if *unknown {
            writes_global.insert(*symbol, true);
        }
    }
    loop {
        let mut changed = false;
        for &symbol in &facts.reachable {
            if writes_global.get(&symbol).copied().unwrap_or(false) {
                continue;
            }
            let spreads = callees
                .get(&symbol)
                .is_some_and(|cs| cs.iter().any(|c| writes_global.get(c).copied().unwrap_or(true)));
            if spreads {
                writes_global.insert(symbol, true);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Purity: no writes, no unknown calls, no mutating receivers, and only
    // pure callees.
    let mut is_pure: FxHashMap<SymbolId, bool> = FxHashMap::default();
    for &symbol in &facts.reachable {
        let base = !writes_global.get(&symbol).copied().unwrap_or(true)
            && !calls_unknown.get(&symbol).copied().unwrap_or(true)
            && !facts
                .receiver_mutates
                .get(&symbol)
                .is_some_and(|flags| flags.iter().any(|f| *f));
        is_pure.insert(symbol, base);
    }
    loop {
        let mut changed = false;
        for &symbol in &facts.reachable {
            if !is_pure.get(&symbol).copied().unwrap_or(false) {
                continue;
            }
            let impure_callee = callees
                .get(&symbol)
                .is_some_and(|cs| cs.iter().any(|c| !is_pure.get(c).copied().unwrap_or(false)));
            if impure_callee {
                is_pure.insert(symbol, false);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    facts.writes_global = writes_global;
    facts.is_pure = is_pure;
    Ok(())
}
