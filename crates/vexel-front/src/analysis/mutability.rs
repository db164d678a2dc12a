//! Receiver mutability, variable mutability, and receiver-ref variants.

use rustc_hash::{FxHashMap, FxHashSet};

use vexel_common::diag::CompileError;
use vexel_parser::ast::walk::for_each_expr_in_stmt;
use vexel_parser::ast::{Expr, ExprKind, StmtKind};

use crate::scope::{SymbolId, SymbolKind};

use super::{AnalysisCx, AnalysisFacts, VarMutability};

pub(crate) fn compute(cx: &AnalysisCx, facts: &mut AnalysisFacts) -> Result<(), CompileError> {
    receiver_mutability(cx, facts);
    ref_variants(cx, facts);
    variable_mutability(cx, facts);
    Ok(())
}

/// Per-function, per-receiver mutation flags, closed over forwarding: a
/// receiver is mutable if the body writes through it, or if it is passed
/// as the i-th receiver to a callee whose position i mutates. Externals
/// conservatively mutate everything.
fn receiver_mutability(cx: &AnalysisCx, facts: &mut AnalysisFacts) {
    let mut mutates: FxHashMap<SymbolId, Vec<bool>> = FxHashMap::default();
    for &symbol in &facts.reachable {
        let Some(sig) = cx.sess.sig(symbol) else { continue };
        let initial = if sig.external {
            vec![true; sig.receivers.len()]
        } else {
            vec![false; sig.receivers.len()]
        };
        mutates.insert(symbol, initial);
    }

    // Fixpoint: each pass may promote forwarded receivers.
    loop {
        let mut changed = false;
        for &symbol in &facts.reachable {
            let Some(fn_item) = cx.fn_items.get(&symbol) else { continue };
            let Some(sig) = cx.sess.sig(symbol) else { continue };
            if sig.external || sig.receivers.is_empty() {
                continue;
            }
            let receiver_symbols: Vec<SymbolId> =
                sig.receivers.iter().map(|p| p.symbol).collect();
            let instance = fn_item.instance;
            let item = &cx.sess.merged.items[fn_item.item];

            let mut promoted: Vec<usize> = Vec::new();
            for_each_expr_in_stmt(&item.stmt, &mut |expr| match &expr.kind {
                ExprKind::Assign { target, .. } => {
                    if let Some(root) = lvalue_root(target) {
                        if let Some(root_sym) = cx.sess.bindings.resolve(instance, root.id) {
                            if let Some(i) =
                                receiver_symbols.iter().position(|s| *s == root_sym)
                            {
                                promoted.push(i);
                            }
                        }
                    }
                }
                ExprKind::Call { receivers, .. } if !receivers.is_empty() => {
                    let Some(callee) = cx.sess.bindings.resolve(instance, expr.id) else {
                        return;
                    };
                    let Some(callee_mutates) = mutates.get(&callee) else { return };
                    let callee_mutates = callee_mutates.clone();
                    for (j, receiver) in receivers.iter().enumerate() {
                        if !callee_mutates.get(j).copied().unwrap_or(false) {
                            continue;
                        }
                        let Some(recv_sym) = cx.sess.bindings.resolve(instance, receiver.id)
                        else {
                            continue;
                        };
                        if let Some(i) = receiver_symbols.iter().position(|s| *s == recv_sym) {
                            promoted.push(i);
                        }
                    }
                }
                _ => {}
            });

            if let Some(flags) = mutates.get_mut(&symbol) {
                for i in promoted {
                    if let Some(flag) = flags.get_mut(i) {
                        if !*flag {
                            *flag = true;
                            changed = true;
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    facts.receiver_mutates = mutates;
}

/// Per-call-site receiver patterns: `M` when the receiver is an
/// addressable, mutable lvalue at the call site, `N` otherwise.
fn ref_variants(cx: &AnalysisCx, facts: &mut AnalysisFacts) {
    for &symbol in &facts.reachable {
        let Some(fn_item) = cx.fn_items.get(&symbol) else { continue };
        let instance = fn_item.instance;
        let item = &cx.sess.merged.items[fn_item.item];
        for_each_expr_in_stmt(&item.stmt, &mut |expr| {
            let ExprKind::Call { receivers, .. } = &expr.kind else { return };
            if receivers.is_empty() {
                return;
            }
            let Some(callee) = cx.sess.bindings.resolve(instance, expr.id) else { return };
            if cx.sess.symbols.get(callee).kind != SymbolKind::Function {
                return;
            }
            let mut pattern = String::with_capacity(receivers.len());
            for receiver in receivers {
                let mutable = receiver
                    .as_ident()
                    .and_then(|_| cx.sess.bindings.resolve(instance, receiver.id))
                    .is_some_and(|sym| cx.sess.symbols.get(sym).mutable);
                pattern.push(if mutable { 'M' } else { 'N' });
            }
            facts.ref_variants.entry(callee).or_default().insert(pattern);
        });
    }
}

/// Classify every declared variable: `Mutable` when declared mutable and
/// actually written; `Constexpr` when the initializer evaluated at compile
/// time (or is a literal array); `NonMutableRuntime` otherwise.
fn variable_mutability(cx: &AnalysisCx, facts: &mut AnalysisFacts) {
    // Which symbols are written anywhere in the merged module.
    let mut written: FxHashSet<SymbolId> = FxHashSet::default();
    for item in &cx.sess.merged.items {
        let instance = item.instance;
        for_each_expr_in_stmt(&item.stmt, &mut |expr| {
            if let ExprKind::Assign { target, .. } = &expr.kind {
                let roots: Vec<&Expr> = match &target.kind {
                    ExprKind::TupleLit(elems) => elems.iter().collect(),
                    _ => lvalue_root(target).into_iter().collect(),
                };
                for root in roots {
                    if let Some(symbol) = cx.sess.bindings.resolve(instance, root.id) {
                        written.insert(symbol);
                    }
                }
            }
        });
    }

    for item in &cx.sess.merged.items {
        let instance = item.instance;
        let mut classify = |stmt: &vexel_parser::ast::Stmt| {
            let StmtKind::VarDecl(decl) = &stmt.kind else { return };
            let Some(symbol) = cx.sess.bindings.resolve(instance, stmt.id) else { return };
            let info = cx.sess.symbols.get(symbol);
            let class = if info.mutable && written.contains(&symbol) {
                VarMutability::Mutable
            } else if cx.opt.constexpr_inits.contains(&(instance, stmt.id))
                || decl.init.as_ref().is_some_and(is_literal_array)
            {
                VarMutability::Constexpr
            } else {
                VarMutability::NonMutableRuntime
            };
            facts.var_mutability.insert(symbol, class);
        };
        vexel_parser::ast::walk::for_each_stmt(&item.stmt, &mut classify);
    }
}

fn is_literal_array(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::ArrayLit(elems) => elems.iter().all(|e| {
            matches!(
                e.kind,
                ExprKind::Int { .. } | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Char(_)
            ) || is_literal_array(e)
        }),
        _ => false,
    }
}

/// The root identifier of an lvalue chain, if any.
pub(crate) fn lvalue_root(expr: &Expr) -> Option<&Expr> {
    match &expr.kind {
        ExprKind::Ident(_) => Some(expr),
        ExprKind::Index { base, .. } | ExprKind::Member { base, .. } => lvalue_root(base),
        _ => None,
    }
}
