//! Reentrancy variants.
//!
//! Every reachable function ends with a non-empty subset of {R, N}.
//! Exported entries seed their variant from `reentrant`/`nonreentrant`
//! annotations (conflicting annotations are an error) or the backend's
//! default. Variants flow from caller to callee. Runtime-initialized
//! globals force N onto everything their initializers call. A reentrant
//! path reaching a non-reentrant external (or a function pinned
//! non-reentrant by annotation) is a hard error reported at the entry's
//! declaration site.

use rustc_hash::FxHashSet;

use vexel_common::diag::CompileError;
use vexel_common::worklist::Worklist;
use vexel_parser::ast::{Stmt, StmtKind};

use crate::backend::{BackendRequirements, Reentrancy};
use crate::scope::SymbolId;

use super::{calls::collect_calls, AnalysisCx, AnalysisFacts};

pub(crate) fn compute(
    cx: &AnalysisCx,
    reqs: &BackendRequirements,
    facts: &mut AnalysisFacts,
) -> Result<(), CompileError> {
    // Annotation-pinned variants (and conflict detection) first.
    let mut pinned_nonreentrant: FxHashSet<SymbolId> = FxHashSet::default();
    let mut pinned_reentrant: FxHashSet<SymbolId> = FxHashSet::default();
    for (&symbol, fn_item) in &cx.fn_items {
        let item = &cx.sess.merged.items[fn_item.item];
        let reentrant = has_annotation(&item.stmt, "reentrant");
        let nonreentrant = has_annotation(&item.stmt, "nonreentrant");
        if reentrant && nonreentrant {
            return Err(CompileError::new(
                format!(
                    "`{}` is annotated both reentrant and nonreentrant",
                    cx.sess.symbols.get(symbol).name
                ),
                item.stmt.span,
            ));
        }
        if reentrant {
            pinned_reentrant.insert(symbol);
        }
        if nonreentrant {
            pinned_nonreentrant.insert(symbol);
        }
    }

    // Propagate from each exported entry separately so that a reentrancy
    // violation can name the entry that caused it.
    let mut entries: Vec<SymbolId> = facts
        .reachable
        .iter()
        .copied()
        .filter(|s| cx.sess.symbols.get(*s).exported)
        .collect();
    entries.sort();
    for entry in entries {
        let variant = if pinned_reentrant.contains(&entry) {
            Reentrancy::Reentrant
        } else if pinned_nonreentrant.contains(&entry) {
            Reentrancy::Nonreentrant
        } else {
            reqs.default_entry_reentrancy
        };
        propagate(cx, facts, entry, variant, &pinned_nonreentrant)?;
    }

    // Runtime global initializers run in non-reentrant context.
    for item in &cx.sess.merged.items {
        let StmtKind::VarDecl(decl) = &item.stmt.kind else { continue };
        if decl.init.is_none()
            || cx.opt.constexpr_inits.contains(&(item.instance, item.stmt.id))
        {
            continue;
        }
        for callee in collect_calls(cx.sess, item.instance, &item.stmt) {
            propagate(cx, facts, callee, Reentrancy::Nonreentrant, &pinned_nonreentrant)?;
        }
    }

    Ok(())
}

/// Flow one variant from `entry` through everything it reaches.
fn propagate(
    cx: &AnalysisCx,
    facts: &mut AnalysisFacts,
    entry: SymbolId,
    variant: Reentrancy,
    pinned_nonreentrant: &FxHashSet<SymbolId>,
) -> Result<(), CompileError> {
    let entry_info = cx.sess.symbols.get(entry);
    let entry_span = entry_info.decl_span;
    let entry_name = entry_info.name.clone();

    let mut worklist = Worklist::new();
    worklist.push(entry);
    let mut visited: FxHashSet<SymbolId> = FxHashSet::default();

    while let Some(symbol) = worklist.pop() {
        if !visited.insert(symbol) {
            continue;
        }
        if variant == Reentrancy::Reentrant && pinned_nonreentrant.contains(&symbol) {
            let callee = cx.sess.symbols.get(symbol);
            return Err(CompileError::new(
                format!(
                    "reentrant entry `{entry_name}` reaches nonreentrant `{}`",
                    callee.name
                ),
                entry_span,
            ));
        }
        let set = facts.reentrancy.entry(symbol).or_default();
        match variant {
            Reentrancy::Reentrant => set.reentrant = true,
            Reentrancy::Nonreentrant => set.nonreentrant = true,
        }
        if cx.sess.symbols.get(symbol).external {
            continue;
        }
        let Some(fn_item) = cx.fn_items.get(&symbol) else { continue };
        let item = &cx.sess.merged.items[fn_item.item];
        for callee in collect_calls(cx.sess, fn_item.instance, &item.stmt) {
            worklist.push(callee);
        }
    }
    Ok(())
}

fn has_annotation(stmt: &Stmt, name: &str) -> bool {
    stmt.annotations.iter().any(|a| a.name == name)
}
