//! Reachability: transitive call-graph closure.
//!
//! Roots are all exported functions, plus every function called from a
//! global initializer that did *not* evaluate at compile time (those
//! initializers need runtime code). External functions terminate the walk.

use vexel_common::diag::CompileError;
use vexel_common::worklist::Worklist;
use vexel_parser::ast::StmtKind;

use super::{calls::collect_calls, AnalysisCx, AnalysisFacts};

pub(crate) fn compute(cx: &AnalysisCx, facts: &mut AnalysisFacts) -> Result<(), CompileError> {
    let mut worklist = Worklist::new();

    for (&symbol, _) in &cx.fn_items {
        if cx.sess.symbols.get(symbol).exported {
            worklist.push(symbol);
        }
    }

    // Runtime-initialized globals root every function their initializers
    // call.
    for item in &cx.sess.merged.items {
        let StmtKind::VarDecl(decl) = &item.stmt.kind else { continue };
        if decl.init.is_none() {
            continue;
        }
        if cx.opt.constexpr_inits.contains(&(item.instance, item.stmt.id)) {
            continue;
        }
        for callee in collect_calls(cx.sess, item.instance, &item.stmt) {
            worklist.push(callee);
        }
    }

    while let Some(symbol) = worklist.pop() {
        if !facts.reachable.insert(symbol) {
            continue;
        }
        if cx.sess.symbols.get(symbol).external {
            continue;
        }
        let Some(fn_item) = cx.fn_items.get(&symbol) else { continue };
        let item = &cx.sess.merged.items[fn_item.item];
        for callee in collect_calls(cx.sess, fn_item.instance, &item.stmt) {
            if !facts.reachable.contains(&callee) {
                worklist.push(callee);
            }
        }
    }
    Ok(())
}
