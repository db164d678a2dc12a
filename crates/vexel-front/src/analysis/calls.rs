//! Call-graph edges collected from typed statements.
//!
//! A "call" is anything that dispatches to a function symbol: plain and
//! method calls, operator-overload binaries, and named-type iterations.
//! All three kinds were bound by the checker, so collection is a walk over
//! the binding side table.

use vexel_parser::ast::walk::for_each_expr_in_stmt;
use vexel_parser::ast::{ExprKind, Stmt};

use crate::program::InstanceId;
use crate::scope::{SymbolId, SymbolKind};
use crate::session::Session;

/// Collect the function symbols a statement calls into.
pub fn collect_calls(sess: &Session, instance: InstanceId, stmt: &Stmt) -> Vec<SymbolId> {
    let mut out = Vec::new();
    for_each_expr_in_stmt(stmt, &mut |expr| {
        let dispatches = matches!(
            expr.kind,
            ExprKind::Call { .. } | ExprKind::Binary { .. } | ExprKind::Iterate { .. }
        );
        if !dispatches {
            return;
        }
        if let Some(symbol) = sess.bindings.resolve(instance, expr.id) {
            if sess.symbols.get(symbol).kind == SymbolKind::Function {
                out.push(symbol);
            }
        }
    });
    out
}
