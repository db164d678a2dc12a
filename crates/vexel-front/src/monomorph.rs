//! Monomorphization and the merged module.
//!
//! The checker materializes each generic instantiation synchronously (it
//! needs the inferred return type at the call site) and queues it in the
//! pending FIFO. This pass drains the queue -- the queue can in principle
//! grow while draining, hence the loop -- and then builds the merged
//! module: every instance's top-level statements in initialization order
//! (imports topologically first, declaration order within a module),
//! followed by the instance's instantiations. Generic templates are not
//! emitted. The cloned statements get their inferred types stamped on so
//! the back half of the pipeline and the backend see a typed tree.

use log::debug;
use rustc_hash::FxHashSet;

use vexel_common::diag::CompileError;
use vexel_parser::ast::walk::for_each_expr_in_stmt_mut;
use vexel_parser::ast::{Stmt, StmtKind};

use crate::program::{InstanceId, MergedItem, MergedModule};
use crate::session::Session;

pub fn monomorphize(sess: &mut Session) -> Result<(), CompileError> {
    // Drain the pending FIFO, skipping duplicates by identity. New work
    // cannot appear here in practice (the checker already checked every
    // instantiation body), but the loop matches the contract.
    let mut seen = FxHashSet::default();
    let mut emitted: Vec<usize> = Vec::new();
    while let Some(index) = sess.program.pending_instantiations.pop_front() {
        if index >= sess.program.instantiations.len() {
            return Err(CompileError::internal("pending instantiation out of range", None));
        }
        if seen.insert(index) {
            emitted.push(index);
        }
    }
    debug!("monomorphizer emitted {} instantiation(s)", emitted.len());

    let merged = build_merged(sess, &emitted);
    sess.merged = merged;
    Ok(())
}

fn build_merged(sess: &Session, emitted: &[usize]) -> MergedModule {
    // Topological emission: imported instances come before their importer,
    // in resolution order; within an instance, declaration order.
    let mut order = Vec::new();
    let mut visited = FxHashSet::default();
    let instance_count = sess.program.instances.len();
    emit_instance(sess, crate::program::ENTRY_INSTANCE, &mut visited, &mut order);
    // Instances that were resolved but never imported by the entry tree
    // do not exist at runtime; they are skipped (there are none today).
    debug_assert_eq!(visited.len(), instance_count, "every instance is reachable from the entry");

    let mut items = Vec::new();
    for instance in order {
        let module = sess.program.instance(instance).module;
        let statements: Vec<Stmt> = sess.program.modules[module.0 as usize]
            .module
            .statements
            .iter()
            .filter(|stmt| match &stmt.kind {
                // Templates are replaced by their instantiations; imports
                // have already shaped the instance order.
                StmtKind::FuncDecl(func) => !func.is_generic(),
                StmtKind::Import { .. } => false,
                _ => true,
            })
            .cloned()
            .collect();
        for mut stmt in statements {
            stamp_types(&mut stmt, sess);
            items.push(MergedItem { instance, stmt });
        }
        for &index in emitted {
            if sess.program.instantiations[index].0 == instance {
                let mut stmt = sess.program.instantiations[index].1.clone();
                stamp_types(&mut stmt, sess);
                items.push(MergedItem { instance, stmt });
            }
        }
    }
    MergedModule { items }
}

fn emit_instance(
    sess: &Session,
    instance: InstanceId,
    visited: &mut FxHashSet<InstanceId>,
    order: &mut Vec<InstanceId>,
) {
    if !visited.insert(instance) {
        return;
    }
    let children: Vec<InstanceId> = sess
        .program
        .imports
        .iter()
        .filter(|(importer, _)| *importer == instance)
        .map(|(_, imported)| *imported)
        .collect();
    for child in children {
        emit_instance(sess, child, visited, order);
    }
    order.push(instance);
}

/// Copy the checker's inferred types from the side map onto the cloned
/// nodes, giving the merged module the denormalized `expr.ty` cache.
fn stamp_types(stmt: &mut Stmt, sess: &Session) {
    for_each_expr_in_stmt_mut(stmt, &mut |expr| {
        expr.ty = sess.types.expr_type(expr.id).cloned();
    });
}
