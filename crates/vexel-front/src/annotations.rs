//! Annotation validation.
//!
//! The recognized set is deliberately small; anything else is rejected at
//! this boundary so later passes can trust annotation names. A recognized
//! annotation on a node where it has no meaning is only a warning and
//! propagates unchanged.

use vexel_common::diag::{CompileError, Diagnostic};
use vexel_parser::ast::walk::for_each_stmt;
use vexel_parser::ast::{Stmt, StmtKind};

use crate::session::Session;

/// Annotation names the frontend understands.
pub const KNOWN_ANNOTATIONS: &[&str] = &["hot", "cold", "reentrant", "nonreentrant", "nonbanked"];

/// Annotations that only make sense on function declarations.
const FUNCTION_ONLY: &[&str] = &["hot", "cold", "reentrant", "nonreentrant", "nonbanked"];

pub fn validate_annotations(sess: &mut Session) -> Result<(), CompileError> {
    let modules = std::mem::take(&mut sess.program.modules);
    let mut result = Ok(());
    'outer: for info in &modules {
        for stmt in &info.module.statements {
            let mut failed = None;
            for_each_stmt(stmt, &mut |s| {
                if failed.is_none() {
                    failed = check_stmt(sess, s).err();
                }
            });
            if let Some(err) = failed {
                result = Err(err);
                break 'outer;
            }
        }
    }
    sess.program.modules = modules;
    result
}

fn check_stmt(sess: &mut Session, stmt: &Stmt) -> Result<(), CompileError> {
    for ann in &stmt.annotations {
        if !KNOWN_ANNOTATIONS.contains(&ann.name.as_str()) {
            return Err(CompileError::new(
                format!("unknown annotation `{}`", ann.name),
                ann.span,
            ));
        }
        let placement_ok = match &stmt.kind {
            StmtKind::FuncDecl(_) => true,
            _ => !FUNCTION_ONLY.contains(&ann.name.as_str()),
        };
        if !placement_ok {
            sess.warnings.push(Diagnostic::warning(
                format!("annotation `{}` has no effect here", ann.name),
                Some(ann.span),
            ));
        }
    }
    Ok(())
}
