//! Type-use validation: the final gate before backend handoff.
//!
//! Every *value-used* expression in a reachable function body or a used
//! global's initializer must carry a concrete type: no inference
//! variables, no unresolved literal widths, no deferred `typeof`. Three
//! exemptions: the dead branch of a compile-time-decided conditional,
//! expression-parameter arguments (opaque until substitution), and
//! statement-position void calls and assignments.

use vexel_common::diag::CompileError;
use vexel_parser::ast::expr::{Expr, ExprKind};
use vexel_parser::ast::stmt::{Stmt, StmtKind};
use vexel_parser::ast::types::Type;

use crate::analysis::AnalysisFacts;
use crate::optimizer::OptimizationFacts;
use crate::program::InstanceId;
use crate::session::Session;

pub fn validate_type_use(
    sess: &Session,
    analysis: &AnalysisFacts,
    opt: &OptimizationFacts,
) -> Result<(), CompileError> {
    let cx = Validator { sess, opt };
    for item in &sess.merged.items {
        match &item.stmt.kind {
            StmtKind::FuncDecl(func) => {
                let Some(symbol) = sess.bindings.resolve(item.instance, item.stmt.id) else {
                    continue;
                };
                if !analysis.reachable.contains(&symbol) {
                    continue;
                }
                // The body's tail value is used iff the function returns one.
                let returns_value =
                    sess.sig(symbol).is_some_and(|sig| sig.ret.is_some());
                if let Some(body) = &func.body {
                    cx.check_expr(body, item.instance, returns_value)?;
                }
            }
            StmtKind::VarDecl(decl) => {
                let Some(symbol) = sess.bindings.resolve(item.instance, item.stmt.id) else {
                    continue;
                };
                if !analysis.used_globals.contains(&symbol) {
                    continue;
                }
                if let Some(init) = &decl.init {
                    cx.check_expr(init, item.instance, true)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

struct Validator<'a> {
    sess: &'a Session,
    opt: &'a OptimizationFacts,
}

impl<'a> Validator<'a> {
    /// Walk an expression; `used` says whether the *value* of this node is
    /// required by its context.
    fn check_expr(&self, expr: &Expr, instance: InstanceId, used: bool) -> Result<(), CompileError> {
        if used && !self.is_expr_param_use(expr, instance) {
            self.require_concrete(expr)?;
        }
        match &expr.kind {
            ExprKind::Int { .. }
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Char(_)
            | ExprKind::Ident(_)
            | ExprKind::Resource(_)
            | ExprKind::Process(_) => Ok(()),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs, instance, true)?;
                self.check_expr(rhs, instance, true)
            }
            ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => {
                self.check_expr(operand, instance, true)
            }
            ExprKind::Call { receivers, args, .. } => {
                for receiver in receivers {
                    self.check_expr(receiver, instance, true)?;
                }
                let expr_params = self.expr_param_mask(expr, instance, args.len());
                for (arg, is_expr_param) in args.iter().zip(expr_params) {
                    // Expression-parameter arguments are opaque.
                    if !is_expr_param {
                        self.check_expr(arg, instance, true)?;
                    }
                }
                Ok(())
            }
            ExprKind::Index { base, index } => {
                self.check_expr(base, instance, true)?;
                self.check_expr(index, instance, true)
            }
            ExprKind::Member { base, .. } => self.check_expr(base, instance, true),
            ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
                for elem in elems {
                    self.check_expr(elem, instance, true)?;
                }
                Ok(())
            }
            ExprKind::Block { stmts, tail } => {
                for stmt in stmts {
                    self.check_stmt(stmt, instance)?;
                }
                if let Some(tail) = tail {
                    self.check_expr(tail, instance, used)?;
                }
                Ok(())
            }
            ExprKind::Conditional { cond, then, alt } => {
                self.check_expr(cond, instance, true)?;
                // The dead branch of a constexpr conditional is exempt.
                match self.opt.condition_of(instance, cond.id) {
                    Some(true) => self.check_expr(then, instance, used),
                    Some(false) => self.check_expr(alt, instance, used),
                    None => {
                        self.check_expr(then, instance, used)?;
                        self.check_expr(alt, instance, used)
                    }
                }
            }
            ExprKind::Cast { operand, .. } => self.check_expr(operand, instance, true),
            ExprKind::Assign { target, value } => {
                // Assignments are statement-shaped: the assignment itself
                // carries no type, but both sides' values must.
                if let ExprKind::TupleLit(elems) = &target.kind {
                    for elem in elems {
                        self.require_concrete(elem)?;
                    }
                } else {
                    self.check_expr(target, instance, true)?;
                }
                self.check_expr(value, instance, true)
            }
            ExprKind::Range { lo, hi } => {
                self.check_expr(lo, instance, true)?;
                self.check_expr(hi, instance, true)
            }
            ExprKind::Iterate { iterable, body, .. } => {
                self.check_expr(iterable, instance, true)?;
                // A named-type iteration body is an expression-parameter
                // argument; arrays and ranges get a typed `_` and a fully
                // checked body.
                let named_head = matches!(
                    iterable.ty.as_ref(),
                    Some(Type::Named(_))
                );
                if named_head {
                    Ok(())
                } else {
                    self.check_expr(body, instance, false)
                }
            }
            ExprKind::Repeat { cond, body } => {
                self.check_expr(cond, instance, true)?;
                self.check_expr(body, instance, false)
            }
        }
    }

    fn check_stmt(&self, stmt: &Stmt, instance: InstanceId) -> Result<(), CompileError> {
        match &stmt.kind {
            // Statement-position calls and assignments may be typeless.
            StmtKind::Expr(expr) => {
                let statement_shaped =
                    matches!(expr.kind, ExprKind::Call { .. } | ExprKind::Assign { .. })
                        || expr.ty.is_none();
                self.check_expr(expr, instance, !statement_shaped)
            }
            StmtKind::Return(Some(expr)) => self.check_expr(expr, instance, true),
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => Ok(()),
            StmtKind::VarDecl(decl) => match &decl.init {
                Some(init) => self.check_expr(init, instance, true),
                None => Ok(()),
            },
            StmtKind::CondStmt { cond, then } => {
                self.check_expr(cond, instance, true)?;
                match self.opt.condition_of(instance, cond.id) {
                    Some(false) => Ok(()),
                    _ => self.check_stmt(then, instance),
                }
            }
            StmtKind::Import { .. } => Ok(()),
            StmtKind::FuncDecl(_) | StmtKind::TypeDecl(_) => Ok(()),
        }
    }

    /// Whether this identifier names an expression parameter; such uses
    /// stay opaque until substitution.
    fn is_expr_param_use(&self, expr: &Expr, instance: InstanceId) -> bool {
        if !matches!(expr.kind, ExprKind::Ident(_)) {
            return false;
        }
        self.sess
            .bindings
            .resolve(instance, expr.id)
            .is_some_and(|symbol| self.sess.symbols.get(symbol).expr_param)
    }

    fn require_concrete(&self, expr: &Expr) -> Result<(), CompileError> {
        let concrete = match &expr.ty {
            Some(ty) => ty.is_concrete(),
            None => false,
        };
        if !concrete {
            let shown = expr
                .ty
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "<none>".to_string());
            return Err(CompileError::new(
                format!("expression needs a concrete type, found `{shown}`"),
                expr.span,
            ));
        }
        Ok(())
    }

    /// Which argument positions of a call are expression parameters.
    fn expr_param_mask(&self, call: &Expr, instance: InstanceId, arity: usize) -> Vec<bool> {
        let Some(symbol) = self.sess.bindings.resolve(instance, call.id) else {
            return vec![false; arity];
        };
        let Some(sig) = self.sess.sig(symbol) else {
            return vec![false; arity];
        };
        sig.params.iter().map(|p| p.is_expr_param).chain(std::iter::repeat(false)).take(arity).collect()
    }
}
