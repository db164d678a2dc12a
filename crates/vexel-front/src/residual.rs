//! Residualization: rewriting the merged module with compile-time facts.
//!
//! Four rewrites, in one walk:
//! - expressions with a stable compile-time value are replaced by
//!   reconstructed literals (scalars, arrays, tuples, record constructor
//!   calls in declared field order);
//! - conditional statements and expressions with a compile-time-known
//!   condition collapse to the live branch;
//! - expression statements whose expression is pure are dropped;
//! - statements after a terminator (`return`/`break`/`continue`) are
//!   dropped.
//!
//! The pass reports whether it changed anything; a second run on its own
//! output changes nothing.

use log::debug;

use vexel_common::diag::CompileError;
use vexel_parser::ast::expr::{Expr, ExprKind, UnOp};
use vexel_parser::ast::stmt::{Stmt, StmtKind};
use vexel_parser::ast::types::Type;
use vexel_parser::ast::NodeIds;

use crate::cte::CtValue;
use crate::optimizer::OptimizationFacts;
use crate::program::InstanceId;
use crate::session::Session;

pub fn residualize(sess: &mut Session, facts: &OptimizationFacts) -> Result<bool, CompileError> {
    let mut merged = std::mem::take(&mut sess.merged);
    let mut ctx = Residualizer { sess, facts, changed: false };

    let mut kept = Vec::with_capacity(merged.items.len());
    for mut item in merged.items.drain(..) {
        match ctx.process_stmt(&mut item.stmt, item.instance) {
            Keep::Yes => kept.push(item),
            Keep::No => ctx.changed = true,
        }
    }
    merged.items = kept;

    let changed = ctx.changed;
    sess.merged = merged;
    debug!("residualizer changed = {changed}");
    Ok(changed)
}

enum Keep {
    Yes,
    No,
}

struct Residualizer<'a> {
    sess: &'a mut Session,
    facts: &'a OptimizationFacts,
    changed: bool,
}

impl<'a> Residualizer<'a> {
    fn ids(&mut self) -> &mut NodeIds {
        &mut self.sess.program.ids
    }

    /// Process one statement. `Keep::No` means the caller drops it.
    fn process_stmt(&mut self, stmt: &mut Stmt, instance: InstanceId) -> Keep {
        match &mut stmt.kind {
            StmtKind::Expr(expr) => {
                self.process_expr(expr, instance);
                if is_pure(expr) {
                    return Keep::No;
                }
                Keep::Yes
            }
            StmtKind::Return(Some(expr)) => {
                self.process_expr(expr, instance);
                Keep::Yes
            }
            StmtKind::VarDecl(decl) => {
                if let Some(init) = &mut decl.init {
                    self.process_expr(init, instance);
                }
                Keep::Yes
            }
            StmtKind::FuncDecl(func) => {
                if let Some(body) = &mut func.body {
                    self.process_expr(body, instance);
                }
                Keep::Yes
            }
            StmtKind::CondStmt { .. } => self.process_cond_stmt(stmt, instance),
            _ => Keep::Yes,
        }
    }

    fn process_cond_stmt(&mut self, stmt: &mut Stmt, instance: InstanceId) -> Keep {
        let decision = {
            let StmtKind::CondStmt { cond, .. } = &mut stmt.kind else { unreachable!() };
            self.process_expr(cond, instance);
            self.facts.condition_of(instance, cond.id)
        };
        match decision {
            Some(true) => {
                // Keep only the live branch.
                let StmtKind::CondStmt { then, .. } =
                    std::mem::replace(&mut stmt.kind, StmtKind::Break)
                else {
                    unreachable!()
                };
                *stmt = *then;
                self.changed = true;
                self.process_stmt(stmt, instance)
            }
            Some(false) => Keep::No,
            None => {
                let keep = {
                    let StmtKind::CondStmt { then, .. } = &mut stmt.kind else { unreachable!() };
                    self.process_stmt(then, instance)
                };
                match keep {
                    Keep::Yes => Keep::Yes,
                    // The branch dissolved; the condition alone is either
                    // pure-droppable or kept for its effects.
                    Keep::No => {
                        let StmtKind::CondStmt { cond, .. } =
                            std::mem::replace(&mut stmt.kind, StmtKind::Break)
                        else {
                            unreachable!()
                        };
                        self.changed = true;
                        if is_pure(&cond) {
                            Keep::No
                        } else {
                            stmt.kind = StmtKind::Expr(cond);
                            Keep::Yes
                        }
                    }
                }
            }
        }
    }

    fn process_block(&mut self, stmts: &mut Vec<Stmt>, instance: InstanceId) {
        let mut kept: Vec<Stmt> = Vec::with_capacity(stmts.len());
        let mut terminated = false;
        for mut stmt in stmts.drain(..) {
            if terminated {
                self.changed = true;
                continue;
            }
            match self.process_stmt(&mut stmt, instance) {
                Keep::Yes => {
                    terminated = is_terminator(&stmt);
                    kept.push(stmt);
                }
                Keep::No => self.changed = true,
            }
        }
        *stmts = kept;
    }

    fn process_expr(&mut self, expr: &mut Expr, instance: InstanceId) {
        if matches!(expr.kind, ExprKind::Conditional { .. }) {
            self.process_conditional(expr, instance);
            self.fold(expr, instance);
            return;
        }

        // Children first.
        match &mut expr.kind {
            ExprKind::Int { .. }
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Char(_)
            | ExprKind::Ident(_)
            | ExprKind::Resource(_)
            | ExprKind::Process(_) => {}
            ExprKind::Binary { lhs, rhs, .. } => {
                self.process_expr(lhs, instance);
                self.process_expr(rhs, instance);
            }
            ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => {
                self.process_expr(operand, instance)
            }
            ExprKind::Call { receivers, args, .. } => {
                for receiver in receivers {
                    self.process_expr(receiver, instance);
                }
                for arg in args {
                    self.process_expr(arg, instance);
                }
            }
            ExprKind::Index { base, index } => {
                self.process_expr(base, instance);
                self.process_expr(index, instance);
            }
            ExprKind::Member { base, .. } => self.process_expr(base, instance),
            ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
                for elem in elems {
                    self.process_expr(elem, instance);
                }
            }
            ExprKind::Block { stmts, tail } => {
                self.process_block(stmts, instance);
                if let Some(tail) = tail {
                    self.process_expr(tail, instance);
                }
            }
            ExprKind::Conditional { .. } => unreachable!("handled above"),
            ExprKind::Cast { operand, .. } => self.process_expr(operand, instance),
            ExprKind::Assign { target, value } => {
                // Never fold the assignment target.
                if let ExprKind::Index { index, .. } = &mut target.kind {
                    self.process_expr(index, instance);
                }
                self.process_expr(value, instance);
            }
            ExprKind::Range { lo, hi } => {
                self.process_expr(lo, instance);
                self.process_expr(hi, instance);
            }
            ExprKind::Iterate { iterable, body, .. } => {
                self.process_expr(iterable, instance);
                self.process_expr(body, instance);
            }
            ExprKind::Repeat { cond, body } => {
                self.process_expr(cond, instance);
                self.process_expr(body, instance);
            }
        }

        self.fold(expr, instance);
    }

    /// Collapse a conditional expression with a compile-time-known
    /// condition to its live branch.
    fn process_conditional(&mut self, expr: &mut Expr, instance: InstanceId) {
        let decision = {
            let ExprKind::Conditional { cond, .. } = &mut expr.kind else { unreachable!() };
            self.process_expr(cond, instance);
            self.facts.condition_of(instance, cond.id)
        };
        match decision {
            Some(truth) => {
                let ExprKind::Conditional { then, alt, .. } = std::mem::replace(
                    &mut expr.kind,
                    ExprKind::Int { value: 0, suffix: None },
                ) else {
                    unreachable!()
                };
                let mut live = if truth { then } else { alt };
                self.process_expr(&mut live, instance);
                *expr = *live;
                self.changed = true;
            }
            None => {
                let ExprKind::Conditional { then, alt, .. } = &mut expr.kind else {
                    unreachable!()
                };
                self.process_expr(then, instance);
                self.process_expr(alt, instance);
            }
        }
    }

    /// Replace an expression that has a stable compile-time value with a
    /// reconstructed literal, keeping the node's identity and type.
    ///
    /// Folding is gated on dispatch: an expression containing a call (or
    /// operator/iteration dispatch) to anything outside
    /// `foldable_functions` is left alone, so call edges to non-foldable
    /// functions survive into the analyzer.
    fn fold(&mut self, expr: &mut Expr, instance: InstanceId) {
        if is_literal_shape(expr) || expr.ty.is_none() {
            return;
        }
        if self.contains_unfoldable_dispatch(expr, instance) {
            return;
        }
        let Some(value) = self.facts.value_of(instance, expr.id).cloned() else {
            return;
        };
        if let Some(replacement) = self.reconstruct(&value, instance) {
            let id = expr.id;
            let span = expr.span;
            let ty = expr.ty.clone();
            *expr = replacement;
            expr.id = id;
            expr.span = span;
            expr.ty = ty;
            self.changed = true;
        }
    }

    fn contains_unfoldable_dispatch(&self, expr: &Expr, instance: InstanceId) -> bool {
        let mut found = false;
        vexel_parser::ast::walk::for_each_expr(expr, &mut |e| {
            if found {
                return;
            }
            let dispatches = matches!(
                e.kind,
                ExprKind::Call { .. } | ExprKind::Binary { .. } | ExprKind::Iterate { .. }
            );
            if !dispatches {
                return;
            }
            match self.sess.bindings.resolve(instance, e.id) {
                Some(symbol) => {
                    let info = self.sess.symbols.get(symbol);
                    if info.kind == crate::scope::SymbolKind::Function
                        && !self.facts.foldable_functions.contains(&symbol)
                    {
                        found = true;
                    }
                }
                None => {
                    if matches!(e.kind, ExprKind::Call { .. }) {
                        found = true;
                    }
                }
            }
        });
        found
    }

    /// Rebuild a compile-time value as a literal expression. Children get
    /// fresh node ids; the caller keeps the folded node's identity.
    fn reconstruct(&mut self, value: &CtValue, instance: InstanceId) -> Option<Expr> {
        let id = self.ids().mint();
        let span = vexel_common::span::Span::synthetic(vexel_common::span::FileId(0));
        let kind = match value {
            CtValue::Uint(v) => ExprKind::Int { value: *v, suffix: None },
            CtValue::Bool(b) => ExprKind::Int { value: *b as u64, suffix: None },
            CtValue::Int(v) => {
                if *v >= 0 {
                    ExprKind::Int { value: *v as u64, suffix: None }
                } else {
                    let inner_id = self.ids().mint();
                    let inner = Expr::new(
                        inner_id,
                        span,
                        ExprKind::Int { value: v.unsigned_abs(), suffix: None },
                    );
                    ExprKind::Unary { op: UnOp::Neg, operand: Box::new(inner) }
                }
            }
            CtValue::Float(v) => ExprKind::Float(*v),
            CtValue::Str(s) => ExprKind::Str(s.clone()),
            CtValue::Uninit => return None,
            CtValue::Array(values) => {
                let mut elems = Vec::with_capacity(values.len());
                for v in values.iter() {
                    elems.push(self.reconstruct(v, instance)?);
                }
                ExprKind::ArrayLit(elems)
            }
            CtValue::Composite(composite) => {
                let mut parts = Vec::with_capacity(composite.fields.len());
                for (_, v) in &composite.fields {
                    parts.push(self.reconstruct(v, instance)?);
                }
                if Type::is_tuple_name(&composite.name) {
                    ExprKind::TupleLit(parts)
                } else {
                    // Declared field order is the constructor order.
                    ExprKind::Call {
                        callee: composite.name.clone(),
                        receivers: Vec::new(),
                        args: parts,
                    }
                }
            }
        };
        Some(Expr::new(id, span, kind))
    }
}

fn is_terminator(stmt: &Stmt) -> bool {
    matches!(stmt.kind, StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue)
}

/// An expression that is already a reconstructed literal: folding it again
/// would change nothing.
fn is_literal_shape(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int { .. } | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Char(_) => true,
        ExprKind::Unary { op: UnOp::Neg, operand } => {
            matches!(operand.kind, ExprKind::Int { .. })
        }
        ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => {
            elems.iter().all(is_literal_shape)
        }
        ExprKind::Call { receivers, args, .. } => {
            receivers.is_empty() && args.iter().all(is_literal_shape) && expr.ty.as_ref().is_some_and(|t| matches!(t, Type::Named(_)))
        }
        _ => false,
    }
}

/// Purity for expression-statement pruning: literals and identifiers are
/// pure; calls, assignments, loops, process and block expressions are not.
fn is_pure(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int { .. }
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Char(_)
        | ExprKind::Ident(_)
        | ExprKind::Resource(_) => true,
        ExprKind::Binary { lhs, rhs, .. } => is_pure(lhs) && is_pure(rhs),
        ExprKind::Unary { operand, .. } | ExprKind::Length(operand) => is_pure(operand),
        ExprKind::Index { base, index } => is_pure(base) && is_pure(index),
        ExprKind::Member { base, .. } => is_pure(base),
        ExprKind::ArrayLit(elems) | ExprKind::TupleLit(elems) => elems.iter().all(is_pure),
        ExprKind::Conditional { cond, then, alt } => is_pure(cond) && is_pure(then) && is_pure(alt),
        ExprKind::Cast { operand, .. } => is_pure(operand),
        ExprKind::Range { lo, hi } => is_pure(lo) && is_pure(hi),
        ExprKind::Call { .. }
        | ExprKind::Assign { .. }
        | ExprKind::Block { .. }
        | ExprKind::Iterate { .. }
        | ExprKind::Repeat { .. }
        | ExprKind::Process(_) => false,
    }
}
