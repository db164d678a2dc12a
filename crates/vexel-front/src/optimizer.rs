//! The fixpoint scheduler driving compile-time evaluation.
//!
//! Every context root (function body, variable initializer, top-level
//! expression statement, conditional-statement condition) and every
//! sub-expression is evaluated through the CTE. Values that evaluate the
//! same everywhere become `constexpr_values`; values observed to differ
//! become permanently unstable and never resurface. Global constants whose
//! initializers stabilize are promoted into the seeded symbol values --
//! promotion is monotonic, and a conflicting second value is an internal
//! error -- and their dependents (tracked through the evaluator's
//! symbol-read observer) are re-enqueued. The scheduler must converge
//! within a bounded number of rounds.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use vexel_common::diag::CompileError;
use vexel_common::worklist::Worklist;
use vexel_parser::ast::expr::Expr;
use vexel_parser::ast::walk::for_each_expr_in_stmt;
use vexel_parser::ast::{NodeId, StmtKind};

use crate::cte::{CtValue, Evaluator};
use crate::program::InstanceId;
use crate::scope::{SymbolId, SymbolKind};
use crate::session::{AstView, Session};

/// Bounded number of fixpoint rounds.
pub const MAX_ROUNDS: u32 = 64;

pub type ExprKey = (InstanceId, NodeId);

/// Facts produced by the scheduler, consumed by the residualizer, the
/// analyzer, and the analysis report.
#[derive(Debug, Default)]
pub struct OptimizationFacts {
    /// Stable compile-time values per expression.
    pub constexpr_values: FxHashMap<ExprKey, CtValue>,
    /// Truthiness of stable scalar values (conditions).
    pub constexpr_conditions: FxHashMap<ExprKey, bool>,
    /// Var-decl statements whose initializer evaluated.
    pub constexpr_inits: FxHashSet<ExprKey>,
    /// Zero-parameter, zero-receiver functions whose body evaluates to a
    /// scalar value.
    pub foldable_functions: FxHashSet<SymbolId>,
    /// Why every other function was not foldable.
    pub fold_skip_reasons: FxHashMap<SymbolId, &'static str>,
    /// Promoted global constants.
    pub known_symbol_values: FxHashMap<SymbolId, CtValue>,
}

impl OptimizationFacts {
    pub fn value_of(&self, instance: InstanceId, node: NodeId) -> Option<&CtValue> {
        self.constexpr_values.get(&(instance, node))
    }

    pub fn condition_of(&self, instance: InstanceId, node: NodeId) -> Option<bool> {
        self.constexpr_conditions.get(&(instance, node)).copied()
    }
}

struct Root<'a> {
    instance: InstanceId,
    expr: &'a Expr,
}

/// A global-constant promotion candidate.
struct Candidate {
    symbol: SymbolId,
    init_key: ExprKey,
}

pub fn optimize(sess: &Session) -> Result<OptimizationFacts, CompileError> {
    let view = AstView {
        modules: &sess.program.modules,
        instantiations: &sess.program.instantiations,
    };

    // ── Collect roots, sub-expressions, and promotion candidates ───────
    let mut roots: Vec<Root> = Vec::new();
    let mut exprs: Vec<(InstanceId, &Expr)> = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut var_inits: Vec<(ExprKey, ExprKey)> = Vec::new(); // (decl key, init key)
    let mut functions: Vec<(SymbolId, Option<ExprKey>)> = Vec::new();

    for item in &sess.merged.items {
        let instance = item.instance;
        match &item.stmt.kind {
            StmtKind::FuncDecl(func) => {
                let symbol = sess.bindings.resolve(instance, item.stmt.id);
                if let Some(body) = &func.body {
                    roots.push(Root { instance, expr: body });
                    if let Some(symbol) = symbol {
                        functions.push((symbol, Some((instance, body.id))));
                    }
                } else if let Some(symbol) = symbol {
                    functions.push((symbol, None));
                }
            }
            StmtKind::VarDecl(decl) => {
                if let Some(init) = &decl.init {
                    roots.push(Root { instance, expr: init });
                    let init_key = (instance, init.id);
                    if let Some(symbol) = sess.bindings.resolve(instance, item.stmt.id) {
                        if sess.symbols.get(symbol).kind == SymbolKind::Constant {
                            candidates.push(Candidate { symbol, init_key });
                        }
                    }
                }
            }
            StmtKind::Expr(expr) => roots.push(Root { instance, expr }),
            StmtKind::CondStmt { cond, .. } => roots.push(Root { instance, expr: cond }),
            _ => {}
        }
        // Every sub-expression is its own query; every var-decl (at any
        // nesting depth) contributes an init key for `constexpr_inits`.
        for_each_expr_in_stmt(&item.stmt, &mut |expr| {
            exprs.push((instance, expr));
        });
        vexel_parser::ast::walk::for_each_stmt(&item.stmt, &mut |stmt| {
            if let StmtKind::VarDecl(decl) = &stmt.kind {
                if let Some(init) = &decl.init {
                    var_inits.push(((instance, stmt.id), (instance, init.id)));
                }
            }
        });
    }

    // ── Fixpoint state ─────────────────────────────────────────────────
    let mut stable: FxHashMap<ExprKey, CtValue> = FxHashMap::default();
    let mut unstable: FxHashSet<ExprKey> = FxHashSet::default();
    // Values confirmed by evaluating the expression on its own (with the
    // promoted seeds). Only these become facts: a value that is stable
    // inside root runs but depends on surrounding locals must not be
    // folded, and re-evaluating a fact in isolation must reproduce it.
    let mut isolated: FxHashMap<ExprKey, CtValue> = FxHashMap::default();
    let mut known: FxHashMap<SymbolId, CtValue> = FxHashMap::default();
    let mut root_deps: FxHashMap<SymbolId, FxHashSet<usize>> = FxHashMap::default();
    let mut expr_deps: FxHashMap<SymbolId, FxHashSet<usize>> = FxHashMap::default();

    let mut root_queue: Worklist<usize> = Worklist::new();
    let mut expr_queue: Worklist<usize> = Worklist::new();
    root_queue.extend(0..roots.len());
    expr_queue.extend(0..exprs.len());

    let mut converged = false;
    for round in 0..MAX_ROUNDS {
        let mut progress = false;

        while let Some(i) = root_queue.pop() {
            let root = &roots[i];
            let mut eval = Evaluator::new(sess, view).with_seeds(&known);
            eval.observe = true;
            let _ = eval.query(root.instance, root.expr);
            progress |= merge_observed(&eval.observed_values, &mut stable, &mut unstable);
            for symbol in &eval.observed_reads {
                root_deps.entry(*symbol).or_default().insert(i);
            }
        }

        while let Some(j) = expr_queue.pop() {
            let (instance, expr) = exprs[j];
            let mut eval = Evaluator::new(sess, view).with_seeds(&known);
            eval.observe = true;
            let outcome = eval.query(instance, expr);
            progress |= merge_observed(&eval.observed_values, &mut stable, &mut unstable);
            for symbol in &eval.observed_reads {
                expr_deps.entry(*symbol).or_default().insert(j);
            }
            if let crate::cte::CtOutcome::Known(value) = outcome {
                let key = (instance, expr.id);
                if isolated.insert(key, value.clone()) != Some(value) {
                    progress = true;
                }
            }
        }

        // Promote stabilized global constants; dependents re-run with the
        // new seed next round.
        for candidate in &candidates {
            let Some(value) = stable.get(&candidate.init_key) else { continue };
            match known.get(&candidate.symbol) {
                None => {
                    known.insert(candidate.symbol, value.clone());
                    progress = true;
                    if let Some(deps) = root_deps.get(&candidate.symbol) {
                        for &i in deps {
                            root_queue.push(i);
                        }
                    }
                    if let Some(deps) = expr_deps.get(&candidate.symbol) {
                        for &j in deps {
                            expr_queue.push(j);
                        }
                    }
                }
                Some(existing) if existing == value => {}
                Some(_) => {
                    return Err(CompileError::internal(
                        format!(
                            "non-monotonic compile-time value for `{}`",
                            sess.symbols.get(candidate.symbol).name
                        ),
                        Some(sess.symbols.get(candidate.symbol).decl_span),
                    ));
                }
            }
        }

        if !progress && root_queue.is_empty() && expr_queue.is_empty() {
            debug!("optimizer fixpoint after {} round(s)", round + 1);
            converged = true;
            break;
        }
    }
    if !converged && (!root_queue.is_empty() || !expr_queue.is_empty()) {
        return Err(CompileError::internal(
            format!("compile-time fixpoint did not converge within {MAX_ROUNDS} rounds"),
            None,
        ));
    }

    // ── Derive facts ───────────────────────────────────────────────────
    let mut facts = OptimizationFacts {
        known_symbol_values: known,
        ..OptimizationFacts::default()
    };

    // Only isolation-confirmed, never-contradicted values become facts.
    for (key, value) in isolated {
        if unstable.contains(&key) {
            continue;
        }
        if let Some(observed) = stable.get(&key) {
            if *observed != value {
                continue;
            }
        }
        facts.constexpr_values.insert(key, value);
    }

    for (key, value) in &facts.constexpr_values {
        if let Some(truth) = value.truthy() {
            facts.constexpr_conditions.insert(*key, truth);
        }
    }
    for (decl_key, init_key) in &var_inits {
        if facts.constexpr_values.contains_key(init_key) {
            facts.constexpr_inits.insert(*decl_key);
        }
    }
    for (symbol, body_key) in functions {
        let sig = match sess.sig(symbol) {
            Some(sig) => sig,
            None => continue,
        };
        let reason = if sig.external {
            "external"
        } else if body_key.is_none() {
            "no-body"
        } else if !sig.receivers.is_empty() {
            "has-receivers"
        } else if !sig.params.is_empty() {
            "has-params"
        } else {
            match body_key.and_then(|key| facts.constexpr_values.get(&key)) {
                Some(value) if value.is_scalar() => {
                    facts.foldable_functions.insert(symbol);
                    continue;
                }
                Some(_) => "non-scalar-body",
                None => "body-unstable",
            }
        };
        facts.fold_skip_reasons.insert(symbol, reason);
    }

    debug!(
        "optimizer: {} stable value(s), {} unstable, {} promoted constant(s), {} foldable function(s)",
        facts.constexpr_values.len(),
        unstable.len(),
        facts.known_symbol_values.len(),
        facts.foldable_functions.len()
    );
    Ok(facts)
}

/// Fold one evaluation's observed values into the global maps.
///
/// Values that disagree -- within the run (loop iterations) or across runs
/// -- move to the unstable set and stay there. Returns whether anything
/// changed.
fn merge_observed(
    observed: &[(ExprKey, CtValue)],
    stable: &mut FxHashMap<ExprKey, CtValue>,
    unstable: &mut FxHashSet<ExprKey>,
) -> bool {
    let mut changed = false;
    for (key, value) in observed {
        if unstable.contains(key) {
            continue;
        }
        match stable.get(key) {
            None => {
                stable.insert(*key, value.clone());
                changed = true;
            }
            Some(existing) if existing == value => {}
            Some(_) => {
                stable.remove(key);
                unstable.insert(*key);
                changed = true;
            }
        }
    }
    changed
}
