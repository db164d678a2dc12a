//! Whole-program analysis over the residualized merged module.
//!
//! Runs after residualization: reachability from exported entries and
//! runtime-initialized globals, reentrancy variants, receiver and variable
//! mutability, per-call-site receiver-reference variants, effects, and
//! used globals/types.

mod calls;
mod effects;
mod mutability;
mod reach;
mod reentrancy;
mod usage;

use std::collections::BTreeSet;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use vexel_common::diag::CompileError;

use crate::backend::BackendRequirements;
use crate::optimizer::OptimizationFacts;
use crate::program::InstanceId;
use crate::scope::SymbolId;
use crate::session::Session;

pub use calls::collect_calls;

/// Which calling contexts reach a function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReentrancySet {
    pub reentrant: bool,
    pub nonreentrant: bool,
}

impl ReentrancySet {
    pub fn is_empty(&self) -> bool {
        !self.reentrant && !self.nonreentrant
    }

    pub fn label(&self) -> &'static str {
        match (self.reentrant, self.nonreentrant) {
            (true, true) => "RN",
            (true, false) => "R",
            (false, true) => "N",
            (false, false) => "-",
        }
    }
}

/// Final mutability classification of a variable declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarMutability {
    Constexpr,
    NonMutableRuntime,
    Mutable,
}

/// Everything the analyzer learns, keyed by symbol.
#[derive(Debug, Default, Serialize)]
pub struct AnalysisFacts {
    /// Function symbols reachable from the roots.
    pub reachable: FxHashSet<SymbolId>,
    pub reentrancy: FxHashMap<SymbolId, ReentrancySet>,
    /// Observed receiver-mutability patterns per function, e.g. {"MN"}.
    pub ref_variants: FxHashMap<SymbolId, BTreeSet<String>>,
    /// Inferred per-receiver mutation flags.
    pub receiver_mutates: FxHashMap<SymbolId, Vec<bool>>,
    pub var_mutability: FxHashMap<SymbolId, VarMutability>,
    pub writes_global: FxHashMap<SymbolId, bool>,
    pub is_pure: FxHashMap<SymbolId, bool>,
    pub used_globals: FxHashSet<SymbolId>,
    pub used_types: FxHashSet<String>,
}

/// A function's place in the merged module, for body lookups.
pub(crate) struct FnItem {
    pub item: usize,
    pub instance: InstanceId,
}

pub(crate) struct AnalysisCx<'a> {
    pub sess: &'a Session,
    pub opt: &'a OptimizationFacts,
    pub fn_items: FxHashMap<SymbolId, FnItem>,
}

pub fn analyze(
    sess: &Session,
    opt: &OptimizationFacts,
    reqs: &BackendRequirements,
) -> Result<AnalysisFacts, CompileError> {
    let mut fn_items = FxHashMap::default();
    for (index, item) in sess.merged.items.iter().enumerate() {
        if matches!(item.stmt.kind, vexel_parser::ast::StmtKind::FuncDecl(_)) {
            if let Some(symbol) = sess.bindings.resolve(item.instance, item.stmt.id) {
                fn_items.insert(symbol, FnItem { item: index, instance: item.instance });
            }
        }
    }
    let cx = AnalysisCx { sess, opt, fn_items };

    // Reachability always runs; every other pass builds on it and can be
    // skipped when the backend does not require it.
    let mut facts = AnalysisFacts::default();
    reach::compute(&cx, &mut facts)?;
    if reqs.wants(crate::backend::AnalysisPass::Reentrancy) {
        reentrancy::compute(&cx, reqs, &mut facts)?;
    }
    if reqs.wants(crate::backend::AnalysisPass::Mutability) {
        mutability::compute(&cx, &mut facts)?;
    }
    if reqs.wants(crate::backend::AnalysisPass::Effects) {
        effects::compute(&cx, &mut facts)?;
    }
    if reqs.wants(crate::backend::AnalysisPass::Usage) {
        usage::compute(&cx, &mut facts)?;
    }

    debug!(
        "analysis: {} reachable function(s), {} used global(s), {} used type(s)",
        facts.reachable.len(),
        facts.used_globals.len(),
        facts.used_types.len()
    );
    Ok(facts)
}
