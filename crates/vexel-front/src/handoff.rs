//! The backend handoff: a read-only view of everything the frontend
//! produced, plus the query surface backends rely on.

use vexel_common::diag::Diagnostic;
use vexel_parser::ast::types::Type;
use vexel_parser::ast::{Expr, NodeId};

use rustc_hash::FxHashMap;

use crate::analysis::AnalysisFacts;
use crate::cte::{CtValue, Evaluator};
use crate::optimizer::OptimizationFacts;
use crate::program::{InstanceId, MergedModule, Program, ENTRY_INSTANCE};
use crate::scope::{Symbol, SymbolId, SymbolKind};
use crate::session::{AstView, FuncSig, Session};

/// The fully typed, monomorphized, constant-folded, analyzed program.
///
/// Owns the session so spans, bindings, and the type table stay resolvable
/// for as long as the backend needs them.
pub struct AnalyzedProgram {
    sess: Session,
    pub analysis: AnalysisFacts,
    pub optimization: OptimizationFacts,
    pub entry_instance: InstanceId,
}

impl AnalyzedProgram {
    pub(crate) fn new(sess: Session, analysis: AnalysisFacts, optimization: OptimizationFacts) -> Self {
        Self { sess, analysis, optimization, entry_instance: ENTRY_INSTANCE }
    }

    /// The merged module in initialization order.
    pub fn merged(&self) -> &MergedModule {
        &self.sess.merged
    }

    /// The full program: modules, instances, instantiations.
    pub fn program(&self) -> &Program {
        &self.sess.program
    }

    pub fn sources(&self) -> &vexel_common::source::SourceMap {
        &self.sess.sources
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.sess.warnings
    }

    /// The synthetic tuple types the checker forced into existence.
    pub fn tuple_types(&self) -> &FxHashMap<String, Vec<Type>> {
        &self.sess.tuple_types
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        self.sess.symbols.get(id)
    }

    pub fn sig(&self, id: SymbolId) -> Option<&FuncSig> {
        self.sess.sig(id)
    }

    // ── Query surface ──────────────────────────────────────────────────

    /// The symbol an AST node resolved to, if any.
    pub fn binding_for(&self, instance: InstanceId, node: NodeId) -> Option<&Symbol> {
        self.sess.bindings.resolve(instance, node).map(|id| self.sess.symbols.get(id))
    }

    /// Follow type-variable bindings and materialize `typeof` types.
    pub fn resolve_type(&mut self, ty: &Type) -> Type {
        self.sess.types.resolve(ty)
    }

    /// Truthiness of an expression's compile-time value, if stable.
    pub fn constexpr_condition(&self, instance: InstanceId, node: NodeId) -> Option<bool> {
        self.optimization.condition_of(instance, node)
    }

    /// Evaluate an expression with the promoted global constants seeded.
    pub fn try_evaluate(&self, instance: InstanceId, expr: &Expr) -> Option<CtValue> {
        let view = AstView {
            modules: &self.sess.program.modules,
            instantiations: &self.sess.program.instantiations,
        };
        let mut eval =
            Evaluator::new(&self.sess, view).with_seeds(&self.optimization.known_symbol_values);
        eval.try_evaluate(instance, expr)
    }

    /// Look up a type symbol visible from an instance's scope.
    pub fn lookup_type_symbol(&self, instance: InstanceId, name: &str) -> Option<&Symbol> {
        let scope = self.sess.program.instance(instance).scope;
        self.sess
            .scopes
            .lookup(scope, name)
            .map(|id| self.sess.symbols.get(id))
            .filter(|s| s.kind == SymbolKind::Type)
    }
}
