//! Shared state threaded through every pass of the pipeline.
//!
//! Module ASTs are immutable after parsing; inferred types live in the
//! [`TypeTable`]'s side map and are stamped onto the *merged module*'s
//! cloned nodes when it is built. That keeps every pass a plain borrow:
//! readers take [`AstView`], writers take the tables.

use rustc_hash::FxHashMap;

use vexel_common::diag::Diagnostic;
use vexel_common::options::Options;
use vexel_common::source::SourceMap;
use vexel_parser::ast::types::Type;
use vexel_parser::ast::{Expr, NodeId, Stmt, StmtKind};

use crate::program::{InstanceId, MergedModule, ModuleInfo, Program};
use crate::scope::{Bindings, ScopeId, Scopes, SymbolId, SymbolTable};
use crate::types::TypeTable;

/// Where a function declaration lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclLoc {
    /// `statements[stmt]` of `modules[module]`.
    Module { module: usize, stmt: usize },
    /// `program.instantiations[idx]` (a monomorphized clone).
    Instantiation(usize),
}

/// One parameter of a function signature.
#[derive(Debug, Clone)]
pub struct ParamSig {
    pub name: String,
    /// Lowered type; `None` for generic template parameters and for
    /// expression parameters.
    pub ty: Option<Type>,
    pub is_expr_param: bool,
    pub node: NodeId,
    pub symbol: SymbolId,
}

/// The resolved-and-lowered signature of a function, kept outside the AST
/// so passes can reason about callees without chasing declaration nodes.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub symbol: SymbolId,
    /// Qualified name (`T::f` for methods).
    pub name: String,
    pub instance: InstanceId,
    pub receivers: Vec<ParamSig>,
    pub params: Vec<ParamSig>,
    /// Return type. `None` for void and for not-yet-checked generics;
    /// multi-returns use a synthetic tuple type.
    pub ret: Option<Type>,
    pub generic: bool,
    pub external: bool,
    pub exported: bool,
    pub has_body: bool,
    pub loc: DeclLoc,
    pub decl_node: NodeId,
    /// Scope holding the receivers and parameters.
    pub param_scope: ScopeId,
}

/// Read-only view of every function-bearing AST: the loaded modules plus
/// the monomorphized instantiations.
#[derive(Clone, Copy)]
pub struct AstView<'a> {
    pub modules: &'a [ModuleInfo],
    pub instantiations: &'a [(InstanceId, Stmt)],
}

impl<'a> AstView<'a> {
    pub fn stmt(&self, loc: DeclLoc) -> &'a Stmt {
        match loc {
            DeclLoc::Module { module, stmt } => &self.modules[module].module.statements[stmt],
            DeclLoc::Instantiation(idx) => &self.instantiations[idx].1,
        }
    }

    /// The body expression of the function declared at `loc`, if any.
    pub fn func_body(&self, loc: DeclLoc) -> Option<&'a Expr> {
        match &self.stmt(loc).kind {
            StmtKind::FuncDecl(func) => func.body.as_ref(),
            _ => None,
        }
    }
}

/// Everything the passes share.
pub struct Session {
    pub options: Options,
    pub sources: SourceMap,
    pub program: Program,
    pub scopes: Scopes,
    pub symbols: SymbolTable,
    pub bindings: Bindings,
    pub types: TypeTable,
    /// Resolved function signatures, filled by the resolver and lowered by
    /// the checker.
    pub funcs: FxHashMap<SymbolId, FuncSig>,
    /// Scope introduced by a node: function declarations (parameter scope),
    /// block expressions, and loop bodies (the scope binding `_`).
    pub node_scopes: FxHashMap<(InstanceId, NodeId), ScopeId>,
    /// Field lists of declared record types, lowered by the checker,
    /// keyed by the owning instance.
    pub record_types: FxHashMap<(InstanceId, String), Vec<(String, Type)>>,
    /// Synthetic tuple types, shared program-wide. This is the
    /// forced-tuple-type map handed to the backend.
    pub tuple_types: FxHashMap<String, Vec<Type>>,
    /// Loader-resolved import targets: import statement node -> module.
    pub import_map: FxHashMap<NodeId, crate::program::ModuleId>,
    /// The merged module, built after monomorphization.
    pub merged: MergedModule,
    /// Warnings accumulate; errors abort.
    pub warnings: Vec<Diagnostic>,
}

impl Session {
    pub fn new(options: Options, root: std::path::PathBuf) -> Self {
        Self {
            options,
            sources: SourceMap::new(),
            program: Program::new(root),
            scopes: Scopes::new(),
            symbols: SymbolTable::new(),
            bindings: Bindings::new(),
            types: TypeTable::new(),
            funcs: FxHashMap::default(),
            node_scopes: FxHashMap::default(),
            record_types: FxHashMap::default(),
            tuple_types: FxHashMap::default(),
            import_map: FxHashMap::default(),
            merged: MergedModule::default(),
            warnings: Vec::new(),
        }
    }

    /// Field list of a named type as seen from an instance. Tuple types are
    /// program-wide; record types belong to the instance that declared
    /// them. As a fallback (merged-module contexts where the declaring
    /// instance differs), a record name declared consistently resolves too.
    pub fn fields_of(&self, instance: InstanceId, name: &str) -> Option<Vec<(String, Type)>> {
        if let Some(elems) = self.tuple_types.get(name) {
            return Some(
                elems
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| (format!("__{i}"), ty.clone()))
                    .collect(),
            );
        }
        if let Some(fields) = self.record_types.get(&(instance, name.to_string())) {
            return Some(fields.clone());
        }
        let mut found: Option<&Vec<(String, Type)>> = None;
        for ((_, n), fields) in &self.record_types {
            if n == name {
                if found.is_some() {
                    return None;
                }
                found = Some(fields);
            }
        }
        found.cloned()
    }

    /// Register a tuple type, returning its synthetic name.
    pub fn intern_tuple(&mut self, elems: Vec<Type>) -> String {
        let name = Type::tuple_name(&elems);
        self.tuple_types.entry(name.clone()).or_insert(elems);
        name
    }

    /// Look up the signature of a function symbol.
    pub fn sig(&self, symbol: SymbolId) -> Option<&FuncSig> {
        self.funcs.get(&symbol)
    }
}
