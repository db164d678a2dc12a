//! Scopes, symbols, and the `(instance, node)` binding side tables.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use vexel_common::span::Span;
use vexel_parser::ast::types::Type;
use vexel_parser::ast::NodeId;

use crate::program::{InstanceId, ModuleId};

/// A scope in the lexical scope tree. Ids are monotonic across the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub u32);

#[derive(Debug)]
struct ScopeData {
    parent: Option<ScopeId>,
    names: FxHashMap<String, SymbolId>,
}

/// The scope arena. Lookup walks the parent chain; shadowing anywhere along
/// the chain is forbidden except for the loop variable `_`.
#[derive(Debug, Default)]
pub struct Scopes {
    scopes: Vec<ScopeData>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData { parent, names: FxHashMap::default() });
        id
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0 as usize].parent
    }

    /// Look a name up in `scope` and its ancestors.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let data = &self.scopes[id.0 as usize];
            if let Some(sym) = data.names.get(name) {
                return Some(*sym);
            }
            current = data.parent;
        }
        None
    }

    /// Look a name up in `scope` only (no parent walk).
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scopes[scope.0 as usize].names.get(name).copied()
    }

    /// Whether defining `name` in `scope` would shadow an existing binding
    /// in the scope or any ancestor. The loop variable `_` is exempt.
    pub fn would_shadow(&self, scope: ScopeId, name: &str) -> bool {
        name != "_" && self.lookup(scope, name).is_some()
    }

    /// Define a name. The caller is responsible for the shadowing check;
    /// redefinition of `_` silently replaces the outer loop variable.
    pub fn define(&mut self, scope: ScopeId, name: String, symbol: SymbolId) {
        self.scopes[scope.0 as usize].names.insert(name, symbol);
    }

    /// Iterate the names defined directly in a scope.
    pub fn names_in(&self, scope: ScopeId) -> impl Iterator<Item = (&String, &SymbolId)> {
        self.scopes[scope.0 as usize].names.iter()
    }
}

/// What kind of entity a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    Variable,
    Constant,
    Function,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolId(pub u32);

/// A named entity: variable, constant, function, or type.
#[derive(Debug)]
pub struct Symbol {
    pub id: SymbolId,
    pub kind: SymbolKind,
    /// Qualified name for methods (`T::f`), bare name otherwise.
    pub name: String,
    /// For functions this is the return type (`None` until inferred, and
    /// for void functions). For types it is the named type itself.
    pub ty: Option<Type>,
    pub mutable: bool,
    pub exported: bool,
    pub external: bool,
    /// The declaring statement (or the assignment that introduced a local,
    /// or the parameter node).
    pub decl: NodeId,
    pub decl_span: Span,
    pub module: ModuleId,
    pub instance: InstanceId,
    /// The scope the symbol was defined in.
    pub scope: ScopeId,
    /// Block-local (introduced by assignment or parameter binding), as
    /// opposed to module top-level.
    pub is_local: bool,
    /// A `$name` expression parameter: captures an unevaluated expression,
    /// substituted at use sites; its uses stay untyped.
    pub expr_param: bool,
}

/// The symbol arena.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        symbol.id = id;
        self.symbols.push(symbol);
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Side tables mapping `(instance, AST node)` to resolution results.
///
/// Kept outside the AST so that cloned subtrees (merged module items) keep
/// their bindings: identity is the node id, not the allocation.
#[derive(Debug, Default)]
pub struct Bindings {
    resolved: FxHashMap<(InstanceId, NodeId), SymbolId>,
    /// Assignments that introduce a new variable rather than writing an
    /// existing one.
    new_variables: FxHashSet<(InstanceId, NodeId)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, instance: InstanceId, node: NodeId, symbol: SymbolId) {
        self.resolved.insert((instance, node), symbol);
    }

    pub fn resolve(&self, instance: InstanceId, node: NodeId) -> Option<SymbolId> {
        self.resolved.get(&(instance, node)).copied()
    }

    pub fn mark_new_variable(&mut self, instance: InstanceId, node: NodeId) {
        self.new_variables.insert((instance, node));
    }

    pub fn is_new_variable(&self, instance: InstanceId, node: NodeId) -> bool {
        self.new_variables.contains(&(instance, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexel_common::span::{FileId, Span};

    fn dummy_symbol(name: &str) -> Symbol {
        Symbol {
            id: SymbolId(0),
            kind: SymbolKind::Variable,
            name: name.into(),
            ty: None,
            mutable: false,
            exported: false,
            external: false,
            decl: NodeId(0),
            decl_span: Span::new(FileId(0), 0, 0),
            module: ModuleId(0),
            instance: InstanceId(0),
            scope: ScopeId(0),
            is_local: true,
            expr_param: false,
        }
    }

    #[test]
    fn lookup_walks_parents() {
        let mut scopes = Scopes::new();
        let mut symbols = SymbolTable::new();
        let root = scopes.push(None);
        let child = scopes.push(Some(root));

        let sym = symbols.add(dummy_symbol("x"));
        scopes.define(root, "x".into(), sym);

        assert_eq!(scopes.lookup(child, "x"), Some(sym));
        assert_eq!(scopes.lookup_local(child, "x"), None);
        assert_eq!(scopes.lookup(child, "y"), None);
    }

    #[test]
    fn shadowing_forbidden_except_loop_variable() {
        let mut scopes = Scopes::new();
        let mut symbols = SymbolTable::new();
        let root = scopes.push(None);
        let child = scopes.push(Some(root));

        let outer = symbols.add(dummy_symbol("n"));
        scopes.define(root, "n".into(), outer);
        assert!(scopes.would_shadow(child, "n"));

        let wild = symbols.add(dummy_symbol("_"));
        scopes.define(root, "_".into(), wild);
        assert!(!scopes.would_shadow(child, "_"), "`_` may rebind in nested loops");
    }

    #[test]
    fn bindings_key_on_instance_and_node() {
        let mut bindings = Bindings::new();
        let sym = SymbolId(3);
        bindings.bind(InstanceId(0), NodeId(9), sym);
        assert_eq!(bindings.resolve(InstanceId(0), NodeId(9)), Some(sym));
        assert_eq!(bindings.resolve(InstanceId(1), NodeId(9)), None);

        bindings.mark_new_variable(InstanceId(0), NodeId(4));
        assert!(bindings.is_new_variable(InstanceId(0), NodeId(4)));
        assert!(!bindings.is_new_variable(InstanceId(1), NodeId(4)));
    }
}
