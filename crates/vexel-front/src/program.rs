//! The program: loaded modules, per-scope instances, and the merged module
//! handed to the back half of the pipeline.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Serialize;

use vexel_parser::ast::{Module, NodeIds, Stmt};

use crate::scope::ScopeId;

/// A unique identifier for a loaded module (one per normalized path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ModuleId(pub u32);

/// A unique identifier for a module instance. Instance 0 is the entry
/// module's top-level instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub u32);

pub const ENTRY_INSTANCE: InstanceId = InstanceId(0);

/// Metadata for one loaded module.
#[derive(Debug)]
pub struct ModuleInfo {
    pub id: ModuleId,
    /// Normalized path, relative to the project root where possible.
    pub path: PathBuf,
    pub module: Module,
}

/// A concrete lexical use of a module. Instances of the same module do not
/// share mutable state: every instance gets its own scope and its own
/// symbols for the module's globals.
#[derive(Debug)]
pub struct ModuleInstance {
    pub id: InstanceId,
    pub module: ModuleId,
    /// The instance's own top-level scope.
    pub scope: ScopeId,
    /// The instance that imported this one (`None` for the entry).
    pub parent: Option<InstanceId>,
}

/// One top-level item of the merged module: a statement evaluated in the
/// context of a particular instance.
#[derive(Debug)]
pub struct MergedItem {
    pub instance: InstanceId,
    pub stmt: Stmt,
}

/// The merged module: every instance's top-level statements in
/// initialization order (imports topologically first, declaration order
/// within a module), plus monomorphized instantiations.
#[derive(Debug, Default)]
pub struct MergedModule {
    pub items: Vec<MergedItem>,
}

/// The catalogue of loaded modules and their instances.
#[derive(Debug, Default)]
pub struct Program {
    pub modules: Vec<ModuleInfo>,
    path_to_id: FxHashMap<PathBuf, ModuleId>,
    pub instances: Vec<ModuleInstance>,
    /// Import edges in resolution order: `(importer, imported)`. The merged
    /// module emits imported instances before their importer.
    pub imports: Vec<(InstanceId, InstanceId)>,
    /// Monomorphized function declarations, owned per instance. The merged
    /// module splices these in after the owning instance's statements.
    pub instantiations: Vec<(InstanceId, Stmt)>,
    /// FIFO of instantiation indices minted by the checker, drained by the
    /// monomorphizer pass.
    pub pending_instantiations: VecDeque<usize>,
    /// Program-wide node-id source; also used by passes that synthesize
    /// nodes (desugaring, monomorphization, residualization).
    pub ids: NodeIds,
    /// Project root used to resolve imports and resource embeds.
    pub root: PathBuf,
}

impl Program {
    pub fn new(root: PathBuf) -> Self {
        Self { root, ..Self::default() }
    }

    pub fn add_module(&mut self, path: PathBuf, module: Module) -> ModuleId {
        debug_assert!(!self.path_to_id.contains_key(&path), "duplicate module load");
        let id = ModuleId(self.modules.len() as u32);
        self.path_to_id.insert(path.clone(), id);
        self.modules.push(ModuleInfo { id, path, module });
        id
    }

    pub fn module_by_path(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    pub fn module(&self, id: ModuleId) -> &ModuleInfo {
        &self.modules[id.0 as usize]
    }

    pub fn add_instance(&mut self, module: ModuleId, scope: ScopeId, parent: Option<InstanceId>) -> InstanceId {
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(ModuleInstance { id, module, scope, parent });
        id
    }

    pub fn instance(&self, id: InstanceId) -> &ModuleInstance {
        &self.instances[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_registry_round_trip() {
        let mut program = Program::new(PathBuf::from("."));
        let id = program.add_module("a/b.vx".into(), Module::default());
        assert_eq!(program.module_by_path(Path::new("a/b.vx")), Some(id));
        assert_eq!(program.module(id).path, PathBuf::from("a/b.vx"));
        assert_eq!(program.module_by_path(Path::new("c.vx")), None);
    }

    #[test]
    fn instances_are_sequential() {
        let mut program = Program::new(PathBuf::from("."));
        let module = program.add_module("m.vx".into(), Module::default());
        let a = program.add_instance(module, ScopeId(0), None);
        let b = program.add_instance(module, ScopeId(1), Some(a));
        assert_eq!(a, InstanceId(0));
        assert_eq!(b, InstanceId(1));
        assert_eq!(program.instance(b).parent, Some(a));
    }
}
