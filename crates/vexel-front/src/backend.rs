//! The backend boundary: what the frontend needs to know about its
//! consumer before running.
//!
//! Backends themselves live outside this crate; the frontend only
//! validates their analysis requirements and uses the reentrancy defaults
//! during analysis.

use rustc_hash::FxHashMap;
use serde::Serialize;

use vexel_common::diag::CompileError;

/// Calling-context classification used by the reentrancy analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reentrancy {
    Reentrant,
    Nonreentrant,
}

/// Analysis passes a backend can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalysisPass {
    Reachability,
    Reentrancy,
    Mutability,
    Effects,
    Usage,
}

/// What a backend requires of the frontend's analysis.
pub struct BackendRequirements {
    pub enabled_passes: Vec<AnalysisPass>,
    pub default_entry_reentrancy: Reentrancy,
    pub default_exit_reentrancy: Reentrancy,
    /// Optional per-symbol override of boundary reentrancy, keyed by the
    /// exported/external symbol name.
    pub boundary_reentrancy: Option<Box<dyn Fn(&str) -> Option<Reentrancy>>>,
}

impl std::fmt::Debug for BackendRequirements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRequirements")
            .field("enabled_passes", &self.enabled_passes)
            .field("default_entry_reentrancy", &self.default_entry_reentrancy)
            .field("default_exit_reentrancy", &self.default_exit_reentrancy)
            .field("boundary_reentrancy", &self.boundary_reentrancy.is_some())
            .finish()
    }
}

impl BackendRequirements {
    fn all_passes() -> Vec<AnalysisPass> {
        vec![
            AnalysisPass::Reachability,
            AnalysisPass::Reentrancy,
            AnalysisPass::Mutability,
            AnalysisPass::Effects,
            AnalysisPass::Usage,
        ]
    }

    /// Requirements of a known backend. The backend name is otherwise
    /// opaque to the frontend; per-backend options are passed through.
    pub fn for_backend(
        name: &str,
        _options: &FxHashMap<String, String>,
    ) -> Result<Self, CompileError> {
        match name {
            // Hosted C-like targets run everything in a reentrant world.
            "c" => Ok(Self {
                enabled_passes: Self::all_passes(),
                default_entry_reentrancy: Reentrancy::Reentrant,
                default_exit_reentrancy: Reentrancy::Reentrant,
                boundary_reentrancy: None,
            }),
            // Banked targets default to non-reentrant entry contexts.
            "banked" | "megalinker" => Ok(Self {
                enabled_passes: Self::all_passes(),
                default_entry_reentrancy: Reentrancy::Nonreentrant,
                default_exit_reentrancy: Reentrancy::Nonreentrant,
                boundary_reentrancy: None,
            }),
            other => Err(CompileError::unlocated(format!("unknown backend `{other}`"))),
        }
    }

    /// Validate internal consistency before the pipeline runs.
    pub fn validate(&self) -> Result<(), CompileError> {
        if self.enabled_passes.is_empty() {
            return Err(CompileError::unlocated(
                "backend requirements enable no analysis passes",
            ));
        }
        Ok(())
    }

    pub fn wants(&self, pass: AnalysisPass) -> bool {
        self.enabled_passes.contains(&pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_backends() {
        let opts = FxHashMap::default();
        let c = BackendRequirements::for_backend("c", &opts).unwrap();
        assert_eq!(c.default_entry_reentrancy, Reentrancy::Reentrant);
        let banked = BackendRequirements::for_backend("banked", &opts).unwrap();
        assert_eq!(banked.default_entry_reentrancy, Reentrancy::Nonreentrant);
        assert!(BackendRequirements::for_backend("wasm", &opts).is_err());
    }

    #[test]
    fn validation_requires_passes() {
        let opts = FxHashMap::default();
        let mut reqs = BackendRequirements::for_backend("c", &opts).unwrap();
        assert!(reqs.validate().is_ok());
        reqs.enabled_passes.clear();
        assert!(reqs.validate().is_err());
    }
}
