//! Frontend configuration passed in by the driver.

use rustc_hash::FxHashMap;

/// How strictly declaration sites must be annotated.
///
/// Level 0 (relaxed) is the canonical semantics; levels 1 and 2 are opt-in
/// refinements applied only at declaration sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Full inference everywhere.
    #[default]
    Relaxed,
    /// Block-local declarations must have an annotation or a concretely
    /// typed initializer.
    LocalAnnotations,
    /// Additionally, non-generic function parameters and returns must be
    /// explicitly annotated.
    Full,
}

impl Strictness {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Strictness::Relaxed),
            1 => Some(Strictness::LocalAnnotations),
            2 => Some(Strictness::Full),
            _ => None,
        }
    }
}

/// Configuration for a single frontend run.
#[derive(Debug, Clone)]
pub struct Options {
    /// Emit per-pass tracing through `log`.
    pub verbose: bool,
    /// Write the analysis report after a successful run.
    pub emit_analysis: bool,
    /// Allow process expressions to execute during compile-time evaluation.
    /// Off by default; enabling it means trusting the source input.
    pub allow_process: bool,
    /// Target backend name. Opaque to the frontend.
    pub backend: String,
    /// Per-backend options. Opaque to the frontend.
    pub backend_options: FxHashMap<String, String>,
    /// Output stem used for derived artifacts such as `<stem>.analysis.txt`.
    pub out_stem: String,
    pub strictness: Strictness,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbose: false,
            emit_analysis: false,
            allow_process: false,
            backend: String::from("c"),
            backend_options: FxHashMap::default(),
            out_stem: String::from("out"),
            strictness: Strictness::Relaxed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictness_levels() {
        assert_eq!(Strictness::from_level(0), Some(Strictness::Relaxed));
        assert_eq!(Strictness::from_level(2), Some(Strictness::Full));
        assert_eq!(Strictness::from_level(3), None);
    }
}
