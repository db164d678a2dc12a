//! The semantic pipeline of the Vexel compiler frontend.
//!
//! Turns parsed modules into a backend-ready [`AnalyzedProgram`]:
//!
//! ```text
//! loader -> resolver -> annotation validator -> type checker
//!        -> monomorphizer -> lowerer -> optimizer (CTE fixpoint)
//!        -> residualizer -> analyzer -> type-use validator
//! ```
//!
//! The pipeline is single-threaded and strictly sequential. Errors abort
//! at the failing pass; warnings accumulate and reach the caller's sink
//! either way.

pub mod analysis;
pub mod annotations;
pub mod backend;
pub mod cte;
pub mod handoff;
pub mod loader;
pub mod lower;
pub mod monomorph;
pub mod optimizer;
pub mod program;
pub mod residual;
pub mod resolver;
pub mod scope;
pub mod session;
pub mod typeck;
pub mod typeuse;
pub mod types;

use std::path::Path;

use log::debug;

use vexel_common::diag::{CompileError, DiagnosticSink};
use vexel_common::options::Options;

pub use analysis::{AnalysisFacts, ReentrancySet, VarMutability};
pub use backend::{AnalysisPass, BackendRequirements, Reentrancy};
pub use cte::{CtOutcome, CtValue};
pub use handoff::AnalyzedProgram;
pub use optimizer::OptimizationFacts;
pub use program::{InstanceId, ModuleId, ENTRY_INSTANCE};
pub use scope::{Symbol, SymbolId, SymbolKind};
pub use session::Session;

/// Run the whole frontend over `entry`, resolving imports against the
/// file's directory first and `root` second.
///
/// Diagnostics go to `sink`; the first error also aborts with `Err`.
pub fn compile(
    entry: &Path,
    root: &Path,
    options: Options,
    sink: &mut dyn DiagnosticSink,
) -> Result<AnalyzedProgram, CompileError> {
    let reqs = BackendRequirements::for_backend(&options.backend, &options.backend_options)?;
    reqs.validate()?;

    let mut sess = Session::new(options, loader::normalize(root));
    let result = run_pipeline(entry, &reqs, &mut sess);

    let warnings = std::mem::take(&mut sess.warnings);
    for warning in warnings {
        sink.report(warning, &sess.sources);
    }
    match result {
        Ok((analysis, optimization)) => {
            Ok(AnalyzedProgram::new(sess, analysis, optimization))
        }
        Err(error) => {
            sink.report(error.clone().into_diagnostic(), &sess.sources);
            Err(error)
        }
    }
}

fn run_pipeline(
    entry: &Path,
    reqs: &BackendRequirements,
    sess: &mut Session,
) -> Result<(AnalysisFacts, OptimizationFacts), CompileError> {
    debug!("compiling {}", entry.display());
    loader::load_program(entry, sess)?;
    resolver::resolve_program(sess)?;
    annotations::validate_annotations(sess)?;
    typeck::check_program(sess)?;
    monomorph::monomorphize(sess)?;
    lower::lower_program(sess)?;
    let optimization = optimizer::optimize(sess)?;
    residual::residualize(sess, &optimization)?;
    let analysis = analysis::analyze(sess, &optimization, reqs)?;
    typeuse::validate_type_use(sess, &analysis, &optimization)?;
    Ok((analysis, optimization))
}
