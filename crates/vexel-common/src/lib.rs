//! Shared infrastructure for the Vexel compiler frontend.
//!
//! Everything in this crate is pass-agnostic: byte-offset spans and the
//! source map ([`span`], [`source`]), the diagnostic model ([`diag`]),
//! frontend configuration ([`options`]), and the generic fixpoint worklist
//! ([`worklist`]) shared by the optimizer and the analysis passes.

pub mod diag;
pub mod options;
pub mod source;
pub mod span;
pub mod token;
pub mod worklist;

pub use diag::{CompileError, Diagnostic, DiagnosticSink, Severity, VecSink};
pub use options::{Options, Strictness};
pub use source::{SourceFile, SourceLoc, SourceMap};
pub use span::{FileId, Span};
pub use worklist::Worklist;
