//! AST, type representation, and parser for the Vexel language.
//!
//! The parser produces the plain tagged-variant tree consumed by the
//! semantic pipeline in `vexel-front`. Node identity is explicit: every
//! expression and statement carries a [`ast::NodeId`] minted from a
//! program-wide [`ast::NodeIds`] counter, which is what the frontend's
//! side tables key on.

pub mod ast;
mod parser;

pub use parser::parse;
