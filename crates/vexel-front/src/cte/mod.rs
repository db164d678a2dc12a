//! Compile-time evaluation: the value model and the tree interpreter.

pub mod eval;
pub mod value;

pub use eval::{CtOutcome, Evaluator, RECURSION_LIMIT, STEP_LIMIT};
pub use value::{Composite, CtValue};
