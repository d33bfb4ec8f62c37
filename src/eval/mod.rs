//! Expression evaluation.
//!
//! This module provides:
//! - The [`Evaluator`] resolving expressions and conditions
//! - The [`ResourceEnv`] of resolved upstream attributes
//! - Built-in functions

mod env;
mod evaluator;
mod functions;

pub use env::{ResolvedResource, ResourceEnv};
pub use evaluator::{Evaluator, Scope};
pub use functions::parse_cidr;
