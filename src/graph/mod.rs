//! Resource graph.
//!
//! Builds the dependency DAG of resource instances from a configuration:
//! count expansion, reference edges, cycle detection and a deterministic
//! topological order.

mod builder;
mod dag;

pub use builder::{GraphBuilder, ResourceGraph, ResourceNode};
pub use dag::topological_order;
