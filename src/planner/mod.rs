//! Planning and apply.
//!
//! This module compares the desired resource graph with recorded state,
//! produces an ordered plan, and executes it against a provider.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffEngine, DriftEntry, DriftKind, Refreshed, resolve_desired, schema_of};
pub use executor::{
    ApplyExecutor, ApplyReport, OperationResult, OperationStatus, OutputValue, RunStatus,
};
pub use plan::{
    AttributeChange, OperationKind, Plan, PlanOperation, PlanSummary, order_operations,
};
