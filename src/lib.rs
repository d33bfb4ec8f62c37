// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Infragraph
//!
//! A declarative, dependency-resolving infrastructure engine.
//!
//! ## Overview
//!
//! Infragraph turns a declared set of resources into a plan and converges
//! remote infrastructure to it:
//!
//! - Describe resources, variables and outputs in a YAML configuration file
//! - Resolve references between resources into a dependency graph
//! - Diff the desired graph against recorded state into an ordered plan
//! - Apply the plan concurrently through a provider plugin
//!
//! ## Architecture
//!
//! 1. **Graph**: resources are expanded and linked by their references
//! 2. **State**: the last applied attributes of every resource, one record each
//! 3. **Planner**: classifies every address as create, update, replace,
//!    destroy or no-op, and orders the operations
//! 4. **Executor**: runs operations on a bounded worker pool, committing state
//!    after each provider call
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, values, expressions and validation
//! - [`eval`]: Expression evaluation
//! - [`graph`]: Resource graph construction
//! - [`state`]: State storage backends (local, memory)
//! - [`provider`]: Provider plugin interface and the simulated provider
//! - [`planner`]: Diff computation, plans and plan execution
//! - [`engine`]: Run orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! variables:
//!   az_count:
//!     type: number
//!     default: 2
//!
//! resources:
//!   - type: vpc
//!     name: main
//!     attributes:
//!       cidr_block: 10.0.0.0/16
//!   - type: subnet
//!     name: public
//!     count: { var: az_count }
//!     attributes:
//!       vpc_id: { ref: vpc.main.id }
//!       cidr_block: { call: cidrsubnet, args: ["10.0.0.0/16", 8, { count_index: true }] }
//!
//! outputs:
//!   subnet_ids:
//!     value: { splat: "subnet.public[*].id" }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod address;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use address::ResourceAddress;
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, Configuration, Value};
pub use engine::{Engine, RunContext, RunOptions};
pub use error::{InfraError, Result};
pub use graph::{GraphBuilder, ResourceGraph};
pub use planner::{ApplyExecutor, ApplyReport, DiffEngine, Plan};
pub use provider::{Provider, SimulatedProvider};
pub use state::{LocalStateStore, MemoryStateStore, StateStore};

/// Network topology configuration written by `infragraph init`.
pub const NETWORK_TEMPLATE: &str = include_str!("../templates/network.infra.yaml");
