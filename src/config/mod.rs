//! Configuration module.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `infragraph.yaml`
//! - Values, type constraints and attribute expressions
//! - Structural validation and variable binding
//! - Computing digests for plan staleness and change detection

mod expr;
mod hash;
mod parser;
mod spec;
mod validator;
mod value;

pub use expr::{Condition, Expression, Function, Reference, ResourceRef, SplatRef};
pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, VAR_ENV_PREFIX, env_variable, find_config_file,
    parse_var_assignment,
};
pub use spec::{
    Configuration, DEFAULT_PARALLELISM, DEFAULT_STATE_DIR, EngineConfig, OutputDecl, ProjectConfig,
    ResourceDecl, StateConfig, ValidationRule, VariableDecl,
};
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult, VariableBinder};
pub use value::{Attributes, TypeConstraint, UNKNOWN_PLACEHOLDER, Value, Variables};
