//! Configuration specification types.
//!
//! This module defines the structs that map to the `infragraph.yaml` file:
//! variables, resources with attribute expressions, outputs, and the state
//! and engine sections.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::expr::{Condition, Expression};
use super::value::{TypeConstraint, Value};

/// Default number of concurrently applied operations.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Default state directory for the local backend.
pub const DEFAULT_STATE_DIR: &str = ".infragraph";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    /// Project-level configuration.
    #[serde(default)]
    pub project: ProjectConfig,
    /// Input variables, in declaration order.
    #[serde(default)]
    pub variables: IndexMap<String, VariableDecl>,
    /// Resource declarations, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    /// Output values, in declaration order.
    #[serde(default)]
    pub outputs: IndexMap<String, OutputDecl>,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Engine options.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name, used in lock holders and logs.
    #[serde(default = "default_project_name")]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            description: None,
        }
    }
}

/// An input variable declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariableDecl {
    /// Type constraint.
    #[serde(rename = "type", default)]
    pub var_type: TypeConstraint,
    /// Default value used when no value is supplied.
    #[serde(default)]
    pub default: Option<Value>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Validation rules, checked in order.
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
    /// Hides the value in plan and output rendering.
    #[serde(default)]
    pub sensitive: bool,
}

/// A variable validation rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRule {
    /// Predicate the bound value must satisfy.
    pub condition: Condition,
    /// Message reported when the predicate fails.
    pub error_message: String,
}

/// A resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDecl {
    /// Resource type, resolved against the provider schema.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name, unique within its type.
    pub name: String,
    /// Number of instances; evaluated against variables only.
    #[serde(default)]
    pub count: Option<Expression>,
    /// Attribute expressions.
    #[serde(default)]
    pub attributes: BTreeMap<String, Expression>,
    /// Explicit ordering dependencies (`type.name`), on top of references.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceDecl {
    /// Returns `type.name`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

/// An output declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputDecl {
    /// Output expression.
    pub value: Expression,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Hides the value when rendered.
    #[serde(default)]
    pub sensitive: bool,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Local state directory (defaults to `.infragraph`).
    #[serde(default)]
    pub path: Option<String>,
    /// How long to wait for the state lock, in seconds.
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
}

impl StateConfig {
    /// Returns the configured state directory or the default.
    #[must_use]
    pub fn dir(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_STATE_DIR)
    }
}

/// Engine options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of concurrently applied operations.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Re-read recorded resources through the provider before diffing.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            refresh: default_refresh(),
        }
    }
}

fn default_project_name() -> String {
    String::from("infragraph")
}

const fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

const fn default_refresh() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config: Configuration = serde_json::from_value(json!({})).expect("empty config");
        assert_eq!(config.project.name, "infragraph");
        assert_eq!(config.engine.parallelism, DEFAULT_PARALLELISM);
        assert!(config.engine.refresh);
        assert_eq!(config.state.dir(), DEFAULT_STATE_DIR);
    }

    #[test]
    fn test_resource_decl() {
        let decl: ResourceDecl = serde_json::from_value(json!({
            "type": "subnet",
            "name": "public",
            "count": {"var": "az_count"},
            "attributes": {
                "vpc_id": {"ref": "vpc.main.id"},
                "map_public_ip_on_launch": true
            }
        }))
        .expect("resource");
        assert_eq!(decl.key(), "subnet.public");
        assert!(decl.count.is_some());
        assert_eq!(decl.attributes.len(), 2);
        assert!(decl.depends_on.is_empty());
    }

    #[test]
    fn test_variable_with_validation() {
        let decl: VariableDecl = serde_json::from_value(json!({
            "type": "string",
            "default": "dev",
            "validation": [{
                "condition": {"one_of": {"value": {"var": "environment"}, "options": ["dev", "prod"]}},
                "error_message": "bad environment"
            }]
        }))
        .expect("variable");
        assert_eq!(decl.var_type, TypeConstraint::String);
        assert_eq!(decl.default, Some(Value::from("dev")));
        assert_eq!(decl.validation.len(), 1);
    }
}
