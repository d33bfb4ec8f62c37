//! Configuration validation and variable binding.
//!
//! [`ConfigValidator`] checks the structure of a configuration before any
//! evaluation. [`VariableBinder`] binds every declared variable once per run
//! and enforces its type and validation rules.

use crate::address::is_valid_segment;
use crate::error::{ConfigError, InfraError, Result};
use crate::eval::{Evaluator, ResourceEnv, Scope};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::debug;

use super::expr::Reference;
use super::parser::env_variable;
use super::spec::{Configuration, ResourceDecl, VariableDecl};
use super::value::Variables;

/// Validator for configuration structure.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all issues found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Structural errors.
    pub errors: Vec<ValidationIssue>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// A single validation finding.
#[derive(Debug)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// Duplicate resource declarations are left to graph construction.
    ///
    /// # Errors
    ///
    /// Returns the first structural error.
    pub fn validate(&self, config: &Configuration) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_variables(config, &mut result);
        Self::validate_resources(config, &mut result);
        Self::validate_outputs(config, &mut result);
        Self::collect_warnings(config, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first = &result.errors[0];
            Err(InfraError::Config(ConfigError::Invalid {
                field: first.field.clone(),
                message: first.message.clone(),
            }))
        }
    }

    fn validate_project(config: &Configuration, result: &mut ValidationResult) {
        if config.project.name.trim().is_empty() {
            result.error("project.name", "Project name cannot be empty");
        }
        if config.engine.parallelism == 0 {
            result.error("engine.parallelism", "Parallelism must be at least 1");
        }
    }

    fn validate_variables(config: &Configuration, result: &mut ValidationResult) {
        for (name, decl) in &config.variables {
            let field = format!("variables.{name}");
            if !is_valid_segment(name) {
                result.error(&field, format!("Variable name '{name}' is invalid"));
            }
            for (i, rule) in decl.validation.iter().enumerate() {
                if rule.error_message.trim().is_empty() {
                    result.error(
                        &format!("{field}.validation[{i}]"),
                        "Validation rule needs an error_message",
                    );
                }
                let mut foreign = false;
                rule.condition.walk(&mut |expr| {
                    foreign |= expr
                        .references()
                        .iter()
                        .any(|r| !matches!(r, Reference::Variable(_)));
                });
                if foreign {
                    result.error(
                        &format!("{field}.validation[{i}]"),
                        "Validation rules may only reference variables",
                    );
                }
            }
        }
    }

    fn validate_resources(config: &Configuration, result: &mut ValidationResult) {
        let declared: HashSet<String> = config.resources.iter().map(ResourceDecl::key).collect();

        for (i, resource) in config.resources.iter().enumerate() {
            let field = format!("resources[{i}]");
            if !is_valid_segment(&resource.resource_type) {
                result.error(
                    &format!("{field}.type"),
                    format!("Resource type '{}' is invalid", resource.resource_type),
                );
            }
            if !is_valid_segment(&resource.name) {
                result.error(
                    &format!("{field}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with '_' or '-'.",
                        resource.name
                    ),
                );
            }
            for attribute in resource.attributes.keys() {
                if !is_valid_segment(attribute) {
                    result.error(
                        &format!("{field}.attributes"),
                        format!("Attribute name '{attribute}' is invalid"),
                    );
                }
            }
            for dependency in &resource.depends_on {
                if !declared.contains(dependency) {
                    result.error(
                        &format!("{field}.depends_on"),
                        format!("'{dependency}' is not a declared resource"),
                    );
                }
            }
        }
    }

    fn validate_outputs(config: &Configuration, result: &mut ValidationResult) {
        for name in config.outputs.keys() {
            if !is_valid_segment(name) {
                result.error(
                    &format!("outputs.{name}"),
                    format!("Output name '{name}' is invalid"),
                );
            }
        }
    }

    fn collect_warnings(config: &Configuration, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result.warnings.push(String::from("No resources declared"));
        }

        let mut used = HashSet::new();
        let mut mark = |expr: &super::expr::Expression| {
            for reference in expr.references() {
                if let Reference::Variable(name) = reference {
                    used.insert(name.to_string());
                }
            }
        };
        for resource in &config.resources {
            resource.count.iter().for_each(&mut mark);
            resource.attributes.values().for_each(&mut mark);
        }
        config.outputs.values().for_each(|o| mark(&o.value));

        for name in config.variables.keys() {
            if !used.contains(name) {
                result
                    .warnings
                    .push(format!("Variable '{name}' is declared but never used"));
            }
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

type EnvLookup<'a> = Box<dyn Fn(&str) -> Option<String> + 'a>;

/// Binds declared variables for one run.
///
/// Precedence: supplied value, then `INFRAGRAPH_VAR_<name>`, then default.
pub struct VariableBinder<'a> {
    declarations: &'a IndexMap<String, VariableDecl>,
    env_lookup: EnvLookup<'a>,
}

impl std::fmt::Debug for VariableBinder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableBinder")
            .field("declarations", &self.declarations.len())
            .finish_non_exhaustive()
    }
}

impl<'a> VariableBinder<'a> {
    /// Creates a binder reading the process environment.
    #[must_use]
    pub fn new(declarations: &'a IndexMap<String, VariableDecl>) -> Self {
        Self {
            declarations,
            env_lookup: Box::new(env_variable),
        }
    }

    /// Replaces the environment lookup.
    #[must_use]
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String> + 'a) -> Self {
        self.env_lookup = Box::new(lookup);
        self
    }

    /// Binds every declared variable and runs its validation rules.
    ///
    /// # Errors
    ///
    /// Returns an error for undeclared supplied values, missing values,
    /// type mismatches, or the first failing validation rule.
    pub fn bind(&self, supplied: &Variables) -> Result<Variables> {
        if let Some(name) = supplied.keys().find(|k| !self.declarations.contains_key(*k)) {
            return Err(InfraError::Config(ConfigError::Invalid {
                field: format!("var.{name}"),
                message: String::from("a value was supplied for an undeclared variable"),
            }));
        }

        let mut bound = Variables::new();
        for (name, decl) in self.declarations {
            let raw = supplied
                .get(name)
                .cloned()
                .or_else(|| (self.env_lookup)(name).map(Into::into))
                .or_else(|| decl.default.clone())
                .ok_or_else(|| ConfigError::MissingVariable { name: name.clone() })?;

            let value = decl.var_type.coerce(raw);
            if !decl.var_type.accepts(&value) {
                return Err(InfraError::Config(ConfigError::TypeMismatch {
                    origin: format!("var.{name}"),
                    field: name.clone(),
                    expected: decl.var_type.to_string(),
                    found: value.type_name().to_string(),
                }));
            }
            bound.insert(name.clone(), value);
        }

        let env = ResourceEnv::new();
        let evaluator = Evaluator::new(&bound, &env);
        for (name, decl) in self.declarations {
            let origin = format!("var.{name}");
            for rule in &decl.validation {
                let passed = evaluator.evaluate_condition(&rule.condition, Scope::new(&origin))?;
                if passed != Some(true) {
                    debug!("Variable {} failed validation", name);
                    return Err(InfraError::Config(ConfigError::Validation {
                        variable: name.clone(),
                        message: rule.error_message.clone(),
                    }));
                }
            }
        }

        debug!("Bound {} variables", bound.len());
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, Value};

    fn config(yaml: &str) -> Configuration {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid config")
    }

    const VARIABLES: &str = r#"
variables:
  environment:
    type: string
    validation:
      - condition: { one_of: { value: { var: environment }, options: [dev, staging, prod] } }
        error_message: "environment must be one of dev, staging, prod"
  az_count:
    type: number
    default: 2
    validation:
      - condition: { greater_than: [{ var: az_count }, 0] }
        error_message: "az_count must be positive"
"#;

    #[test]
    fn test_binding_precedence() {
        let config = config(VARIABLES);
        let mut supplied = Variables::new();
        supplied.insert("environment".into(), Value::from("prod"));

        let bound = VariableBinder::new(&config.variables)
            .with_env(|name| (name == "environment").then(|| String::from("dev")))
            .bind(&supplied)
            .expect("binds");
        assert_eq!(bound.get("environment"), Some(&Value::from("prod")));
        assert_eq!(bound.get("az_count"), Some(&Value::from(2_i64)));

        let bound = VariableBinder::new(&config.variables)
            .with_env(|name| match name {
                "environment" => Some(String::from("staging")),
                "az_count" => Some(String::from("3")),
                _ => None,
            })
            .bind(&Variables::new())
            .expect("binds");
        assert_eq!(bound.get("environment"), Some(&Value::from("staging")));
        assert_eq!(bound.get("az_count"), Some(&Value::from(3_i64)));
    }

    #[test]
    fn test_validation_rule_message_surfaces() {
        let config = config(VARIABLES);
        let mut supplied = Variables::new();
        supplied.insert("environment".into(), Value::from("qa"));

        let err = VariableBinder::new(&config.variables)
            .with_env(|_| None)
            .bind(&supplied)
            .unwrap_err();
        match err {
            InfraError::Config(ConfigError::Validation { variable, message }) => {
                assert_eq!(variable, "environment");
                assert_eq!(message, "environment must be one of dev, staging, prod");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_type_mismatch_and_missing() {
        let config = config(VARIABLES);
        let mut supplied = Variables::new();
        supplied.insert("environment".into(), Value::from("dev"));
        supplied.insert("az_count".into(), Value::from("many"));

        let err = VariableBinder::new(&config.variables)
            .with_env(|_| None)
            .bind(&supplied)
            .unwrap_err();
        assert!(matches!(err, InfraError::Config(ConfigError::TypeMismatch { .. })));

        let err = VariableBinder::new(&config.variables)
            .with_env(|_| None)
            .bind(&Variables::new())
            .unwrap_err();
        assert!(matches!(
            err,
            InfraError::Config(ConfigError::MissingVariable { ref name }) if name == "environment"
        ));
    }

    #[test]
    fn test_undeclared_supplied_variable() {
        let config = config(VARIABLES);
        let mut supplied = Variables::new();
        supplied.insert("environment".into(), Value::from("dev"));
        supplied.insert("region".into(), Value::from("eu"));

        let err = VariableBinder::new(&config.variables)
            .with_env(|_| None)
            .bind(&supplied)
            .unwrap_err();
        assert!(matches!(err, InfraError::Config(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_structural_validation() {
        let config = config(
            r"
resources:
  - type: vpc
    name: Main
  - type: subnet
    name: a
    depends_on: [vpc.other]
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(matches!(err, InfraError::Config(ConfigError::Invalid { ref field, .. }) if field == "resources[0].name"));
    }

    #[test]
    fn test_unused_variable_warning() {
        let config = config(
            r"
variables:
  unused: { default: 1 }
resources:
  - type: vpc
    name: main
    attributes:
      cidr_block: 10.0.0.0/16
",
        );
        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }
}
