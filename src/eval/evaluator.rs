//! Expression evaluation.
//!
//! The evaluator resolves an expression against the bound variables and the
//! resources already resolved in the run. Unknown values propagate through
//! functions, conditionals and comparisons.

use std::collections::BTreeMap;
use tracing::trace;

use super::env::ResourceEnv;
use super::functions::{self, parse_cidr};
use crate::config::{Attributes, Condition, Expression, Value, Variables};
use crate::error::{ConfigError, Result};

/// Where an expression is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Address (or `var.<name>` / `output.<name>`) owning the expression.
    pub origin: &'a str,
    /// Instance index, for counted resources.
    pub count_index: Option<usize>,
}

impl<'a> Scope<'a> {
    /// Creates a scope without a count index.
    #[must_use]
    pub const fn new(origin: &'a str) -> Self {
        Self {
            origin,
            count_index: None,
        }
    }

    /// Sets the count index.
    #[must_use]
    pub const fn with_count_index(mut self, index: Option<usize>) -> Self {
        self.count_index = index;
        self
    }
}

/// Evaluates expressions against variables and resolved resources.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    variables: &'a Variables,
    env: &'a ResourceEnv,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator.
    #[must_use]
    pub const fn new(variables: &'a Variables, env: &'a ResourceEnv) -> Self {
        Self { variables, env }
    }

    /// Evaluates one expression.
    ///
    /// # Errors
    ///
    /// Returns an error on undeclared references, misplaced `count_index`,
    /// or invalid function arguments.
    pub fn evaluate(&self, expr: &Expression, scope: Scope<'_>) -> Result<Value> {
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Var(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::unknown_reference(scope.origin, format!("var.{name}")).into()),
            Expression::Ref(reference) => self
                .env
                .lookup(reference)
                .ok_or_else(|| ConfigError::unknown_reference(scope.origin, reference.to_string()).into()),
            Expression::Splat(splat) => {
                let instances = self
                    .env
                    .instances_of(&splat.resource_type, &splat.name)
                    .ok_or_else(|| ConfigError::unknown_reference(scope.origin, splat.to_string()))?;
                instances
                    .iter()
                    .map(|address| {
                        self.env
                            .get(address)
                            .map(|resolved| resolved.attribute(&splat.attribute))
                            .ok_or_else(|| {
                                ConfigError::unknown_reference(
                                    scope.origin,
                                    format!("{address}.{}", splat.attribute),
                                )
                                .into()
                            })
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)
            }
            Expression::CountIndex => scope.count_index.map(Value::from).ok_or_else(|| {
                ConfigError::invalid_expression(
                    scope.origin,
                    "count_index used outside a counted resource",
                )
                .into()
            }),
            Expression::Conditional {
                condition,
                then,
                otherwise,
            } => match self.evaluate_condition(condition, scope)? {
                Some(true) => self.evaluate(then, scope),
                Some(false) => self.evaluate(otherwise, scope),
                None => Ok(Value::Unknown),
            },
            Expression::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg, scope))
                    .collect::<Result<Vec<_>>>()?;
                functions::call(*function, args)
                    .map_err(|message| ConfigError::invalid_expression(scope.origin, message).into())
            }
            Expression::List(items) => items
                .iter()
                .map(|item| self.evaluate(item, scope))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Expression::Map(entries) => entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.evaluate(value, scope)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Map),
        }
    }

    /// Evaluates a condition. `None` means the outcome is not yet known.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand cannot be evaluated or a comparison
    /// is applied to non-numbers.
    pub fn evaluate_condition(&self, condition: &Condition, scope: Scope<'_>) -> Result<Option<bool>> {
        match condition {
            Condition::Equals(a, b) => {
                let (a, b) = (self.evaluate(a, scope)?, self.evaluate(b, scope)?);
                Ok(a.loosely_equals(&b))
            }
            Condition::NotEquals(a, b) => {
                let (a, b) = (self.evaluate(a, scope)?, self.evaluate(b, scope)?);
                Ok(a.loosely_equals(&b).map(|eq| !eq))
            }
            Condition::GreaterThan(a, b) => self.compare(a, b, scope, |a, b| a > b),
            Condition::LessThan(a, b) => self.compare(a, b, scope, |a, b| a < b),
            Condition::OneOf { value, options } => {
                let value = self.evaluate(value, scope)?;
                if value.contains_unknown() {
                    return Ok(None);
                }
                Ok(Some(
                    options
                        .iter()
                        .any(|option| value.loosely_equals(option) == Some(true)),
                ))
            }
            Condition::Not(inner) => Ok(self.evaluate_condition(inner, scope)?.map(|b| !b)),
            Condition::All(conditions) => {
                let mut unknown = false;
                for condition in conditions {
                    match self.evaluate_condition(condition, scope)? {
                        Some(false) => return Ok(Some(false)),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                Ok((!unknown).then_some(true))
            }
            Condition::Any(conditions) => {
                let mut unknown = false;
                for condition in conditions {
                    match self.evaluate_condition(condition, scope)? {
                        Some(true) => return Ok(Some(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                Ok((!unknown).then_some(false))
            }
            Condition::Truthy(expr) => Ok(self.evaluate(expr, scope)?.truthiness()),
            Condition::ValidCidr(expr) => match self.evaluate(expr, scope)? {
                Value::Unknown => Ok(None),
                Value::String(s) => Ok(Some(parse_cidr(&s).is_some())),
                _ => Ok(Some(false)),
            },
        }
    }

    /// Evaluates every attribute expression of a resource instance.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation error.
    pub fn evaluate_attributes(
        &self,
        attributes: &BTreeMap<String, Expression>,
        scope: Scope<'_>,
    ) -> Result<Attributes> {
        let resolved = attributes
            .iter()
            .map(|(name, expr)| Ok((name.clone(), self.evaluate(expr, scope)?)))
            .collect::<Result<Attributes>>()?;
        trace!("Evaluated {} attributes for {}", resolved.len(), scope.origin);
        Ok(resolved)
    }

    fn compare(
        &self,
        a: &Expression,
        b: &Expression,
        scope: Scope<'_>,
        op: impl Fn(f64, f64) -> bool,
    ) -> Result<Option<bool>> {
        let (a, b) = (self.evaluate(a, scope)?, self.evaluate(b, scope)?);
        if a.is_unknown() || b.is_unknown() {
            return Ok(None);
        }
        match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok(Some(op(a, b))),
            _ => Err(ConfigError::invalid_expression(
                scope.origin,
                format!("cannot compare {} with {}", a.type_name(), b.type_name()),
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ResourceAddress;
    use crate::eval::ResolvedResource;
    use crate::error::InfraError;
    use serde_json::json;

    fn expr(raw: serde_json::Value) -> Expression {
        Expression::try_from(raw).expect("valid expression")
    }

    fn variables() -> Variables {
        let mut vars = Variables::new();
        vars.insert("environment".into(), Value::from("prod"));
        vars.insert("vpc_cidr".into(), Value::from("10.0.0.0/16"));
        vars
    }

    fn env_with_subnets() -> ResourceEnv {
        let mut env = ResourceEnv::new();
        for i in 0..2 {
            let address = ResourceAddress::indexed("subnet", "public", i);
            env.register_instance(&address);
            let mut attrs = Attributes::new();
            attrs.insert("id".into(), Value::from(format!("subnet-{i}")));
            env.insert(address, ResolvedResource::known(attrs));
        }
        let vpc = ResourceAddress::new("vpc", "main");
        env.register_instance(&vpc);
        env.insert(vpc, ResolvedResource::pending(Attributes::new()));
        env
    }

    #[test]
    fn test_variables_and_functions() {
        let vars = variables();
        let env = ResourceEnv::new();
        let evaluator = Evaluator::new(&vars, &env);
        let scope = Scope::new("subnet.public[1]").with_count_index(Some(1));

        let value = evaluator
            .evaluate(
                &expr(json!({"call": "cidrsubnet", "args": [{"var": "vpc_cidr"}, 8, {"count_index": true}]})),
                scope,
            )
            .expect("evaluates");
        assert_eq!(value, Value::from("10.0.1.0/24"));
    }

    #[test]
    fn test_splat_in_index_order() {
        let vars = variables();
        let env = env_with_subnets();
        let evaluator = Evaluator::new(&vars, &env);

        let value = evaluator
            .evaluate(&expr(json!({"splat": "subnet.public[*].id"})), Scope::new("output.ids"))
            .expect("evaluates");
        assert_eq!(
            value,
            Value::List(vec![Value::from("subnet-0"), Value::from("subnet-1")])
        );
    }

    #[test]
    fn test_unknown_propagates() {
        let vars = variables();
        let env = env_with_subnets();
        let evaluator = Evaluator::new(&vars, &env);
        let scope = Scope::new("subnet.x");

        let value = evaluator
            .evaluate(&expr(json!({"ref": "vpc.main.id"})), scope)
            .expect("evaluates");
        assert_eq!(value, Value::Unknown);

        let value = evaluator
            .evaluate(
                &expr(json!({"call": "format", "args": ["{}-x", {"ref": "vpc.main.id"}]})),
                scope,
            )
            .expect("evaluates");
        assert_eq!(value, Value::Unknown);

        let value = evaluator
            .evaluate(
                &expr(json!({"if": {"equals": [{"ref": "vpc.main.id"}, "x"]}, "then": 1, "else": 2})),
                scope,
            )
            .expect("evaluates");
        assert_eq!(value, Value::Unknown);
    }

    #[test]
    fn test_conditionals() {
        let vars = variables();
        let env = ResourceEnv::new();
        let evaluator = Evaluator::new(&vars, &env);
        let scope = Scope::new("nat_gateway.main");

        let value = evaluator
            .evaluate(
                &expr(json!({
                    "if": {"all": [
                        {"equals": [{"var": "environment"}, "prod"]},
                        {"valid_cidr": {"var": "vpc_cidr"}}
                    ]},
                    "then": 3,
                    "else": 1
                })),
                scope,
            )
            .expect("evaluates");
        assert_eq!(value, Value::from(3_i64));

        let result = evaluator.evaluate_condition(
            &Condition::GreaterThan(Expression::var("environment"), Expression::literal(1_i64)),
            scope,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_reference_carries_origin() {
        let vars = variables();
        let env = ResourceEnv::new();
        let evaluator = Evaluator::new(&vars, &env);

        let err = evaluator
            .evaluate(&Expression::var("missing"), Scope::new("vpc.main"))
            .unwrap_err();
        assert_eq!(err.address(), Some("vpc.main"));
        assert!(matches!(err, InfraError::Config(ConfigError::UnknownReference { .. })));

        let err = evaluator
            .evaluate(&Expression::CountIndex, Scope::new("vpc.main"))
            .unwrap_err();
        assert!(matches!(err, InfraError::Config(ConfigError::InvalidExpression { .. })));
    }
}
