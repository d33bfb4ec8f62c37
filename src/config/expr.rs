//! Attribute expressions and conditions.
//!
//! Expressions are written as structured YAML/JSON:
//!
//! ```yaml
//! cidr_block: { call: cidrsubnet, args: [{ var: vpc_cidr }, 8, { count_index: true }] }
//! vpc_id: { ref: vpc.main.id }
//! subnet_ids: { splat: "subnet.private[*].id" }
//! nat_count: { if: { equals: [{ var: environment }, prod] }, then: 2, else: 1 }
//! ```
//!
//! Plain scalars, and arrays or objects without any tagged member, are
//! literals. `{ literal: ... }` escapes objects that would otherwise be read
//! as an expression.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

use super::value::Value;
use crate::address::{ResourceAddress, is_valid_segment};

/// A reference to one attribute of a resource instance (`type.name[i].attr`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Target resource type.
    pub resource_type: String,
    /// Target resource name.
    pub name: String,
    /// Target instance index, for counted resources.
    pub index: Option<usize>,
    /// Referenced attribute.
    pub attribute: String,
}

impl ResourceRef {
    /// Returns the address of the referenced instance.
    #[must_use]
    pub fn address(&self) -> ResourceAddress {
        ResourceAddress {
            resource_type: self.resource_type.clone(),
            name: self.name.clone(),
            index: self.index,
        }
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let (address, attribute) = raw
            .rsplit_once('.')
            .ok_or_else(|| format!("invalid reference '{raw}': expected type.name.attribute"))?;
        let address: ResourceAddress = address
            .parse()
            .map_err(|e| format!("invalid reference '{raw}': {e}"))?;
        if !is_valid_segment(attribute) {
            return Err(format!("invalid reference '{raw}': bad attribute name"));
        }
        Ok(Self {
            resource_type: address.resource_type,
            name: address.name,
            index: address.index,
            attribute: attribute.to_string(),
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address(), self.attribute)
    }
}

/// A reference to one attribute across every instance of a resource (`type.name[*].attr`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SplatRef {
    /// Target resource type.
    pub resource_type: String,
    /// Target resource name.
    pub name: String,
    /// Referenced attribute.
    pub attribute: String,
}

impl SplatRef {
    fn parse(raw: &str) -> Result<Self, String> {
        let (base, attribute) = raw
            .split_once("[*].")
            .ok_or_else(|| format!("invalid splat '{raw}': expected type.name[*].attribute"))?;
        let (resource_type, name) = base
            .split_once('.')
            .ok_or_else(|| format!("invalid splat '{raw}': expected type.name[*].attribute"))?;
        if ![resource_type, name, attribute].iter().all(|s| is_valid_segment(s)) {
            return Err(format!("invalid splat '{raw}'"));
        }
        Ok(Self {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            attribute: attribute.to_string(),
        })
    }
}

impl fmt::Display for SplatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[*].{}", self.resource_type, self.name, self.attribute)
    }
}

/// Built-in functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    /// Number of items in a list or map, or characters in a string.
    Length,
    /// Concatenates lists.
    Concat,
    /// Joins a list with a separator: `join(sep, list)`.
    Join,
    /// Item at an index, wrapping around: `element(list, index)`.
    Element,
    /// Map lookup with optional default: `lookup(map, key, [default])`.
    Lookup,
    /// Merges maps, later keys win.
    Merge,
    /// Carves a subnet out of a CIDR block: `cidrsubnet(prefix, newbits, netnum)`.
    Cidrsubnet,
    /// Replaces `{}` placeholders in order: `format(template, args...)`.
    Format,
}

impl Function {
    /// Returns the function name as written in configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Length => "length",
            Self::Concat => "concat",
            Self::Join => "join",
            Self::Element => "element",
            Self::Lookup => "lookup",
            Self::Merge => "merge",
            Self::Cidrsubnet => "cidrsubnet",
            Self::Format => "format",
        }
    }
}

/// Predicate used by conditional expressions and variable validation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Both sides are equal.
    Equals(Expression, Expression),
    /// Both sides differ.
    NotEquals(Expression, Expression),
    /// Left number is greater than right number.
    GreaterThan(Expression, Expression),
    /// Left number is less than right number.
    LessThan(Expression, Expression),
    /// Value is one of the listed options.
    OneOf {
        /// Value under test.
        value: Expression,
        /// Allowed values.
        options: Vec<Value>,
    },
    /// Negation.
    Not(Box<Condition>),
    /// Every condition holds.
    All(Vec<Condition>),
    /// At least one condition holds.
    Any(Vec<Condition>),
    /// Value is truthy (non-empty, non-zero, true).
    Truthy(Expression),
    /// Value is a well-formed IPv4 CIDR block.
    ValidCidr(Expression),
}

impl Condition {
    /// Calls `visit` on every expression nested in this condition.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expression)) {
        match self {
            Self::Equals(a, b)
            | Self::NotEquals(a, b)
            | Self::GreaterThan(a, b)
            | Self::LessThan(a, b) => {
                a.walk(visit);
                b.walk(visit);
            }
            Self::OneOf { value, .. } => value.walk(visit),
            Self::Not(inner) => inner.walk(visit),
            Self::All(conditions) | Self::Any(conditions) => {
                for condition in conditions {
                    condition.walk(visit);
                }
            }
            Self::Truthy(expr) | Self::ValidCidr(expr) => expr.walk(visit),
        }
    }
}

/// An attribute, count or output expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub enum Expression {
    /// Constant value.
    Literal(Value),
    /// Bound variable.
    Var(String),
    /// Attribute of one resource instance.
    Ref(ResourceRef),
    /// Attribute of every instance of a resource, in index order.
    Splat(SplatRef),
    /// Index of the instance being evaluated.
    CountIndex,
    /// Conditional expression.
    Conditional {
        /// Predicate.
        condition: Box<Condition>,
        /// Value when the predicate holds.
        then: Box<Expression>,
        /// Value otherwise.
        otherwise: Box<Expression>,
    },
    /// Built-in function call.
    Call {
        /// Function to call.
        function: Function,
        /// Argument expressions.
        args: Vec<Expression>,
    },
    /// List containing at least one non-literal item.
    List(Vec<Expression>),
    /// Map containing at least one non-literal value.
    Map(BTreeMap<String, Expression>),
}

/// A reference an expression makes outside of itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference<'a> {
    /// `{ var: name }`.
    Variable(&'a str),
    /// `{ ref: type.name[i].attr }`.
    Resource(&'a ResourceRef),
    /// `{ splat: type.name[*].attr }`.
    Splat(&'a SplatRef),
}

impl Expression {
    /// Creates a literal expression.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a variable expression.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Parses a `type.name[i].attr` reference expression.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the reference is malformed.
    pub fn reference(raw: &str) -> Result<Self, String> {
        ResourceRef::parse(raw).map(Self::Ref)
    }

    /// Calls `visit` on this expression and every nested expression.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        match self {
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
            Self::Call { args, .. } | Self::List(args) => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.walk(visit);
                }
            }
            Self::Literal(_) | Self::Var(_) | Self::Ref(_) | Self::Splat(_) | Self::CountIndex => {}
        }
    }

    /// Returns every variable and resource reference in this expression.
    #[must_use]
    pub fn references(&self) -> Vec<Reference<'_>> {
        let mut refs = Vec::new();
        self.walk(&mut |expr| match expr {
            Self::Var(name) => refs.push(Reference::Variable(name)),
            Self::Ref(r) => refs.push(Reference::Resource(r)),
            Self::Splat(s) => refs.push(Reference::Splat(s)),
            _ => {}
        });
        refs
    }

    /// Returns true if this expression uses `count_index`.
    #[must_use]
    pub fn uses_count_index(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| found |= matches!(expr, Self::CountIndex));
        found
    }

    fn from_items(items: Vec<JsonValue>) -> Result<Self, String> {
        let exprs = items
            .into_iter()
            .map(Self::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if exprs.iter().all(|e| matches!(e, Self::Literal(_))) {
            let values = exprs
                .into_iter()
                .filter_map(|e| match e {
                    Self::Literal(v) => Some(v),
                    _ => None,
                })
                .collect();
            return Ok(Self::Literal(Value::List(values)));
        }
        Ok(Self::List(exprs))
    }

    fn from_object(mut object: JsonMap<String, JsonValue>) -> Result<Self, String> {
        if object.len() == 1 {
            if let Some(raw) = object.remove("var") {
                return match raw {
                    JsonValue::String(name) => Ok(Self::Var(name)),
                    other => Err(format!("'var' expects a variable name, found {other}")),
                };
            }
            if let Some(raw) = object.remove("ref") {
                return match raw {
                    JsonValue::String(s) => ResourceRef::parse(&s).map(Self::Ref),
                    other => Err(format!("'ref' expects a string, found {other}")),
                };
            }
            if let Some(raw) = object.remove("splat") {
                return match raw {
                    JsonValue::String(s) => SplatRef::parse(&s).map(Self::Splat),
                    other => Err(format!("'splat' expects a string, found {other}")),
                };
            }
            if let Some(raw) = object.remove("count_index") {
                return match raw {
                    JsonValue::Bool(true) => Ok(Self::CountIndex),
                    other => Err(format!("'count_index' expects true, found {other}")),
                };
            }
            if let Some(raw) = object.remove("literal") {
                return Ok(Self::Literal(Value::from(raw)));
            }
        }

        if object.contains_key("call") {
            let function = object
                .remove("call")
                .map(serde_json::from_value::<Function>)
                .transpose()
                .map_err(|e| format!("unknown function: {e}"))?
                .ok_or("missing function name")?;
            let args = match object.remove("args") {
                Some(JsonValue::Array(items)) => items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
                Some(other) => vec![Self::try_from(other)?],
                None => Vec::new(),
            };
            if let Some(extra) = object.keys().next() {
                return Err(format!("unexpected key '{extra}' in function call"));
            }
            return Ok(Self::Call { function, args });
        }

        if object.contains_key("if") {
            let condition = object.remove("if").ok_or("missing 'if'")?;
            let then = object.remove("then").ok_or("conditional is missing 'then'")?;
            let otherwise = object.remove("else").ok_or("conditional is missing 'else'")?;
            if let Some(extra) = object.keys().next() {
                return Err(format!("unexpected key '{extra}' in conditional"));
            }
            let condition: Condition = serde_json::from_value(condition)
                .map_err(|e| format!("invalid condition: {e}"))?;
            return Ok(Self::Conditional {
                condition: Box::new(condition),
                then: Box::new(Self::try_from(then)?),
                otherwise: Box::new(Self::try_from(otherwise)?),
            });
        }

        let entries = object
            .into_iter()
            .map(|(k, v)| Self::try_from(v).map(|e| (k, e)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        if entries.values().all(|e| matches!(e, Self::Literal(_))) {
            let values = entries
                .into_iter()
                .filter_map(|(k, e)| match e {
                    Self::Literal(v) => Some((k, v)),
                    _ => None,
                })
                .collect();
            return Ok(Self::Literal(Value::Map(values)));
        }
        Ok(Self::Map(entries))
    }
}

impl TryFrom<JsonValue> for Expression {
    type Error = String;

    fn try_from(raw: JsonValue) -> Result<Self, Self::Error> {
        match raw {
            JsonValue::Object(object) => Self::from_object(object),
            JsonValue::Array(items) => Self::from_items(items),
            scalar => Ok(Self::Literal(Value::from(scalar))),
        }
    }
}

impl From<Expression> for JsonValue {
    fn from(expr: Expression) -> Self {
        let tagged = |key: &str, value: Self| {
            let mut object = JsonMap::new();
            object.insert(key.to_string(), value);
            Self::Object(object)
        };
        match expr {
            Expression::Literal(value @ (Value::List(_) | Value::Map(_))) => {
                tagged("literal", Self::from(value))
            }
            Expression::Literal(value) => Self::from(value),
            Expression::Var(name) => tagged("var", Self::String(name)),
            Expression::Ref(r) => tagged("ref", Self::String(r.to_string())),
            Expression::Splat(s) => tagged("splat", Self::String(s.to_string())),
            Expression::CountIndex => tagged("count_index", Self::Bool(true)),
            Expression::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let mut object = JsonMap::new();
                object.insert(
                    "if".to_string(),
                    serde_json::to_value(*condition).unwrap_or(Self::Null),
                );
                object.insert("then".to_string(), Self::from(*then));
                object.insert("else".to_string(), Self::from(*otherwise));
                Self::Object(object)
            }
            Expression::Call { function, args } => {
                let mut object = JsonMap::new();
                object.insert("call".to_string(), Self::String(function.name().to_string()));
                object.insert(
                    "args".to_string(),
                    Self::Array(args.into_iter().map(Self::from).collect()),
                );
                Self::Object(object)
            }
            Expression::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Expression::Map(entries) => {
                Self::Object(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: JsonValue) -> Expression {
        Expression::try_from(raw).expect("valid expression")
    }

    #[test]
    fn test_scalars_and_plain_collections_are_literals() {
        assert_eq!(parse(json!("10.0.0.0/16")), Expression::literal("10.0.0.0/16"));
        assert!(matches!(
            parse(json!({"Name": "main", "tier": "public"})),
            Expression::Literal(Value::Map(_))
        ));
        assert!(matches!(parse(json!([1, 2, 3])), Expression::Literal(Value::List(_))));
    }

    #[test]
    fn test_parse_references() {
        let expr = parse(json!({"ref": "subnet.public[1].id"}));
        let Expression::Ref(r) = expr else {
            panic!("expected reference");
        };
        assert_eq!(r.address(), ResourceAddress::indexed("subnet", "public", 1));
        assert_eq!(r.attribute, "id");

        let expr = parse(json!({"splat": "subnet.private[*].id"}));
        assert!(matches!(expr, Expression::Splat(ref s) if s.name == "private"));

        assert!(Expression::try_from(json!({"ref": "vpc"})).is_err());
    }

    #[test]
    fn test_parse_call_and_conditional() {
        let expr = parse(json!({
            "call": "cidrsubnet",
            "args": [{"var": "vpc_cidr"}, 8, {"count_index": true}]
        }));
        assert!(matches!(expr, Expression::Call { function: Function::Cidrsubnet, ref args } if args.len() == 3));
        assert!(expr.uses_count_index());

        let expr = parse(json!({
            "if": {"equals": [{"var": "environment"}, "prod"]},
            "then": 3,
            "else": 1
        }));
        let vars: Vec<_> = expr
            .references()
            .into_iter()
            .filter(|r| matches!(r, Reference::Variable("environment")))
            .collect();
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_mixed_collections_become_expressions() {
        let expr = parse(json!({"Name": {"var": "name"}, "tier": "public"}));
        assert!(matches!(expr, Expression::Map(_)));

        let expr = parse(json!([{"ref": "vpc.main.id"}, "literal"]));
        assert!(matches!(expr, Expression::List(ref items) if items.len() == 2));
    }

    #[test]
    fn test_literal_escape_round_trips() {
        let expr = parse(json!({"literal": {"var": "not-a-variable"}}));
        assert!(matches!(expr, Expression::Literal(Value::Map(_))));
        let back = parse(JsonValue::from(expr.clone()));
        assert_eq!(back, expr);
    }

    #[test]
    fn test_rejects_unknown_function() {
        assert!(Expression::try_from(json!({"call": "upper", "args": ["x"]})).is_err());
    }
}
