//! Dynamic values and type constraints.
//!
//! Attribute values, variable values and provider payloads all use [`Value`].
//! `Unknown` stands for a value that only becomes known once an upstream
//! resource has been applied.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

/// Rendering of an unknown value in plans and saved plan files.
pub const UNKNOWN_PLACEHOLDER: &str = "(known after apply)";

/// Attribute map of a resource.
pub type Attributes = BTreeMap<String, Value>;

/// Bound variable values of a run.
pub type Variables = BTreeMap<String, Value>;

/// A configuration or provider value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer or floating point number.
    Number(Number),
    /// String.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// Placeholder for a value computed during apply.
    Unknown,
}

impl Value {
    /// Returns the name of the value's type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true if this value is unknown.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Returns true if this value or any nested value is unknown.
    #[must_use]
    pub fn contains_unknown(&self) -> bool {
        match self {
            Self::Unknown => true,
            Self::List(items) => items.iter().any(Self::contains_unknown),
            Self::Map(entries) => entries.values().any(Self::contains_unknown),
            _ => false,
        }
    }

    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number as `f64`, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Returns the number as a non-negative integer, if it is one.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map entries, if this is a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Compares two values, treating numbers by magnitude.
    ///
    /// Returns `None` if either side is unknown.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> Option<bool> {
        if self.contains_unknown() || other.contains_unknown() {
            return None;
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Some((a - b).abs() < f64::EPSILON),
            _ => Some(self == other),
        }
    }

    /// Interprets the value as a condition outcome.
    ///
    /// Returns `None` for unknown values.
    #[must_use]
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Null => Some(false),
            Self::Bool(b) => Some(*b),
            Self::Number(n) => Some(n.as_f64().is_some_and(|v| v != 0.0)),
            Self::String(s) => Some(!s.is_empty() && s != "false"),
            Self::List(items) => Some(!items.is_empty()),
            Self::Map(entries) => Some(!entries.is_empty()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Unknown => write!(f, "{UNKNOWN_PLACEHOLDER}"),
            Self::List(_) | Self::Map(_) => write!(f, "{}", JsonValue::from(self.clone())),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n),
            JsonValue::String(s) if s == UNKNOWN_PLACEHOLDER => Self::Unknown,
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            JsonValue::Object(entries) => {
                Self::Map(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Unknown => Self::String(UNKNOWN_PLACEHOLDER.to_string()),
            Value::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Map(entries) => {
                Self::Object(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

/// Declared type of a variable or resource attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeConstraint {
    /// Any value.
    #[default]
    Any,
    /// A string.
    String,
    /// A number.
    Number,
    /// A boolean.
    Bool,
    /// A list whose items match the inner type.
    List(Box<TypeConstraint>),
    /// A map whose values match the inner type.
    Map(Box<TypeConstraint>),
}

impl TypeConstraint {
    /// Shorthand for `list(T)`.
    #[must_use]
    pub fn list(inner: Self) -> Self {
        Self::List(Box::new(inner))
    }

    /// Shorthand for `map(T)`.
    #[must_use]
    pub fn map(inner: Self) -> Self {
        Self::Map(Box::new(inner))
    }

    /// Returns true if the value satisfies this constraint.
    ///
    /// Null and unknown values satisfy every constraint.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _)
            | (_, Value::Null | Value::Unknown)
            | (Self::String, Value::String(_))
            | (Self::Number, Value::Number(_))
            | (Self::Bool, Value::Bool(_)) => true,
            (Self::List(inner), Value::List(items)) => items.iter().all(|v| inner.accepts(v)),
            (Self::Map(inner), Value::Map(entries)) => entries.values().all(|v| inner.accepts(v)),
            _ => false,
        }
    }

    /// Converts a string value into the constrained type where possible.
    ///
    /// Used for values coming from the environment or the command line,
    /// which always arrive as strings. Other values are returned unchanged.
    #[must_use]
    pub fn coerce(&self, value: Value) -> Value {
        let Value::String(raw) = &value else {
            return value;
        };
        let trimmed = raw.trim();
        match self {
            Self::Number => serde_json::from_str::<Number>(trimmed).map_or(value, Value::Number),
            Self::Bool => match trimmed {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => value,
            },
            Self::List(_) | Self::Map(_) => {
                serde_json::from_str::<JsonValue>(trimmed).map_or(value, |parsed| {
                    match (self, Value::from(parsed)) {
                        (Self::List(inner), Value::List(items)) => {
                            Value::List(items.into_iter().map(|v| inner.coerce(v)).collect())
                        }
                        (Self::Map(inner), Value::Map(entries)) => Value::Map(
                            entries.into_iter().map(|(k, v)| (k, inner.coerce(v))).collect(),
                        ),
                        (_, other) => other,
                    }
                })
            }
            Self::Any | Self::String => value,
        }
    }
}

impl fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
            Self::List(inner) => write!(f, "list({inner})"),
            Self::Map(inner) => write!(f, "map({inner})"),
        }
    }
}
