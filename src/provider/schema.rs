//! Resource schemas declared by providers.
//!
//! A schema lists every attribute of a resource type, which of them the
//! configuration may set, which are computed by the provider, which force a
//! replacement when they change, and which keep their value across a
//! replacement.

use std::collections::BTreeMap;

use crate::config::{Attributes, TypeConstraint, Value};
use crate::error::ConfigError;

/// Schema of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSchema {
    /// Accepted value type.
    pub value_type: TypeConstraint,
    /// Must be set by the configuration.
    pub required: bool,
    /// May be set by the configuration.
    pub optional: bool,
    /// Filled in by the provider.
    pub computed: bool,
    /// A change cannot be applied in place.
    pub force_new: bool,
    /// Keeps its value when the resource is replaced.
    pub stable: bool,
}

impl AttributeSchema {
    const fn new(value_type: TypeConstraint) -> Self {
        Self {
            value_type,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            stable: false,
        }
    }

    /// An attribute the configuration must set.
    #[must_use]
    pub const fn required(value_type: TypeConstraint) -> Self {
        let mut schema = Self::new(value_type);
        schema.required = true;
        schema
    }

    /// An attribute the configuration may set.
    #[must_use]
    pub const fn optional(value_type: TypeConstraint) -> Self {
        let mut schema = Self::new(value_type);
        schema.optional = true;
        schema
    }

    /// A read-only attribute reported by the provider.
    #[must_use]
    pub const fn read_only(value_type: TypeConstraint) -> Self {
        let mut schema = Self::new(value_type);
        schema.computed = true;
        schema
    }

    /// Marks the attribute as computed when not set.
    #[must_use]
    pub const fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Marks the attribute as identity-defining.
    #[must_use]
    pub const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Marks the attribute as stable across replacement.
    #[must_use]
    pub const fn stable(mut self) -> Self {
        self.stable = true;
        self
    }

    /// Returns true if the configuration may set this attribute.
    #[must_use]
    pub const fn is_settable(&self) -> bool {
        self.required || self.optional
    }

    /// Returns true if only the provider sets this attribute.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.computed && !self.is_settable()
    }
}

/// Schema of one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchema {
    /// Resource type name.
    pub resource_type: String,
    /// Attributes by name.
    pub attributes: BTreeMap<String, AttributeSchema>,
}

impl ResourceSchema {
    /// Creates a schema without attributes.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, schema: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), schema);
        self
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Returns true if changing `name` forces a replacement.
    #[must_use]
    pub fn is_force_new(&self, name: &str) -> bool {
        self.get(name).is_some_and(|a| a.force_new)
    }

    /// Returns true if `name` keeps its value across replacement.
    #[must_use]
    pub fn is_stable(&self, name: &str) -> bool {
        self.get(name).is_some_and(|a| a.stable)
    }

    /// Names of the attributes the provider computes.
    pub fn computed_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, a)| a.computed)
            .map(|(name, _)| name.as_str())
    }

    /// Checks configured attributes against the schema.
    ///
    /// Unknown values pass the type check; they are checked again once known.
    ///
    /// # Errors
    ///
    /// Returns the first unsupported attribute, missing required attribute
    /// or type mismatch.
    pub fn check(&self, address: &str, attributes: &Attributes) -> Result<(), ConfigError> {
        for (name, value) in attributes {
            let Some(schema) = self.get(name).filter(|a| a.is_settable()) else {
                return Err(ConfigError::UnsupportedAttribute {
                    address: address.to_string(),
                    attribute: name.clone(),
                });
            };
            if !schema.value_type.accepts(value) {
                return Err(ConfigError::TypeMismatch {
                    origin: address.to_string(),
                    field: name.clone(),
                    expected: schema.value_type.to_string(),
                    found: value.type_name().to_string(),
                });
            }
        }

        for (name, schema) in &self.attributes {
            let missing = matches!(attributes.get(name), None | Some(Value::Null));
            if schema.required && missing {
                return Err(ConfigError::MissingAttribute {
                    address: address.to_string(),
                    attribute: name.clone(),
                });
            }
        }

        Ok(())
    }
}
