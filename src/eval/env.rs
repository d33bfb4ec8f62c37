//! Resolved resource environment.
//!
//! Holds the attributes of resources already resolved in the current run,
//! keyed by address, plus the instance list of every resource set for splat
//! expressions.

use std::collections::HashMap;

use crate::address::ResourceAddress;
use crate::config::{Attributes, ResourceRef, Value};

/// Attributes of one resolved resource instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedResource {
    /// Known (or explicitly unknown) attribute values.
    pub attributes: Attributes,
    /// Attributes missing from `attributes` are computed later and unknown.
    pub pending: bool,
}

impl ResolvedResource {
    /// A resource whose attributes are all known.
    #[must_use]
    pub const fn known(attributes: Attributes) -> Self {
        Self {
            attributes,
            pending: false,
        }
    }

    /// A resource that will be created during apply; only `attributes` are known.
    #[must_use]
    pub const fn pending(attributes: Attributes) -> Self {
        Self {
            attributes,
            pending: true,
        }
    }

    /// Looks up one attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Value {
        match self.attributes.get(name) {
            Some(value) => value.clone(),
            None if self.pending => Value::Unknown,
            None => Value::Null,
        }
    }
}

/// Environment of resolved resources for one run.
#[derive(Debug, Clone, Default)]
pub struct ResourceEnv {
    entries: HashMap<ResourceAddress, ResolvedResource>,
    instances: HashMap<(String, String), Vec<ResourceAddress>>,
}

impl ResourceEnv {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an instance as a member of its `type.name` set.
    pub fn register_instance(&mut self, address: &ResourceAddress) {
        let set = self
            .instances
            .entry((address.resource_type.clone(), address.name.clone()))
            .or_default();
        if !set.contains(address) {
            set.push(address.clone());
            set.sort();
        }
    }

    /// Declares a `type.name` set that may have no instances (count of zero).
    pub fn register_set(&mut self, resource_type: &str, name: &str) {
        self.instances
            .entry((resource_type.to_string(), name.to_string()))
            .or_default();
    }

    /// Records the resolved attributes of an instance.
    pub fn insert(&mut self, address: ResourceAddress, resolved: ResolvedResource) {
        self.entries.insert(address, resolved);
    }

    /// Returns the resolved attributes of an instance.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResolvedResource> {
        self.entries.get(address)
    }

    /// Returns the instances of a `type.name` set in index order, if declared.
    #[must_use]
    pub fn instances_of(&self, resource_type: &str, name: &str) -> Option<&[ResourceAddress]> {
        self.instances
            .get(&(resource_type.to_string(), name.to_string()))
            .map(Vec::as_slice)
    }

    /// Looks up the attribute a reference points at.
    ///
    /// Returns `None` if the instance has not been resolved.
    #[must_use]
    pub fn lookup(&self, reference: &ResourceRef) -> Option<Value> {
        self.entries
            .get(&reference.address())
            .map(|resolved| resolved.attribute(&reference.attribute))
    }
}
