//! Resource addresses.
//!
//! An address identifies one resource instance across configuration, plan,
//! apply and state. It renders as `type.name` or `type.name[index]` and
//! serializes as that string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique `(type, name, [index])` key of a resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddress {
    /// Resource type (e.g. `subnet`).
    pub resource_type: String,
    /// Resource name within its type.
    pub name: String,
    /// Instance index for resources declared with a count.
    pub index: Option<usize>,
}

impl ResourceAddress {
    /// Creates an address for a single (uncounted) resource.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            index: None,
        }
    }

    /// Creates an address for one instance of a counted resource.
    #[must_use]
    pub fn indexed(resource_type: impl Into<String>, name: impl Into<String>, index: usize) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            index: Some(index),
        }
    }

    /// Returns true if this address belongs to the `type.name` resource set.
    #[must_use]
    pub fn is_instance_of(&self, resource_type: &str, name: &str) -> bool {
        self.resource_type == resource_type && self.name == name
    }

    /// Returns the `type.name` part of the address without index.
    #[must_use]
    pub fn base(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    /// Returns a filesystem-safe stem (`type.name` or `type.name.index`).
    #[must_use]
    pub fn file_stem(&self) -> String {
        match self.index {
            Some(index) => format!("{}.{}.{index}", self.resource_type, self.name),
            None => self.base(),
        }
    }
}

/// Returns true if `segment` is a valid type or name segment.
#[must_use]
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        && segment.chars().next().is_some_and(|c| c.is_ascii_lowercase())
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

impl FromStr for ResourceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, index) = match s.split_once('[') {
            Some((base, rest)) => {
                let raw = rest
                    .strip_suffix(']')
                    .ok_or_else(|| format!("invalid address '{s}': unterminated index"))?;
                let index = raw
                    .parse::<usize>()
                    .map_err(|_| format!("invalid address '{s}': index must be a number"))?;
                (base, Some(index))
            }
            None => (s, None),
        };

        let (resource_type, name) = base
            .split_once('.')
            .ok_or_else(|| format!("invalid address '{s}': expected type.name"))?;

        if !is_valid_segment(resource_type) || !is_valid_segment(name) {
            return Err(format!("invalid address '{s}'"));
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            index,
        })
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceAddress> for String {
    fn from(address: ResourceAddress) -> Self {
        address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let addr = ResourceAddress::indexed("subnet", "public", 2);
        assert_eq!(addr.to_string(), "subnet.public[2]");
        assert_eq!("subnet.public[2]".parse::<ResourceAddress>(), Ok(addr));

        let addr = ResourceAddress::new("vpc", "main");
        assert_eq!(addr.to_string(), "vpc.main");
        assert_eq!(addr.file_stem(), "vpc.main");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("vpc".parse::<ResourceAddress>().is_err());
        assert!("vpc.main[".parse::<ResourceAddress>().is_err());
        assert!("vpc.main[x]".parse::<ResourceAddress>().is_err());
        assert!("Vpc.main".parse::<ResourceAddress>().is_err());
    }

    #[test]
    fn test_ordering_groups_instances() {
        let mut addrs = vec![
            ResourceAddress::indexed("subnet", "public", 1),
            ResourceAddress::new("vpc", "main"),
            ResourceAddress::indexed("subnet", "public", 0),
        ];
        addrs.sort();
        assert_eq!(addrs[0].to_string(), "subnet.public[0]");
        assert_eq!(addrs[1].to_string(), "subnet.public[1]");
    }

    #[test]
    fn test_serde_uses_string_form() {
        let addr = ResourceAddress::indexed("route", "private", 0);
        let json = serde_json::to_string(&addr).expect("serialize");
        assert_eq!(json, "\"route.private[0]\"");
        let back: ResourceAddress = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, addr);
    }
}
