//! Error types for the infragraph engine.
//!
//! This module provides the error hierarchy for every phase of a run:
//! configuration and expression evaluation, state management, planning,
//! provider calls, and apply.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the infragraph engine.
#[derive(Debug, Error)]
pub enum InfraError {
    /// Configuration, graph and evaluation errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Provider plugin errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration, graph construction and evaluation errors.
///
/// All of these are fatal to a run and surface before any provider call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The configuration is structurally invalid.
    #[error("Invalid configuration at '{field}': {message}")]
    Invalid {
        /// Path of the offending field.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// An expression references an undeclared resource, instance, attribute or variable.
    #[error("{origin}: reference to undeclared {reference}")]
    UnknownReference {
        /// Address (or `var.<name>` / `output.<name>`) holding the expression.
        origin: String,
        /// The unresolved reference.
        reference: String,
    },

    /// The resource reference graph contains a cycle.
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle {
        /// Addresses forming the cycle, in reference order.
        cycle: Vec<String>,
    },

    /// A variable validation rule rejected the bound value.
    #[error("Invalid value for variable '{variable}': {message}")]
    Validation {
        /// Name of the variable.
        variable: String,
        /// The configured error message of the failing rule.
        message: String,
    },

    /// A value does not match its declared type.
    #[error("{origin}: expected {expected} for '{field}', found {found}")]
    TypeMismatch {
        /// Address (or `var.<name>`) where the mismatch occurred.
        origin: String,
        /// Attribute or variable name.
        field: String,
        /// Declared type.
        expected: String,
        /// Actual value type.
        found: String,
    },

    /// An expression is malformed or used in an invalid position.
    #[error("{origin}: invalid expression: {message}")]
    InvalidExpression {
        /// Address (or `var.<name>` / `output.<name>`) holding the expression.
        origin: String,
        /// Description of the problem.
        message: String,
    },

    /// No value was supplied for a variable without default.
    #[error("No value supplied for variable '{name}' and it has no default")]
    MissingVariable {
        /// Name of the variable.
        name: String,
    },

    /// The provider does not know the resource type.
    #[error("{address}: resource type '{resource_type}' is not supported by provider '{provider}'")]
    UnsupportedResourceType {
        /// Address of the offending resource.
        address: String,
        /// The unknown type.
        resource_type: String,
        /// Provider name.
        provider: String,
    },

    /// The resource schema has no such attribute.
    #[error("{address}: unsupported attribute '{attribute}'")]
    UnsupportedAttribute {
        /// Address of the offending resource.
        address: String,
        /// The unknown attribute.
        attribute: String,
    },

    /// A required attribute was not set.
    #[error("{address}: missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Address of the offending resource.
        address: String,
        /// The missing attribute.
        attribute: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// State lock acquisition failed for a reason other than contention.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another run.
    #[error("State is locked by another run (lock holder: {holder}, since: {since})")]
    Locked {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Filesystem error in a state backend.
    #[error("State backend IO error: {message}")]
    Io {
        /// Description of the IO error.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The same address appears twice in the desired graph.
    #[error("Conflicting declarations for address {address}")]
    Conflict {
        /// The duplicated address.
        address: String,
    },

    /// A saved plan no longer matches the state it was computed against.
    #[error("Saved plan is stale: state digest {found} differs from planned {expected}")]
    Stale {
        /// Digest recorded in the plan.
        expected: String,
        /// Digest of the current state.
        found: String,
    },

    /// Operations could not be ordered.
    #[error("Failed to order plan operations: {message}")]
    DependencyResolution {
        /// Description of the ordering problem.
        message: String,
    },
}

/// Errors returned by a provider plugin.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The remote object does not exist.
    #[error("{resource_type} '{identity}' not found")]
    NotFound {
        /// Resource type.
        resource_type: String,
        /// Provider-assigned identity.
        identity: String,
    },

    /// The provider refused the request.
    #[error("{resource_type} request rejected: {message}")]
    Rejected {
        /// Resource type.
        resource_type: String,
        /// Provider message.
        message: String,
    },

    /// The provider could not be reached or failed transiently.
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The provider does not implement the resource type.
    #[error("unsupported resource type '{resource_type}'")]
    UnsupportedResourceType {
        /// Resource type.
        resource_type: String,
    },
}

/// Run-level apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Some operations failed or were skipped while others succeeded.
    #[error("{failed} of {total} operations did not complete: {}", .addresses.join(", "))]
    PartialFailure {
        /// Number of failed or skipped operations.
        failed: usize,
        /// Total number of operations.
        total: usize,
        /// Addresses that did not complete.
        addresses: Vec<String>,
    },

    /// The run was aborted.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },
}

/// Result type alias for infragraph operations.
pub type Result<T> = std::result::Result<T, InfraError>;

/// Formats a cycle path for display.
fn format_cycle(cycle: &[String]) -> String {
    let mut rendered = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        rendered.push_str(" -> ");
        rendered.push_str(first);
    }
    rendered
}

impl InfraError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the originating resource address (or variable/output origin), if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Config(
                ConfigError::UnknownReference { origin, .. }
                | ConfigError::TypeMismatch { origin, .. }
                | ConfigError::InvalidExpression { origin, .. },
            ) => Some(origin.as_str()),
            Self::Config(
                ConfigError::UnsupportedResourceType { address, .. }
                | ConfigError::UnsupportedAttribute { address, .. }
                | ConfigError::MissingAttribute { address, .. },
            )
            | Self::Plan(PlanError::Conflict { address }) => Some(address.as_str()),
            Self::Config(ConfigError::Cycle { cycle }) => cycle.first().map(String::as_str),
            _ => None,
        }
    }

    /// Returns true if this error means the state lock is held elsewhere.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::State(StateError::Locked { .. }))
    }
}

impl ConfigError {
    /// Creates an unknown reference error.
    #[must_use]
    pub fn unknown_reference(origin: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::UnknownReference {
            origin: origin.into(),
            reference: reference.into(),
        }
    }

    /// Creates an invalid expression error.
    #[must_use]
    pub fn invalid_expression(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates an IO error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    /// Returns true if the remote object does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = ConfigError::Cycle {
            cycle: vec![String::from("vpc.a"), String::from("subnet.b")],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: vpc.a -> subnet.b -> vpc.a"
        );
    }

    #[test]
    fn test_address_is_exposed() {
        let err = InfraError::from(ConfigError::unknown_reference("subnet.public[0]", "vpc.missing"));
        assert_eq!(err.address(), Some("subnet.public[0]"));

        let err = InfraError::from(PlanError::Conflict {
            address: String::from("vpc.main"),
        });
        assert_eq!(err.address(), Some("vpc.main"));
    }

    #[test]
    fn test_validation_message_surfaces_rule_text() {
        let err = ConfigError::Validation {
            variable: String::from("environment"),
            message: String::from("environment must be one of dev, staging, prod"),
        };
        assert!(err.to_string().contains("environment must be one of dev, staging, prod"));
    }
}
