//! Provider plugin interface.
//!
//! The engine never talks to a remote API directly; every create, read,
//! update and delete goes through a [`Provider`].

use async_trait::async_trait;

use super::schema::ResourceSchema;
use crate::config::Attributes;
use crate::error::ProviderError;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Boundary to a remote resource API.
///
/// Implementations must be safe to call concurrently for unrelated
/// resources.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Provider name, used in error messages.
    fn name(&self) -> &str;

    /// Returns the schema of a resource type, or `None` if unsupported.
    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema>;

    /// Lists the supported resource types.
    fn resource_types(&self) -> Vec<String>;

    /// Creates a resource.
    ///
    /// Returns the provider-assigned identity and every attribute of the new
    /// object, computed ones included.
    async fn create(&self, resource_type: &str, attributes: &Attributes) -> ProviderResult<(String, Attributes)>;

    /// Reads the current attributes of a resource.
    ///
    /// Returns `ProviderError::NotFound` if it no longer exists.
    async fn read(&self, resource_type: &str, identity: &str) -> ProviderResult<Attributes>;

    /// Updates a resource in place and returns its new attributes.
    async fn update(
        &self,
        resource_type: &str,
        identity: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes>;

    /// Deletes a resource.
    async fn delete(&self, resource_type: &str, identity: &str) -> ProviderResult<()>;
}
