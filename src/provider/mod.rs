//! Provider plugins.
//!
//! This module provides:
//! - The [`Provider`] trait every remote resource API implements
//! - Resource schemas with identity-defining and stable attributes
//! - A [`SimulatedProvider`] implementing the network resource types

mod network;
mod plugin;
mod schema;
mod simulated;

pub use network::network_schemas;
pub use plugin::{Provider, ProviderResult};
pub use schema::{AttributeSchema, ResourceSchema};
pub use simulated::{Fault, ProviderCall, RemoteObject, SimulatedProvider, Verb};
