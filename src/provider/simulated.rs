//! In-process simulated provider.
//!
//! Keeps remote objects in memory, optionally mirrored to a JSON snapshot
//! file so separate CLI invocations see the same objects. Supports call
//! latency, fault injection and out-of-band edits for drift testing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use super::network::{identity_prefix, is_cidr_attribute, network_schemas, referenced_type};
use super::plugin::{Provider, ProviderResult};
use super::schema::ResourceSchema;
use crate::config::{Attributes, TypeConstraint, Value};
use crate::error::{InfraError, ProviderError, Result};
use crate::eval::parse_cidr;

/// Default simulated region.
const DEFAULT_REGION: &str = "sim-east-1";

/// Default simulated account.
const DEFAULT_OWNER_ID: &str = "000000000000";

/// A provider verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// `create`
    Create,
    /// `read`
    Read,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Read => write!(f, "read"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// An object held by the simulated remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Resource type.
    pub resource_type: String,
    /// Current attributes.
    pub attributes: Attributes,
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    /// Verb called.
    pub verb: Verb,
    /// Resource type.
    pub resource_type: String,
    /// Identity, for calls on an existing object.
    pub identity: Option<String>,
}

/// An injected failure.
#[derive(Debug, Clone)]
pub struct Fault {
    verb: Verb,
    resource_type: String,
    when: Option<(String, Value)>,
    remaining: Option<usize>,
    message: String,
}

impl Fault {
    /// Fails every `verb` call on `resource_type`.
    #[must_use]
    pub fn new(verb: Verb, resource_type: impl Into<String>) -> Self {
        Self {
            verb,
            resource_type: resource_type.into(),
            when: None,
            remaining: None,
            message: String::from("injected failure"),
        }
    }

    /// Only fails calls whose attributes contain `name = value`.
    #[must_use]
    pub fn when(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.when = Some((name.into(), value.into()));
        self
    }

    /// Fails only the next `count` matching calls.
    #[must_use]
    pub const fn times(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    fn matches(&self, verb: Verb, resource_type: &str, attributes: Option<&Attributes>) -> bool {
        if self.verb != verb || self.resource_type != resource_type {
            return false;
        }
        match (&self.when, attributes) {
            (None, _) => true,
            (Some((name, value)), Some(attributes)) => attributes.get(name) == Some(value),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Default)]
struct Remote {
    objects: BTreeMap<String, RemoteObject>,
    faults: Vec<Fault>,
    calls: Vec<ProviderCall>,
    next_address: u32,
}

impl Remote {
    fn record(&mut self, verb: Verb, resource_type: &str, identity: Option<&str>) {
        self.calls.push(ProviderCall {
            verb,
            resource_type: resource_type.to_string(),
            identity: identity.map(String::from),
        });
    }

    fn trip_fault(
        &mut self,
        verb: Verb,
        resource_type: &str,
        attributes: Option<&Attributes>,
    ) -> ProviderResult<()> {
        let Some(position) = self
            .faults
            .iter()
            .position(|f| f.matches(verb, resource_type, attributes))
        else {
            return Ok(());
        };

        let fault = &mut self.faults[position];
        let message = fault.message.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.faults.remove(position);
            }
        }

        debug!("Injected {verb} failure for {resource_type}");
        Err(ProviderError::rejected(resource_type, message))
    }

    fn check_references(&self, resource_type: &str, attributes: &Attributes) -> ProviderResult<()> {
        for (name, value) in attributes {
            let (Some(target), Value::String(identity)) = (referenced_type(resource_type, name), value)
            else {
                continue;
            };
            let exists = self
                .objects
                .get(identity)
                .is_some_and(|o| o.resource_type == target);
            if !exists {
                return Err(ProviderError::rejected(
                    resource_type,
                    format!("{name} '{identity}' does not reference an existing {target}"),
                ));
            }
        }
        Ok(())
    }

    fn object(&self, resource_type: &str, identity: &str) -> ProviderResult<&RemoteObject> {
        self.objects
            .get(identity)
            .filter(|o| o.resource_type == resource_type)
            .ok_or_else(|| ProviderError::NotFound {
                resource_type: resource_type.to_string(),
                identity: identity.to_string(),
            })
    }

    fn next_host(&mut self) -> u32 {
        self.next_address += 1;
        self.next_address % 254 + 1
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Simulated provider.
///
/// Clones share the same remote objects.
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    schemas: Arc<BTreeMap<String, ResourceSchema>>,
    remote: Arc<Mutex<Remote>>,
    snapshot: Option<PathBuf>,
    latency: Duration,
    region: String,
    owner_id: String,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    /// Creates a provider without resource types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: Arc::new(BTreeMap::new()),
            remote: Arc::new(Mutex::new(Remote::default())),
            snapshot: None,
            latency: Duration::ZERO,
            region: String::from(DEFAULT_REGION),
            owner_id: String::from(DEFAULT_OWNER_ID),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a provider supporting the network resource types.
    #[must_use]
    pub fn network() -> Self {
        network_schemas()
            .into_iter()
            .fold(Self::new(), Self::with_schema)
    }

    /// Adds a resource type.
    #[must_use]
    pub fn with_schema(mut self, schema: ResourceSchema) -> Self {
        Arc::make_mut(&mut self.schemas).insert(schema.resource_type.clone(), schema);
        self
    }

    /// Delays every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the simulated region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Mirrors remote objects to a snapshot file, loading it if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub async fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let objects: BTreeMap<String, RemoteObject> =
                    serde_json::from_str(&content).map_err(|e| {
                        InfraError::Provider(ProviderError::Unavailable {
                            message: format!("Failed to parse {}: {e}", path.display()),
                        })
                    })?;
                debug!("Loaded {} simulated objects from {}", objects.len(), path.display());
                self.remote.lock().await.objects = objects;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(InfraError::Provider(ProviderError::Unavailable {
                    message: format!("Failed to read {}: {e}", path.display()),
                }));
            }
        }
        self.snapshot = Some(path);
        Ok(self)
    }

    /// Registers a fault.
    pub async fn inject_fault(&self, fault: Fault) {
        self.remote.lock().await.faults.push(fault);
    }

    /// Returns every call made so far.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.remote.lock().await.calls.clone()
    }

    /// Returns the current remote objects by identity.
    pub async fn objects(&self) -> BTreeMap<String, RemoteObject> {
        self.remote.lock().await.objects.clone()
    }

    /// Changes an attribute behind the engine's back.
    ///
    /// Returns false if the object does not exist.
    pub async fn set_remote_attribute(&self, identity: &str, name: &str, value: Value) -> bool {
        let mut remote = self.remote.lock().await;
        remote
            .objects
            .get_mut(identity)
            .map(|o| o.attributes.insert(name.to_string(), value))
            .is_some()
    }

    /// Deletes an object behind the engine's back.
    ///
    /// Returns false if the object does not exist.
    pub async fn remove_remote(&self, identity: &str) -> bool {
        self.remote.lock().await.objects.remove(identity).is_some()
    }

    /// Highest number of concurrent calls observed.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let guard = InFlight(&self.in_flight);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }

    fn schema_for(&self, resource_type: &str) -> ProviderResult<&ResourceSchema> {
        self.schemas
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            })
    }

    fn check_values(schema: &ResourceSchema, attributes: &Attributes) -> ProviderResult<()> {
        let resource_type = schema.resource_type.as_str();
        for (name, value) in attributes {
            if !schema.get(name).is_some_and(|a| a.is_settable()) {
                return Err(ProviderError::rejected(
                    resource_type,
                    format!("attribute '{name}' cannot be set"),
                ));
            }
            if value.contains_unknown() {
                return Err(ProviderError::rejected(
                    resource_type,
                    format!("attribute '{name}' is not known"),
                ));
            }
            if is_cidr_attribute(name) && value.as_str().and_then(parse_cidr).is_none() {
                return Err(ProviderError::rejected(
                    resource_type,
                    format!("'{value}' is not a valid CIDR block"),
                ));
            }
        }
        Ok(())
    }

    /// Builds the full attribute set of an object.
    ///
    /// Computed attributes keep their previous value when there is one.
    fn materialize(
        &self,
        schema: &ResourceSchema,
        identity: &str,
        configured: &Attributes,
        previous: Option<&Attributes>,
        remote: &mut Remote,
    ) -> Attributes {
        let mut attributes: Attributes = configured
            .iter()
            .filter(|(_, v)| !matches!(v, Value::Null))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (name, attribute) in &schema.attributes {
            if !attribute.computed || attributes.contains_key(name) {
                continue;
            }
            let value = match previous.and_then(|p| p.get(name)) {
                Some(value) => value.clone(),
                None => self.computed_value(schema, name, &attribute.value_type, identity, remote),
            };
            attributes.insert(name.clone(), value);
        }
        attributes
    }

    fn computed_value(
        &self,
        schema: &ResourceSchema,
        name: &str,
        value_type: &TypeConstraint,
        identity: &str,
        remote: &mut Remote,
    ) -> Value {
        match name {
            "id" | "allocation_id" => Value::from(identity),
            "arn" => Value::String(format!(
                "arn:sim:{}:{}:{}/{identity}",
                self.region, self.owner_id, schema.resource_type
            )),
            "owner_id" => Value::from(self.owner_id.as_str()),
            "availability_zone" => Value::String(format!("{}a", self.region)),
            "default_route_table_id" => Value::String(format!("rtb-{}", short_id())),
            "public_ip" => Value::String(format!("203.0.113.{}", remote.next_host())),
            "private_ip" => Value::String(format!("10.0.255.{}", remote.next_host())),
            _ => match value_type {
                TypeConstraint::String => Value::String(format!("{identity}-{name}")),
                TypeConstraint::Number => Value::from(0_i64),
                TypeConstraint::Bool => Value::Bool(false),
                TypeConstraint::List(_) => Value::List(Vec::new()),
                TypeConstraint::Map(_) => Value::Map(BTreeMap::new()),
                TypeConstraint::Any => Value::Null,
            },
        }
    }

    /// Writes `objects` to the snapshot file, if any.
    ///
    /// Callers persist the next object set before installing it, so a failed
    /// write leaves the provider unchanged.
    async fn persist(&self, objects: &BTreeMap<String, RemoteObject>) -> ProviderResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let unavailable = |e: &dyn fmt::Display| ProviderError::Unavailable {
            message: format!("Failed to write {}: {e}", path.display()),
        };

        let content = serde_json::to_vec_pretty(objects).map_err(|e| unavailable(&e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(&e))?;
        }
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| unavailable(&e))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| unavailable(&e))?;
        trace!("Wrote simulated snapshot to {}", path.display());
        Ok(())
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    fn resource_types(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    async fn create(&self, resource_type: &str, attributes: &Attributes) -> ProviderResult<(String, Attributes)> {
        let _in_flight = self.enter().await;
        let schema = self.schema_for(resource_type)?;
        let mut remote = self.remote.lock().await;
        remote.record(Verb::Create, resource_type, None);
        remote.trip_fault(Verb::Create, resource_type, Some(attributes))?;
        Self::check_values(schema, attributes)?;
        remote.check_references(resource_type, attributes)?;

        let identity = format!("{}-{}", identity_prefix(resource_type), short_id());
        let state = self.materialize(schema, &identity, attributes, None, &mut remote);
        let mut objects = remote.objects.clone();
        objects.insert(
            identity.clone(),
            RemoteObject {
                resource_type: resource_type.to_string(),
                attributes: state.clone(),
            },
        );
        self.persist(&objects).await?;
        remote.objects = objects;

        debug!("Created {resource_type} {identity}");
        Ok((identity, state))
    }

    async fn read(&self, resource_type: &str, identity: &str) -> ProviderResult<Attributes> {
        let _in_flight = self.enter().await;
        self.schema_for(resource_type)?;
        let mut remote = self.remote.lock().await;
        remote.record(Verb::Read, resource_type, Some(identity));
        remote.trip_fault(Verb::Read, resource_type, None)?;
        Ok(remote.object(resource_type, identity)?.attributes.clone())
    }

    async fn update(
        &self,
        resource_type: &str,
        identity: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes> {
        let _in_flight = self.enter().await;
        let schema = self.schema_for(resource_type)?;
        let mut remote = self.remote.lock().await;
        remote.record(Verb::Update, resource_type, Some(identity));
        let previous = remote.object(resource_type, identity)?.attributes.clone();
        remote.trip_fault(Verb::Update, resource_type, Some(attributes))?;
        Self::check_values(schema, attributes)?;
        remote.check_references(resource_type, attributes)?;

        for (name, value) in attributes {
            if schema.is_force_new(name) && previous.get(name) != Some(value) {
                return Err(ProviderError::rejected(
                    resource_type,
                    format!("attribute '{name}' cannot be updated in place"),
                ));
            }
        }

        let state = self.materialize(schema, identity, attributes, Some(&previous), &mut remote);
        let mut objects = remote.objects.clone();
        if let Some(object) = objects.get_mut(identity) {
            object.attributes = state.clone();
        }
        self.persist(&objects).await?;
        remote.objects = objects;

        debug!("Updated {resource_type} {identity}");
        Ok(state)
    }

    async fn delete(&self, resource_type: &str, identity: &str) -> ProviderResult<()> {
        let _in_flight = self.enter().await;
        self.schema_for(resource_type)?;
        let mut remote = self.remote.lock().await;
        remote.record(Verb::Delete, resource_type, Some(identity));
        remote.object(resource_type, identity)?;
        remote.trip_fault(Verb::Delete, resource_type, None)?;
        let mut objects = remote.objects.clone();
        objects.remove(identity);
        self.persist(&objects).await?;
        remote.objects = objects;

        debug!("Deleted {resource_type} {identity}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_create_fills_computed_attributes() {
        let provider = SimulatedProvider::network();
        let (id, state) = provider
            .create("vpc", &attrs(&[("cidr_block", "10.0.0.0/16".into())]))
            .await
            .expect("create");

        assert!(id.starts_with("vpc-"));
        assert_eq!(state.get("id"), Some(&Value::from(id.as_str())));
        assert_eq!(state.get("owner_id"), Some(&Value::from(DEFAULT_OWNER_ID)));
        assert!(state.contains_key("arn"));
        assert_eq!(provider.read("vpc", &id).await.expect("read"), state);
    }

    #[tokio::test]
    async fn test_references_must_exist() {
        let provider = SimulatedProvider::network();
        let err = provider
            .create(
                "subnet",
                &attrs(&[("vpc_id", "vpc-missing".into()), ("cidr_block", "10.0.1.0/24".into())]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_invalid_cidr_rejected() {
        let provider = SimulatedProvider::network();
        let result = provider
            .create("vpc", &attrs(&[("cidr_block", "10.0.0.0/33".into())]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_keeps_computed_and_rejects_force_new() {
        let provider = SimulatedProvider::network();
        let (id, created) = provider
            .create("vpc", &attrs(&[("cidr_block", "10.0.0.0/16".into())]))
            .await
            .expect("create");

        let updated = provider
            .update(
                "vpc",
                &id,
                &attrs(&[("cidr_block", "10.0.0.0/16".into()), ("enable_dns_support", true.into())]),
            )
            .await
            .expect("update");
        assert_eq!(updated.get("arn"), created.get("arn"));
        assert_eq!(updated.get("enable_dns_support"), Some(&Value::Bool(true)));

        let err = provider
            .update("vpc", &id, &attrs(&[("cidr_block", "10.1.0.0/16".into())]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let provider = SimulatedProvider::network();
        let err = provider.delete("vpc", "vpc-gone").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let provider = SimulatedProvider::network();
        provider
            .inject_fault(Fault::new(Verb::Create, "eip").when("domain", "vpc").times(1))
            .await;

        let config = attrs(&[("domain", "vpc".into())]);
        assert!(provider.create("eip", &config).await.is_err());
        assert!(provider.create("eip", &config).await.is_ok());
        assert_eq!(provider.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("provider.json");

        let provider = SimulatedProvider::network()
            .with_snapshot(&path)
            .await
            .expect("snapshot");
        let (id, _) = provider
            .create("vpc", &attrs(&[("cidr_block", "10.0.0.0/16".into())]))
            .await
            .expect("create");

        let reopened = SimulatedProvider::network()
            .with_snapshot(&path)
            .await
            .expect("snapshot");
        assert!(reopened.objects().await.contains_key(&id));
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_leaves_no_object() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("provider.json");
        let provider = SimulatedProvider::network()
            .with_snapshot(&path)
            .await
            .expect("snapshot");
        std::fs::create_dir(&path).expect("block snapshot path");

        let err = provider
            .create("vpc", &attrs(&[("cidr_block", "10.0.0.0/16".into())]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
        assert!(provider.objects().await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_band_changes() {
        let provider = SimulatedProvider::network();
        let (id, _) = provider
            .create("vpc", &attrs(&[("cidr_block", "10.0.0.0/16".into())]))
            .await
            .expect("create");

        assert!(provider.set_remote_attribute(&id, "enable_dns_support", Value::Bool(false)).await);
        assert!(provider.remove_remote(&id).await);
        assert!(provider.read("vpc", &id).await.unwrap_err().is_not_found());
    }
}
