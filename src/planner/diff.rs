//! Diff engine for comparing the desired graph against recorded state.
//!
//! This module classifies every address as create, update, replace, destroy
//! or no-op, and refreshes recorded state through the provider to detect
//! drift.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::address::ResourceAddress;
use crate::config::{Attributes, Value, Variables};
use crate::error::{ConfigError, Result};
use crate::eval::{Evaluator, ResolvedResource, ResourceEnv};
use crate::graph::{ResourceGraph, ResourceNode};
use crate::provider::{Provider, ResourceSchema};
use crate::state::{StateRecord, StateSnapshot};

use super::plan::{AttributeChange, OperationKind, PlanOperation, order_operations};

/// Engine for computing diffs between desired and recorded states.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine<'a> {
    provider: &'a dyn Provider,
    variables: &'a Variables,
}

/// How a recorded resource diverged from the remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// The remote object no longer exists.
    Missing,
    /// Remote attributes differ from the record.
    Changed,
}

/// Drift detected for one address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftEntry {
    /// Drifted address.
    pub address: ResourceAddress,
    /// Kind of drift.
    pub kind: DriftKind,
    /// Attribute differences, recorded value first.
    pub changes: Vec<AttributeChange>,
}

/// Recorded state after refreshing through the provider.
#[derive(Debug, Clone, Default)]
pub struct Refreshed {
    /// Records with current remote attributes; missing objects dropped.
    pub snapshot: StateSnapshot,
    /// Detected drift.
    pub drift: Vec<DriftEntry>,
}

impl<'a> DiffEngine<'a> {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new(provider: &'a dyn Provider, variables: &'a Variables) -> Self {
        Self { provider, variables }
    }

    /// Re-reads every recorded resource.
    ///
    /// The returned snapshot is an in-memory view; the store is not touched.
    ///
    /// # Errors
    ///
    /// Returns the first provider error other than not-found.
    pub async fn refresh(&self, snapshot: &StateSnapshot) -> Result<Refreshed> {
        let mut refreshed = Refreshed::default();

        for (address, record) in snapshot {
            match self.provider.read(&address.resource_type, &record.identity).await {
                Ok(current) => {
                    let schema = self.provider.schema(&address.resource_type);
                    let changes = attribute_diff(&record.attributes, &current, schema);
                    if changes.is_empty() {
                        refreshed.snapshot.insert(address.clone(), record.clone());
                    } else {
                        debug!("{address}: {} attributes drifted", changes.len());
                        refreshed.drift.push(DriftEntry {
                            address: address.clone(),
                            kind: DriftKind::Changed,
                            changes,
                        });
                        refreshed.snapshot.insert(
                            address.clone(),
                            record.updated(current, record.dependencies.clone()),
                        );
                    }
                }
                Err(e) if e.is_not_found() => {
                    warn!("{address}: {} no longer exists", record.identity);
                    refreshed.drift.push(DriftEntry {
                        address: address.clone(),
                        kind: DriftKind::Missing,
                        changes: Vec::new(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(refreshed)
    }

    /// Computes the ordered operations turning `snapshot` into `graph`.
    ///
    /// # Errors
    ///
    /// Returns evaluation and schema errors, or an ordering error.
    pub fn diff(&self, graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<Vec<PlanOperation>> {
        let mut env = graph.environment();
        let mut operations = Vec::with_capacity(graph.len() + snapshot.len());

        for node in graph.nodes() {
            let op = self.diff_node(node, snapshot.get(&node.address), &mut env)?;
            debug!("{}: {}", node.address, op.kind);
            operations.push(op);
        }

        for (address, record) in snapshot {
            if !graph.contains(address) {
                debug!("{address}: no longer configured");
                operations.push(PlanOperation {
                    kind: OperationKind::Destroy,
                    address: address.clone(),
                    before: Some(record.attributes.clone()),
                    after: None,
                    dependencies: BTreeSet::new(),
                    changes: Vec::new(),
                    node: None,
                });
            }
        }

        order_operations(operations, snapshot, self.provider)
    }

    fn diff_node(
        &self,
        node: &ResourceNode,
        record: Option<&StateRecord>,
        env: &mut ResourceEnv,
    ) -> Result<PlanOperation> {
        let schema = schema_of(self.provider, &node.address)?;
        let desired = resolve_desired(self.provider, self.variables, node, env)?;

        let (kind, after, changes, resolved) = match record {
            None => {
                let after = planned_attributes(schema, &desired, &Attributes::new());
                let resolved = ResolvedResource::pending(after.clone());
                (OperationKind::Create, after, Vec::new(), resolved)
            }
            Some(record) => {
                let changes = configured_changes(schema, &desired, &record.attributes);
                if changes.is_empty() {
                    let resolved = ResolvedResource::known(record.attributes.clone());
                    (OperationKind::NoOp, record.attributes.clone(), changes, resolved)
                } else if changes.iter().any(|c| c.forces_replacement) {
                    let carried: Attributes = record
                        .attributes
                        .iter()
                        .filter(|(name, _)| schema.is_stable(name))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let after = planned_attributes(schema, &desired, &carried);
                    let resolved = ResolvedResource::pending(after.clone());
                    (OperationKind::Replace, after, changes, resolved)
                } else {
                    let mut after = record.attributes.clone();
                    for change in &changes {
                        if change.new.is_none() {
                            after.remove(&change.attribute);
                        }
                    }
                    after.extend(desired);
                    let resolved = ResolvedResource::known(after.clone());
                    (OperationKind::Update, after, changes, resolved)
                }
            }
        };

        env.insert(node.address.clone(), resolved);

        Ok(PlanOperation {
            kind,
            address: node.address.clone(),
            before: record.map(|r| r.attributes.clone()),
            after: Some(after),
            dependencies: BTreeSet::new(),
            changes,
            node: Some(node.clone()),
        })
    }
}

/// Looks up the schema of an address's resource type.
///
/// # Errors
///
/// Returns `ConfigError::UnsupportedResourceType` if the provider lacks it.
pub fn schema_of<'p>(provider: &'p dyn Provider, address: &ResourceAddress) -> Result<&'p ResourceSchema> {
    provider.schema(&address.resource_type).ok_or_else(|| {
        ConfigError::UnsupportedResourceType {
            address: address.to_string(),
            resource_type: address.resource_type.clone(),
            provider: provider.name().to_string(),
        }
        .into()
    })
}

/// Evaluates and checks the configured attributes of a node.
///
/// Null values are dropped: an attribute set to null is not configured.
///
/// # Errors
///
/// Returns evaluation errors and schema violations.
pub fn resolve_desired(
    provider: &dyn Provider,
    variables: &Variables,
    node: &ResourceNode,
    env: &ResourceEnv,
) -> Result<Attributes> {
    let origin = node.address.to_string();
    let schema = schema_of(provider, &node.address)?;
    let mut desired =
        Evaluator::new(variables, env).evaluate_attributes(&node.attributes, node.scope(&origin))?;
    schema.check(&origin, &desired)?;
    desired.retain(|_, value| !matches!(value, Value::Null));
    Ok(desired)
}

/// Desired attributes plus every computed attribute, unknown unless carried.
fn planned_attributes(schema: &ResourceSchema, desired: &Attributes, carried: &Attributes) -> Attributes {
    let mut after = desired.clone();
    for name in schema.computed_attributes() {
        if !after.contains_key(name) {
            let value = carried.get(name).cloned().unwrap_or(Value::Unknown);
            after.insert(name.to_string(), value);
        }
    }
    after
}

/// Changes between configured values and a record.
///
/// Unknown desired values always count as changed. Settable attributes
/// present in the record but no longer configured count as removed.
fn configured_changes(
    schema: &ResourceSchema,
    desired: &Attributes,
    recorded: &Attributes,
) -> Vec<AttributeChange> {
    let mut changes = Vec::new();

    for (name, new) in desired {
        let old = recorded.get(name);
        if !old.is_some_and(|old| old.loosely_equals(new) == Some(true)) {
            changes.push(AttributeChange {
                attribute: name.clone(),
                old: old.cloned(),
                new: Some(new.clone()),
                forces_replacement: schema.is_force_new(name),
            });
        }
    }

    for (name, old) in recorded {
        if desired.contains_key(name) || matches!(old, Value::Null) {
            continue;
        }
        if schema
            .get(name)
            .is_some_and(|a| a.is_settable() && !a.computed)
        {
            changes.push(AttributeChange {
                attribute: name.clone(),
                old: Some(old.clone()),
                new: None,
                forces_replacement: schema.is_force_new(name),
            });
        }
    }

    changes
}

/// Every attribute that differs between two attribute sets.
fn attribute_diff(
    old: &Attributes,
    new: &Attributes,
    schema: Option<&ResourceSchema>,
) -> Vec<AttributeChange> {
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    names
        .into_iter()
        .filter(|name| old.get(*name) != new.get(*name))
        .map(|name| AttributeChange {
            attribute: name.clone(),
            old: old.get(name).cloned(),
            new: new.get(name).cloned(),
            forces_replacement: schema.is_some_and(|s| s.is_force_new(name)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, TypeConstraint};
    use crate::graph::GraphBuilder;
    use crate::provider::{AttributeSchema, SimulatedProvider};

    fn provider() -> SimulatedProvider {
        SimulatedProvider::new().with_schema(
            ResourceSchema::new("thing")
                .attribute("x", AttributeSchema::required(TypeConstraint::String).force_new())
                .attribute("label", AttributeSchema::optional(TypeConstraint::String))
                .attribute("id", AttributeSchema::read_only(TypeConstraint::String))
                .attribute("zone", AttributeSchema::read_only(TypeConstraint::String).stable()),
        )
    }

    const CONFIG: &str = r"
resources:
  - type: thing
    name: a
    attributes:
      x: { var: x }
  - type: thing
    name: b
    attributes:
      x: b
      label: { ref: thing.a.x }
";

    fn plan_ops(provider: &SimulatedProvider, x: &str, snapshot: &StateSnapshot) -> Vec<PlanOperation> {
        let config = ConfigParser::new().parse_yaml(CONFIG, None).expect("config");
        let mut variables = Variables::new();
        variables.insert("x".into(), Value::from(x));
        let graph = GraphBuilder::new(&config, &variables).build().expect("graph");
        DiffEngine::new(provider, &variables)
            .diff(&graph, snapshot)
            .expect("diff")
    }

    fn record(name: &str, attrs: &[(&str, &str)], deps: &[&str]) -> StateRecord {
        StateRecord::new(
            ResourceAddress::new("thing", name),
            format!("thing-{name}"),
            attrs.iter().map(|(k, v)| ((*k).to_string(), Value::from(*v))).collect(),
            deps.iter().map(|d| ResourceAddress::new("thing", *d)).collect(),
        )
    }

    fn applied(x: &str) -> StateSnapshot {
        [
            record("a", &[("x", x), ("id", "thing-a"), ("zone", "z1")], &[]),
            record("b", &[("x", "b"), ("label", x), ("id", "thing-b"), ("zone", "z1")], &["a"]),
        ]
        .into_iter()
        .map(|r| (r.address.clone(), r))
        .collect()
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let provider = provider();
        let ops = plan_ops(&provider, "one", &StateSnapshot::new());
        assert!(ops.iter().all(|op| op.kind == OperationKind::Create));

        let a = &ops[0];
        let after = a.after.as_ref().expect("after");
        assert_eq!(after.get("id"), Some(&Value::Unknown));
        assert_eq!(after.get("x"), Some(&Value::from("one")));
    }

    #[test]
    fn test_unchanged_is_noop() {
        let provider = provider();
        let ops = plan_ops(&provider, "one", &applied("one"));
        assert!(ops.iter().all(|op| op.kind == OperationKind::NoOp));
    }

    #[test]
    fn test_identity_change_replaces_and_updates_dependent() {
        let provider = provider();
        let ops = plan_ops(&provider, "two", &applied("one"));

        let kinds: Vec<(String, OperationKind)> =
            ops.iter().map(|op| (op.address.name.clone(), op.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (String::from("a"), OperationKind::Replace),
                (String::from("b"), OperationKind::Update),
            ]
        );

        let b = &ops[1];
        assert!(b.dependencies.contains(&ResourceAddress::new("thing", "a")));
        assert_eq!(b.changes[0].new, Some(Value::from("two")));

        let a_after = ops[0].after.as_ref().expect("after");
        assert_eq!(a_after.get("zone"), Some(&Value::from("z1")));
        assert_eq!(a_after.get("id"), Some(&Value::Unknown));
    }

    #[test]
    fn test_removed_resource_is_destroyed_after_dependents() {
        let provider = provider();
        let mut snapshot = applied("one");
        snapshot.insert(
            ResourceAddress::new("thing", "old"),
            record("old", &[("x", "old")], &[]),
        );
        snapshot.insert(
            ResourceAddress::new("thing", "older"),
            record("older", &[("x", "older")], &["old"]),
        );

        let ops = plan_ops(&provider, "one", &snapshot);
        let destroys: Vec<&str> = ops
            .iter()
            .filter(|op| op.kind == OperationKind::Destroy)
            .map(|op| op.address.name.as_str())
            .collect();
        assert_eq!(destroys, vec!["older", "old"]);
    }

    #[test]
    fn test_unconfigured_optional_attribute_is_removed() {
        let provider = provider();
        let mut snapshot = applied("one");
        snapshot.insert(
            ResourceAddress::new("thing", "a"),
            record("a", &[("x", "one"), ("label", "stale"), ("id", "thing-a")], &[]),
        );

        let ops = plan_ops(&provider, "one", &snapshot);
        let a = ops.iter().find(|op| op.address.name == "a").expect("a");
        assert_eq!(a.kind, OperationKind::Update);
        assert_eq!(a.changes[0].attribute, "label");
        assert_eq!(a.changes[0].new, None);
        assert!(!a.after.as_ref().expect("after").contains_key("label"));
    }

    #[test]
    fn test_unsupported_type_is_fatal() {
        let provider = SimulatedProvider::new();
        let config = ConfigParser::new().parse_yaml(CONFIG, None).expect("config");
        let mut variables = Variables::new();
        variables.insert("x".into(), Value::from("one"));
        let graph = GraphBuilder::new(&config, &variables).build().expect("graph");
        let err = DiffEngine::new(&provider, &variables)
            .diff(&graph, &StateSnapshot::new())
            .unwrap_err();
        assert_eq!(err.address(), Some("thing.a"));
    }

    #[tokio::test]
    async fn test_refresh_detects_drift() {
        let provider = provider();
        let (id, attrs) = provider
            .create("thing", &[("x".to_string(), Value::from("one"))].into_iter().collect())
            .await
            .expect("create");

        let mut snapshot = StateSnapshot::new();
        let rec = StateRecord::new(ResourceAddress::new("thing", "a"), &id, attrs, BTreeSet::new());
        snapshot.insert(rec.address.clone(), rec);
        let gone = record("gone", &[("x", "z")], &[]);
        snapshot.insert(gone.address.clone(), gone);

        provider.set_remote_attribute(&id, "label", Value::from("manual")).await;

        let variables = Variables::new();
        let refreshed = DiffEngine::new(&provider, &variables)
            .refresh(&snapshot)
            .await
            .expect("refresh");

        assert_eq!(refreshed.snapshot.len(), 1);
        assert_eq!(refreshed.drift.len(), 2);
        let changed = refreshed
            .drift
            .iter()
            .find(|d| d.kind == DriftKind::Changed)
            .expect("changed");
        assert_eq!(changed.changes[0].attribute, "label");
        assert!(refreshed.drift.iter().any(|d| d.kind == DriftKind::Missing));
    }
}
