//! Plan types and operation ordering.
//!
//! A plan holds one operation per address, in an order where every
//! operation comes after the operations it depends on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

use crate::address::ResourceAddress;
use crate::config::{Attributes, Value, Variables};
use crate::error::{InfraError, PlanError, Result, StateError};
use crate::graph::{ResourceNode, topological_order};
use crate::provider::Provider;
use crate::state::StateSnapshot;

/// Kind of a planned operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Destroy the resource, then create it again.
    Replace,
    /// Destroy a resource.
    Destroy,
    /// Nothing to do.
    NoOp,
}

impl OperationKind {
    /// Short marker used in plan listings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Destroy => "-",
            Self::NoOp => " ",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

/// One changed attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub attribute: String,
    /// Recorded value, if any.
    pub old: Option<Value>,
    /// Desired value; `None` when the attribute is removed.
    pub new: Option<Value>,
    /// The change cannot be applied in place.
    pub forces_replacement: bool,
}

/// A single planned operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Target address.
    pub address: ResourceAddress,
    /// Recorded attributes.
    pub before: Option<Attributes>,
    /// Expected attributes; may contain unknown values.
    pub after: Option<Attributes>,
    /// Operations that must complete first.
    pub dependencies: BTreeSet<ResourceAddress>,
    /// Attribute-level changes.
    pub changes: Vec<AttributeChange>,
    /// Desired node, used to resolve unknown values during apply.
    pub node: Option<ResourceNode>,
}

impl PlanOperation {
    /// Returns true if the operation changes anything.
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.kind != OperationKind::NoOp
    }

    /// Returns a human-readable description of the operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self.kind {
            OperationKind::Create => format!("Create {}", self.address),
            OperationKind::Update => format!("Update {} in place", self.address),
            OperationKind::Replace => format!("Replace {}", self.address),
            OperationKind::Destroy => format!("Destroy {}", self.address),
            OperationKind::NoOp => format!("No change for {}", self.address),
        }
    }
}

impl std::fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.symbol(), self.address)?;
        let forced: Vec<&str> = self
            .changes
            .iter()
            .filter(|c| c.forces_replacement)
            .map(|c| c.attribute.as_str())
            .collect();
        if self.kind == OperationKind::Replace && !forced.is_empty() {
            write!(f, " (forced by {})", forced.join(", "))?;
        }
        Ok(())
    }
}

/// Operation counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to destroy.
    pub destroy: usize,
    /// Unchanged resources.
    pub unchanged: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy",
            self.create, self.update, self.replace, self.destroy
        )
    }
}

/// A complete plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Run that produced the plan.
    pub run_id: Uuid,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Digest of the configuration the plan is based on.
    pub config_digest: String,
    /// Digest of the state the plan was computed against.
    pub state_digest: String,
    /// Bound variables.
    pub variables: Variables,
    /// True for a plan that destroys everything.
    #[serde(default)]
    pub destroy: bool,
    /// Operations in dependency order, unchanged resources included.
    pub operations: Vec<PlanOperation>,
}

impl Plan {
    /// Returns true if no operation changes anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.operations.iter().any(PlanOperation::is_change)
    }

    /// Returns the operations that change something.
    pub fn changes(&self) -> impl Iterator<Item = &PlanOperation> {
        self.operations.iter().filter(|op| op.is_change())
    }

    /// Returns the number of changing operations.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.changes().count()
    }

    /// Returns the operation for an address.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&PlanOperation> {
        self.operations.iter().find(|op| &op.address == address)
    }

    /// Returns the position of an address in the plan.
    #[must_use]
    pub fn position(&self, address: &ResourceAddress) -> Option<usize> {
        self.operations.iter().position(|op| &op.address == address)
    }

    /// Counts operations by kind.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in &self.operations {
            match op.kind {
                OperationKind::Create => summary.create += 1,
                OperationKind::Update => summary.update += 1,
                OperationKind::Replace => summary.replace += 1,
                OperationKind::Destroy => summary.destroy += 1,
                OperationKind::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Writes the plan to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_vec_pretty(self).map_err(|e| {
            InfraError::State(StateError::serialization(format!("Failed to serialize plan: {e}")))
        })?;
        tokio::fs::write(path.as_ref(), content).await?;
        Ok(())
    }

    /// Reads a plan written by [`Plan::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            InfraError::State(StateError::corrupted(format!(
                "Failed to parse plan {}: {e}",
                path.display()
            )))
        })
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes. Infrastructure matches the configuration.");
        }

        writeln!(f, "Plan ({} operations):", self.change_count())?;
        for (i, op) in self.changes().enumerate() {
            writeln!(f, "  {}. {op}", i + 1)?;
        }
        write!(f, "Plan: {}.", self.summary())
    }
}

/// Orders operations and fills in their dependencies.
///
/// Edges:
/// - a desired resource comes after the resources it references, unless
///   the referenced resource is replaced and only its stable attributes are
///   read;
/// - a destroyed resource comes after every resource recorded as
///   depending on it;
/// - a replaced resource comes after destroying the resources recorded as
///   depending on it.
///
/// Ties keep the input order.
///
/// # Errors
///
/// Returns `PlanError::DependencyResolution` if the edges form a cycle.
pub fn order_operations(
    operations: Vec<PlanOperation>,
    snapshot: &StateSnapshot,
    provider: &dyn Provider,
) -> Result<Vec<PlanOperation>> {
    let kinds: HashMap<ResourceAddress, OperationKind> = operations
        .iter()
        .map(|op| (op.address.clone(), op.kind))
        .collect();

    let mut predecessors: HashMap<ResourceAddress, BTreeSet<ResourceAddress>> = HashMap::new();

    for op in &operations {
        let Some(node) = &op.node else { continue };
        for dependency in &node.dependencies {
            let Some(kind) = kinds.get(dependency) else { continue };
            if *kind == OperationKind::Replace && reads_only_stable(node, dependency, provider) {
                continue;
            }
            predecessors
                .entry(op.address.clone())
                .or_default()
                .insert(dependency.clone());
        }
    }

    for record in snapshot.values() {
        let Some(dependent_kind) = kinds.get(&record.address) else { continue };
        for dependency in &record.dependencies {
            let follows = match kinds.get(dependency) {
                Some(OperationKind::Destroy) => true,
                Some(OperationKind::Replace) => *dependent_kind == OperationKind::Destroy,
                _ => false,
            };
            if follows && dependency != &record.address {
                predecessors
                    .entry(dependency.clone())
                    .or_default()
                    .insert(record.address.clone());
            }
        }
    }

    let addresses: Vec<ResourceAddress> = operations.iter().map(|op| op.address.clone()).collect();
    let order = topological_order(&addresses, &predecessors).map_err(|cycle| {
        PlanError::DependencyResolution {
            message: format!(
                "operations form a cycle: {}",
                cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
            ),
        }
    })?;

    let mut by_address: HashMap<ResourceAddress, PlanOperation> = operations
        .into_iter()
        .map(|op| (op.address.clone(), op))
        .collect();

    Ok(order
        .into_iter()
        .filter_map(|address| {
            let mut op = by_address.remove(&address)?;
            op.dependencies = predecessors
                .remove(&address)
                .unwrap_or_default()
                .into_iter()
                .filter(|d| kinds.get(d).is_some_and(|k| *k != OperationKind::NoOp))
                .collect();
            Some(op)
        })
        .collect())
}

fn reads_only_stable(node: &ResourceNode, dependency: &ResourceAddress, provider: &dyn Provider) -> bool {
    let Some(schema) = provider.schema(&dependency.resource_type) else {
        return false;
    };
    node.consumes
        .get(dependency)
        .is_some_and(|attrs| !attrs.is_empty() && attrs.iter().all(|a| schema.is_stable(a)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypeConstraint;
    use crate::provider::{AttributeSchema, ResourceSchema, SimulatedProvider};
    use crate::state::StateRecord;
    use std::collections::BTreeMap;

    fn provider() -> SimulatedProvider {
        SimulatedProvider::new().with_schema(
            ResourceSchema::new("thing")
                .attribute("x", AttributeSchema::required(TypeConstraint::String).force_new())
                .attribute("id", AttributeSchema::read_only(TypeConstraint::String))
                .attribute("zone", AttributeSchema::read_only(TypeConstraint::String).stable()),
        )
    }

    fn addr(name: &str) -> ResourceAddress {
        ResourceAddress::new("thing", name)
    }

    fn op(kind: OperationKind, name: &str, reads: &[(&str, &str)]) -> PlanOperation {
        let mut consumes: BTreeMap<ResourceAddress, BTreeSet<String>> = BTreeMap::new();
        for (target, attr) in reads {
            consumes.entry(addr(target)).or_default().insert((*attr).to_string());
        }
        let node = (kind != OperationKind::Destroy).then(|| ResourceNode {
            address: addr(name),
            attributes: BTreeMap::new(),
            count_index: None,
            dependencies: consumes.keys().cloned().collect(),
            consumes,
        });
        PlanOperation {
            kind,
            address: addr(name),
            before: None,
            after: None,
            dependencies: BTreeSet::new(),
            changes: Vec::new(),
            node,
        }
    }

    fn record(name: &str, deps: &[&str]) -> StateRecord {
        StateRecord::new(
            addr(name),
            format!("thing-{name}"),
            Attributes::new(),
            deps.iter().map(|d| addr(d)).collect(),
        )
    }

    fn names(ops: &[PlanOperation]) -> Vec<String> {
        ops.iter().map(|op| op.address.name.clone()).collect()
    }

    #[test]
    fn test_dependents_follow_replace() {
        let provider = provider();
        let ops = vec![
            op(OperationKind::Update, "b", &[("a", "x")]),
            op(OperationKind::Replace, "a", &[]),
        ];
        let ordered = order_operations(ops, &StateSnapshot::new(), &provider).expect("order");
        assert_eq!(names(&ordered), vec!["a", "b"]);
        assert!(ordered[1].dependencies.contains(&addr("a")));
    }

    #[test]
    fn test_stable_reads_do_not_wait_for_replace() {
        let provider = provider();
        let ops = vec![
            op(OperationKind::Update, "b", &[("a", "zone")]),
            op(OperationKind::Replace, "a", &[]),
        ];
        let ordered = order_operations(ops, &StateSnapshot::new(), &provider).expect("order");
        assert_eq!(names(&ordered), vec!["b", "a"]);
        assert!(ordered[0].dependencies.is_empty());
    }

    #[test]
    fn test_destroy_after_recorded_dependents() {
        let provider = provider();
        let mut snapshot = StateSnapshot::new();
        for rec in [record("a", &[]), record("b", &["a"])] {
            snapshot.insert(rec.address.clone(), rec);
        }
        let ops = vec![op(OperationKind::Destroy, "a", &[]), op(OperationKind::Destroy, "b", &[])];
        let ordered = order_operations(ops, &snapshot, &provider).expect("order");
        assert_eq!(names(&ordered), vec!["b", "a"]);
    }

    #[test]
    fn test_replace_after_destroy_of_old_dependent() {
        let provider = provider();
        let mut snapshot = StateSnapshot::new();
        for rec in [record("a", &[]), record("b", &["a"])] {
            snapshot.insert(rec.address.clone(), rec);
        }
        let ops = vec![op(OperationKind::Replace, "a", &[]), op(OperationKind::Destroy, "b", &[])];
        let ordered = order_operations(ops, &snapshot, &provider).expect("order");
        assert_eq!(names(&ordered), vec!["b", "a"]);
    }

    #[test]
    fn test_noop_dependencies_are_dropped() {
        let provider = provider();
        let ops = vec![
            op(OperationKind::NoOp, "a", &[]),
            op(OperationKind::Update, "b", &[("a", "x")]),
        ];
        let ordered = order_operations(ops, &StateSnapshot::new(), &provider).expect("order");
        assert!(ordered[1].dependencies.is_empty());
    }

    #[test]
    fn test_summary_and_display() {
        let plan = Plan {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            config_digest: String::new(),
            state_digest: String::new(),
            variables: Variables::new(),
            destroy: false,
            operations: vec![op(OperationKind::Create, "a", &[]), op(OperationKind::NoOp, "b", &[])],
        };
        assert!(!plan.is_empty());
        assert_eq!(plan.change_count(), 1);
        assert_eq!(plan.summary().unchanged, 1);
        assert!(plan.to_string().contains("1 to create"));
    }
}
