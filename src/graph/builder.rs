//! Resource graph construction.
//!
//! Expands counted resources into instances, discovers reference edges and
//! orders the instances so every resource comes after what it references.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use super::dag::topological_order;
use crate::address::ResourceAddress;
use crate::config::{Configuration, Expression, Reference, ResourceDecl, Value, Variables};
use crate::error::{ConfigError, InfraError, PlanError, Result};
use crate::eval::{Evaluator, ResourceEnv, Scope};

/// One resource instance of the desired graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Instance address.
    pub address: ResourceAddress,
    /// Declared attribute expressions.
    pub attributes: BTreeMap<String, Expression>,
    /// Index of this instance, for counted resources.
    pub count_index: Option<usize>,
    /// Instances this one must be applied after.
    pub dependencies: BTreeSet<ResourceAddress>,
    /// Attributes read from each dependency; empty for `depends_on` edges.
    pub consumes: BTreeMap<ResourceAddress, BTreeSet<String>>,
}

impl ResourceNode {
    /// Returns the evaluation scope of this instance.
    #[must_use]
    pub const fn scope<'s>(&self, origin: &'s str) -> Scope<'s> {
        Scope::new(origin).with_count_index(self.count_index)
    }
}

/// The desired resource graph, in topological order.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: IndexMap<ResourceAddress, ResourceNode>,
    sets: IndexMap<(String, String), Vec<ResourceAddress>>,
}

impl ResourceGraph {
    /// Returns the nodes in topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Returns the node at an address.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceNode> {
        self.nodes.get(address)
    }

    /// Returns true if the graph contains the address.
    #[must_use]
    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.nodes.contains_key(address)
    }

    /// Returns the number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the instance addresses in topological order.
    #[must_use]
    pub fn order(&self) -> Vec<ResourceAddress> {
        self.nodes.keys().cloned().collect()
    }

    /// Returns the instances that reference `address`.
    #[must_use]
    pub fn dependents(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.contains(address))
            .map(|n| &n.address)
            .collect()
    }

    /// Creates an environment that knows every resource set of the graph.
    #[must_use]
    pub fn environment(&self) -> ResourceEnv {
        let mut env = ResourceEnv::new();
        for ((resource_type, name), instances) in &self.sets {
            env.register_set(resource_type, name);
            for address in instances {
                env.register_instance(address);
            }
        }
        env
    }
}

/// Builds the resource graph from a configuration and bound variables.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    config: &'a Configuration,
    variables: &'a Variables,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder.
    #[must_use]
    pub const fn new(config: &'a Configuration, variables: &'a Variables) -> Self {
        Self { config, variables }
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Conflict` for duplicate declarations, and a
    /// configuration error for bad counts, unresolved references, misplaced
    /// `count_index` or dependency cycles.
    pub fn build(&self) -> Result<ResourceGraph> {
        let sets = self.expand_instances()?;

        let mut nodes: Vec<ResourceNode> = Vec::new();
        for decl in &self.config.resources {
            let key = (decl.resource_type.clone(), decl.name.clone());
            for address in sets.get(&key).into_iter().flatten() {
                nodes.push(self.discover_edges(decl, address, &sets)?);
            }
        }

        let addresses: Vec<ResourceAddress> = nodes.iter().map(|n| n.address.clone()).collect();
        let predecessors: HashMap<ResourceAddress, BTreeSet<ResourceAddress>> = nodes
            .iter()
            .map(|n| (n.address.clone(), n.dependencies.clone()))
            .collect();

        let order = topological_order(&addresses, &predecessors).map_err(|cycle| {
            ConfigError::Cycle {
                cycle: cycle.iter().map(ToString::to_string).collect(),
            }
        })?;

        let mut by_address: HashMap<ResourceAddress, ResourceNode> =
            nodes.into_iter().map(|n| (n.address.clone(), n)).collect();
        let nodes = order
            .into_iter()
            .filter_map(|address| by_address.remove(&address).map(|node| (address, node)))
            .collect::<IndexMap<_, _>>();

        debug!("Built resource graph with {} instances", nodes.len());
        Ok(ResourceGraph { nodes, sets })
    }

    /// Evaluates every count and lists the instances of each resource set.
    fn expand_instances(&self) -> Result<IndexMap<(String, String), Vec<ResourceAddress>>> {
        let mut sets = IndexMap::new();
        for decl in &self.config.resources {
            let key = (decl.resource_type.clone(), decl.name.clone());
            if sets.contains_key(&key) {
                return Err(InfraError::Plan(PlanError::Conflict { address: decl.key() }));
            }

            let instances = match &decl.count {
                None => vec![ResourceAddress::new(&decl.resource_type, &decl.name)],
                Some(count) => {
                    let n = self.evaluate_count(decl, count)?;
                    (0..n)
                        .map(|i| ResourceAddress::indexed(&decl.resource_type, &decl.name, i))
                        .collect()
                }
            };
            sets.insert(key, instances);
        }
        Ok(sets)
    }

    fn evaluate_count(&self, decl: &ResourceDecl, count: &Expression) -> Result<usize> {
        let origin = decl.key();
        for reference in count.references() {
            match reference {
                Reference::Resource(r) => {
                    return Err(ConfigError::unknown_reference(origin, r.to_string()).into());
                }
                Reference::Splat(s) => {
                    return Err(ConfigError::unknown_reference(origin, s.to_string()).into());
                }
                Reference::Variable(_) => {}
            }
        }

        let env = ResourceEnv::new();
        let value = Evaluator::new(self.variables, &env).evaluate(count, Scope::new(&origin))?;
        value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                ConfigError::TypeMismatch {
                    origin: origin.clone(),
                    field: String::from("count"),
                    expected: String::from("non-negative integer"),
                    found: match &value {
                        Value::Number(n) => n.to_string(),
                        other => other.type_name().to_string(),
                    },
                }
                .into()
            })
    }

    fn discover_edges(
        &self,
        decl: &ResourceDecl,
        address: &ResourceAddress,
        sets: &IndexMap<(String, String), Vec<ResourceAddress>>,
    ) -> Result<ResourceNode> {
        let origin = address.to_string();
        let mut consumes: BTreeMap<ResourceAddress, BTreeSet<String>> = BTreeMap::new();

        for expr in decl.attributes.values() {
            if address.index.is_none() && expr.uses_count_index() {
                return Err(ConfigError::invalid_expression(
                    &origin,
                    "count_index used outside a counted resource",
                )
                .into());
            }

            for reference in expr.references() {
                match reference {
                    Reference::Variable(name) => {
                        if !self.variables.contains_key(name) {
                            return Err(
                                ConfigError::unknown_reference(&origin, format!("var.{name}")).into()
                            );
                        }
                    }
                    Reference::Resource(r) => {
                        let target = r.address();
                        let declared = sets
                            .get(&(r.resource_type.clone(), r.name.clone()))
                            .is_some_and(|instances| instances.contains(&target));
                        if !declared {
                            return Err(ConfigError::unknown_reference(&origin, r.to_string()).into());
                        }
                        consumes.entry(target).or_default().insert(r.attribute.clone());
                    }
                    Reference::Splat(s) => {
                        let instances = sets
                            .get(&(s.resource_type.clone(), s.name.clone()))
                            .ok_or_else(|| ConfigError::unknown_reference(&origin, s.to_string()))?;
                        for target in instances {
                            consumes
                                .entry(target.clone())
                                .or_default()
                                .insert(s.attribute.clone());
                        }
                    }
                }
            }
        }

        for dependency in &decl.depends_on {
            let instances = dependency
                .split_once('.')
                .and_then(|(t, n)| sets.get(&(t.to_string(), n.to_string())))
                .ok_or_else(|| ConfigError::unknown_reference(&origin, dependency.clone()))?;
            for target in instances {
                consumes.entry(target.clone()).or_default();
            }
        }

        if consumes.contains_key(address) {
            return Err(ConfigError::Cycle {
                cycle: vec![origin],
            }
            .into());
        }

        Ok(ResourceNode {
            address: address.clone(),
            attributes: decl.attributes.clone(),
            count_index: address.index,
            dependencies: consumes.keys().cloned().collect(),
            consumes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn build(yaml: &str, vars: &[(&str, Value)]) -> Result<ResourceGraph> {
        let config = ConfigParser::new().parse_yaml(yaml, None)?;
        let variables: Variables = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        GraphBuilder::new(&config, &variables).build()
    }

    const NETWORK: &str = r#"
resources:
  - type: route_table
    name: public
    attributes:
      vpc_id: { ref: vpc.main.id }
  - type: subnet
    name: public
    count: { var: az_count }
    attributes:
      vpc_id: { ref: vpc.main.id }
      cidr_block: { call: cidrsubnet, args: ["10.0.0.0/16", 8, { count_index: true }] }
  - type: vpc
    name: main
    attributes:
      cidr_block: 10.0.0.0/16
  - type: route_table_association
    name: public
    count: { var: az_count }
    attributes:
      subnet_id: { ref: "subnet.public[0].id" }
      route_table_id: { ref: route_table.public.id }
  - type: nat_gateway
    name: main
    depends_on: [route_table.public]
    attributes:
      subnet_ids: { splat: "subnet.public[*].id" }
"#;

    #[test]
    fn test_topological_order_with_ties_in_declaration_order() {
        let graph = build(NETWORK, &[("az_count", Value::from(2_i64))]).expect("graph");
        let order: Vec<String> = graph.order().iter().map(ToString::to_string).collect();
        assert_eq!(
            order,
            vec![
                "vpc.main",
                "route_table.public",
                "subnet.public[0]",
                "subnet.public[1]",
                "route_table_association.public[0]",
                "route_table_association.public[1]",
                "nat_gateway.main",
            ]
        );

        for node in graph.nodes() {
            let position = order.iter().position(|a| *a == node.address.to_string());
            for dep in &node.dependencies {
                let dep_position = order.iter().position(|a| *a == dep.to_string());
                assert!(dep_position < position, "{dep} must precede {}", node.address);
            }
        }
    }

    #[test]
    fn test_splat_and_depends_on_edges() {
        let graph = build(NETWORK, &[("az_count", Value::from(2_i64))]).expect("graph");
        let nat = graph
            .get(&ResourceAddress::new("nat_gateway", "main"))
            .expect("nat");
        assert_eq!(nat.dependencies.len(), 3);
        assert!(nat.consumes[&ResourceAddress::new("route_table", "public")].is_empty());
        assert!(nat.consumes[&ResourceAddress::indexed("subnet", "public", 1)].contains("id"));

        let dependents = graph.dependents(&ResourceAddress::new("vpc", "main"));
        assert_eq!(dependents.len(), 3);
    }

    #[test]
    fn test_count_zero_yields_no_instances() {
        let graph = build(NETWORK, &[("az_count", Value::from(0_i64))]).expect("graph");
        assert_eq!(graph.len(), 3);
        let nat = graph
            .get(&ResourceAddress::new("nat_gateway", "main"))
            .expect("nat");
        assert_eq!(nat.dependencies.len(), 1);

        let env = graph.environment();
        assert_eq!(env.instances_of("subnet", "public").map(<[_]>::len), Some(0));
    }

    #[test]
    fn test_cycle_detected() {
        let yaml = r"
resources:
  - type: subnet
    name: a
    attributes:
      x: { ref: subnet.b.id }
  - type: subnet
    name: b
    attributes:
      x: { ref: subnet.c.id }
  - type: subnet
    name: c
    attributes:
      x: { ref: subnet.a.id }
";
        let err = build(yaml, &[]).unwrap_err();
        match err {
            InfraError::Config(ConfigError::Cycle { cycle }) => {
                assert_eq!(cycle.len(), 3);
                assert!(cycle.contains(&String::from("subnet.a")));
            }
            other => panic!("unexpected error: {other}"),
        }

        let yaml = r"
resources:
  - type: vpc
    name: a
    attributes:
      x: { ref: vpc.a.id }
";
        assert!(matches!(
            build(yaml, &[]),
            Err(InfraError::Config(ConfigError::Cycle { .. }))
        ));
    }

    #[test]
    fn test_duplicate_declaration_conflicts() {
        let yaml = r"
resources:
  - type: vpc
    name: main
  - type: vpc
    name: main
";
        let err = build(yaml, &[]).unwrap_err();
        assert!(matches!(err, InfraError::Plan(PlanError::Conflict { ref address }) if address == "vpc.main"));
    }

    #[test]
    fn test_unknown_references() {
        let yaml = r"
resources:
  - type: subnet
    name: a
    attributes:
      vpc_id: { ref: vpc.missing.id }
";
        let err = build(yaml, &[]).unwrap_err();
        assert_eq!(err.address(), Some("subnet.a"));

        let yaml = r"
resources:
  - type: subnet
    name: a
    attributes:
      cidr_block: { var: undeclared }
";
        assert!(matches!(
            build(yaml, &[]),
            Err(InfraError::Config(ConfigError::UnknownReference { .. }))
        ));

        let yaml = r"
resources:
  - type: subnet
    name: a
    count: 2
  - type: route
    name: r
    attributes:
      subnet_id: { ref: subnet.a.id }
";
        assert!(matches!(
            build(yaml, &[]),
            Err(InfraError::Config(ConfigError::UnknownReference { .. }))
        ));
    }

    #[test]
    fn test_count_rules() {
        let yaml = r"
resources:
  - type: vpc
    name: main
  - type: subnet
    name: a
    count: { call: length, args: [{ splat: 'vpc.main[*].id' }] }
";
        assert!(matches!(
            build(yaml, &[]),
            Err(InfraError::Config(ConfigError::UnknownReference { .. }))
        ));

        let yaml = r"
resources:
  - type: subnet
    name: a
    count: { var: n }
";
        assert!(matches!(
            build(yaml, &[("n", Value::from(-1_i64))]),
            Err(InfraError::Config(ConfigError::TypeMismatch { .. }))
        ));
        assert!(matches!(
            build(yaml, &[("n", Value::from("two"))]),
            Err(InfraError::Config(ConfigError::TypeMismatch { .. }))
        ));
        assert_eq!(build(yaml, &[("n", Value::from(3_i64))]).map(|g| g.len()).ok(), Some(3));
    }

    #[test]
    fn test_count_index_outside_count() {
        let yaml = r"
resources:
  - type: subnet
    name: a
    attributes:
      netnum: { count_index: true }
";
        assert!(matches!(
            build(yaml, &[]),
            Err(InfraError::Config(ConfigError::InvalidExpression { .. }))
        ));
    }
}
