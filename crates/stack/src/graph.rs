//! The desired-state graph.
//!
//! Nodes are logical resource names, edges are the references each
//! [`ResourceSpec`] carries. The graph is plain data: it can be built,
//! validated, serialized, and diffed without touching a cloud API.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StackError;
use crate::resources::{ResourceKind, ResourceSpec};

/// Validated map of logical names to resource specifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    resources: BTreeMap<String, ResourceSpec>,
}

impl DesiredState {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is already declared.
    pub fn insert(&mut self, name: impl Into<String>, spec: ResourceSpec) -> Result<(), StackError> {
        let name = name.into();
        if self.resources.contains_key(&name) {
            return Err(StackError::DuplicateResource(name));
        }
        self.resources.insert(name, spec);
        Ok(())
    }

    /// Look up a resource by logical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.get(name)
    }

    /// Iterate resources in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceSpec)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Names of all resources of a given kind.
    #[must_use]
    pub fn names_of_kind(&self, kind: ResourceKind) -> Vec<&str> {
        self.iter()
            .filter(|(_, spec)| spec.kind() == kind)
            .map(|(name, _)| name)
            .collect()
    }

    /// Resources that reference `name` directly.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.iter()
            .filter(|(_, spec)| spec.dependencies().iter().any(|d| d == name))
            .map(|(n, _)| n)
            .collect()
    }

    /// Topological creation order: every resource comes after the resources
    /// it references. Ties are broken by name so the order is stable.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference is unknown or the graph has a cycle.
    pub fn creation_order(&self) -> Result<Vec<&str>, StackError> {
        let deps: BTreeMap<&str, Vec<String>> = self
            .iter()
            .map(|(name, spec)| (name, spec.dependencies()))
            .collect();

        topological_order(&deps)
    }

    /// Reverse of [`creation_order`](Self::creation_order).
    ///
    /// # Errors
    ///
    /// Returns an error if the creation order cannot be computed.
    pub fn teardown_order(&self) -> Result<Vec<&str>, StackError> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }

    /// Check references and the single-node topology invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), StackError> {
        self.validate_references()?;
        self.creation_order()?;
        self.validate_topology()?;
        debug!(resources = self.len(), "Desired state validated");
        Ok(())
    }

    fn validate_references(&self) -> Result<(), StackError> {
        for (name, spec) in self.iter() {
            for (target, expected) in spec.references() {
                let found = self
                    .get(target)
                    .ok_or_else(|| StackError::UnknownReference {
                        from: name.to_string(),
                        to: target.to_string(),
                    })?
                    .kind();

                if found != expected {
                    return Err(StackError::WrongReferenceKind {
                        from: name.to_string(),
                        to: target.to_string(),
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_topology(&self) -> Result<(), StackError> {
        for kind in [ResourceKind::Vpc, ResourceKind::Subnet, ResourceKind::Instance] {
            let count = self.names_of_kind(kind).len();
            if count != 1 {
                return Err(StackError::Topology(format!(
                    "expected exactly one {kind}, found {count}"
                )));
            }
        }

        for (name, spec) in self.iter() {
            match spec {
                ResourceSpec::Subnet(subnet) => {
                    if let Some(ResourceSpec::Vpc(vpc)) = self.get(&subnet.vpc) {
                        if !subnet.cidr_block.is_strict_subset_of(&vpc.cidr_block) {
                            return Err(StackError::Topology(format!(
                                "subnet '{name}' range {} is not a strict subset of vpc '{}' range {}",
                                subnet.cidr_block, subnet.vpc, vpc.cidr_block
                            )));
                        }
                    }
                }
                ResourceSpec::RouteTable(table) => {
                    for route in &table.routes {
                        if let Some(ResourceSpec::InternetGateway(gw)) = self.get(&route.gateway) {
                            if gw.vpc != table.vpc {
                                return Err(StackError::Topology(format!(
                                    "route table '{name}' routes through gateway '{}' of a different vpc",
                                    route.gateway
                                )));
                            }
                        }
                    }
                }
                ResourceSpec::SecurityGroup(group) => {
                    if let Some(rule) = group
                        .ingress
                        .iter()
                        .chain(&group.egress)
                        .find(|r| r.from_port > r.to_port)
                    {
                        return Err(StackError::Topology(format!(
                            "security group '{name}' has reversed port range {}-{}",
                            rule.from_port, rule.to_port
                        )));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Kahn's algorithm over a name → dependencies map.
///
/// Dependencies not present as keys are reported as unknown references.
pub(crate) fn topological_order<'a>(
    deps: &BTreeMap<&'a str, Vec<String>>,
) -> Result<Vec<&'a str>, StackError> {
    let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&'a str>> = BTreeMap::new();

    for (&name, name_deps) in deps {
        remaining.insert(name, name_deps.len());
        for dep in name_deps {
            let (&dep_key, _) =
                deps.get_key_value(dep.as_str())
                    .ok_or_else(|| StackError::UnknownReference {
                        from: name.to_string(),
                        to: dep.clone(),
                    })?;
            dependents.entry(dep_key).or_default().push(name);
        }
    }

    let mut ready: VecDeque<&'a str> = deps
        .keys()
        .copied()
        .filter(|name| remaining.get(name) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(name) = ready.pop_front() {
        order.push(name);
        let mut unlocked = BTreeSet::new();
        for &dependent in dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    unlocked.insert(dependent);
                }
            }
        }
        ready.extend(unlocked);
    }

    if order.len() != deps.len() {
        let stuck: Vec<&str> = remaining
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(&name, _)| name)
            .collect();
        return Err(StackError::Cycle(stuck.join(", ")));
    }

    Ok(order)
}
