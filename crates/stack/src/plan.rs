//! Diffing desired state against recorded state.
//!
//! Resources are never updated in place: any attribute change replaces the
//! resource, and a replaced (or newly created) resource forces everything
//! that references it to be replaced too, since dependents hold the old
//! provider id.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StackError;
use crate::graph::DesiredState;
use crate::resources::{ResourceKind, ResourceSpec};
use crate::state::StackState;

/// Why a resource is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ReplaceReason {
    /// The resource's own specification changed.
    AttributesChanged,
    /// A resource it references is being created or replaced.
    DependencyReplaced(String),
}

impl fmt::Display for ReplaceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributesChanged => write!(f, "attributes changed"),
            Self::DependencyReplaced(dep) => write!(f, "dependency '{dep}' replaced"),
        }
    }
}

/// What happens to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Not recorded yet.
    Create,
    /// Recorded but must be deleted and created again.
    Replace {
        /// Why.
        reason: ReplaceReason,
    },
    /// Recorded but no longer declared.
    Delete,
    /// Recorded and unchanged.
    NoOp,
}

impl Action {
    /// Symbol used when printing a plan.
    #[must_use]
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Replace { .. } => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }
}

/// A change to one logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// What happens to it.
    pub action: Action,
    /// Desired spec; `None` for deletions.
    pub spec: Option<ResourceSpec>,
}

/// Counts by action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Resources left alone.
    pub unchanged: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to replace, {} to delete, {} unchanged",
            self.create, self.replace, self.delete, self.unchanged
        )
    }
}

/// Ordered set of changes bringing recorded state to the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Desired resources in creation order, then deletions.
    changes: Vec<PlannedChange>,
    /// Recorded names to remove, dependents first.
    teardown_order: Vec<String>,
}

impl Plan {
    /// Every change, including no-ops.
    #[must_use]
    pub fn changes(&self) -> &[PlannedChange] {
        &self.changes
    }

    /// Look up the change for a logical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.name == name)
    }

    /// Deletions and the removal half of replacements, dependents first.
    #[must_use]
    pub fn teardown(&self) -> Vec<&PlannedChange> {
        self.teardown_order
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// Creations and the creation half of replacements, in creation order.
    #[must_use]
    pub fn build(&self) -> Vec<&PlannedChange> {
        self.changes
            .iter()
            .filter(|c| matches!(c.action, Action::Create | Action::Replace { .. }))
            .collect()
    }

    /// Counts by action.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.action {
                Action::Create => summary.create += 1,
                Action::Replace { .. } => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Whether applying the plan would touch anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action != Action::NoOp)
    }
}

/// Compute the plan that turns `state` into `desired`.
///
/// # Errors
///
/// Returns an error if either graph cannot be ordered.
pub fn plan(desired: &DesiredState, state: &StackState) -> Result<Plan, StackError> {
    let mut changes = Vec::with_capacity(desired.len());
    let mut rebuilt: BTreeSet<&str> = BTreeSet::new();

    for name in desired.creation_order()? {
        let Some(spec) = desired.get(name) else {
            continue;
        };

        let action = match state.resources.get(name) {
            None => Action::Create,
            Some(recorded) if recorded.spec != *spec => Action::Replace {
                reason: ReplaceReason::AttributesChanged,
            },
            Some(_) => spec
                .dependencies()
                .into_iter()
                .find(|dep| rebuilt.contains(dep.as_str()))
                .map_or(Action::NoOp, |dep| Action::Replace {
                    reason: ReplaceReason::DependencyReplaced(dep),
                }),
        };

        if action != Action::NoOp {
            rebuilt.insert(name);
        }

        debug!(resource = name, action = ?action, "Planned");
        changes.push(PlannedChange {
            name: name.to_string(),
            kind: spec.kind(),
            action,
            spec: Some(spec.clone()),
        });
    }

    let recorded_order = state.teardown_order()?;

    for &name in &recorded_order {
        if desired.get(name).is_none() {
            if let Some(recorded) = state.resources.get(name) {
                changes.push(PlannedChange {
                    name: name.to_string(),
                    kind: recorded.kind(),
                    action: Action::Delete,
                    spec: None,
                });
            }
        }
    }

    let teardown_order = recorded_order
        .into_iter()
        .filter(|name| {
            changes.iter().any(|c| {
                c.name == *name && matches!(c.action, Action::Delete | Action::Replace { .. })
            })
        })
        .map(str::to_string)
        .collect();

    Ok(Plan {
        changes,
        teardown_order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cidr::Ipv4Cidr;
    use crate::config::ResolvedConfig;
    use crate::declare::{self, single_node_cluster};

    fn applied(desired: &DesiredState) -> StackState {
        let mut state = StackState::new("test");
        for name in desired.creation_order().unwrap() {
            state.record(name, format!("id-{name}"), desired.get(name).unwrap().clone());
        }
        state
    }

    #[test]
    fn test_fresh_state_creates_everything() {
        let desired = single_node_cluster(&ResolvedConfig::default(), "").unwrap();
        let plan = plan(&desired, &StackState::new("test")).unwrap();

        assert_eq!(plan.summary().create, 7);
        assert!(plan.teardown().is_empty());
        assert_eq!(plan.build().len(), 7);
        assert_eq!(plan.build()[0].name, declare::VPC);
    }

    #[test]
    fn test_unchanged_state_is_noop() {
        let desired = single_node_cluster(&ResolvedConfig::default(), "").unwrap();
        let plan = plan(&desired, &applied(&desired)).unwrap();

        assert!(!plan.has_changes());
        assert_eq!(plan.summary().unchanged, 7);
    }

    #[test]
    fn test_instance_type_change_replaces_only_instance() {
        let original = single_node_cluster(&ResolvedConfig::default(), "").unwrap();
        let config = ResolvedConfig {
            instance_type: "t3.medium".into(),
            ..ResolvedConfig::default()
        };
        let desired = single_node_cluster(&config, "").unwrap();

        let plan = plan(&desired, &applied(&original)).unwrap();
        let summary = plan.summary();
        assert_eq!(summary.replace, 1);
        assert_eq!(summary.unchanged, 6);
        assert_eq!(
            plan.get(declare::SERVER).unwrap().action,
            Action::Replace {
                reason: ReplaceReason::AttributesChanged
            }
        );
    }

    #[test]
    fn test_vpc_change_replaces_dependents() {
        let original = single_node_cluster(&ResolvedConfig::default(), "").unwrap();
        let config = ResolvedConfig {
            vpc_cidr: Ipv4Cidr::parse("10.0.0.0/8").unwrap(),
            ..ResolvedConfig::default()
        };
        let desired = single_node_cluster(&config, "").unwrap();

        let plan = plan(&desired, &applied(&original)).unwrap();
        assert_eq!(plan.summary().replace, 7);
        assert_eq!(
            plan.get(declare::GATEWAY).unwrap().action,
            Action::Replace {
                reason: ReplaceReason::DependencyReplaced(declare::VPC.into())
            }
        );

        let teardown: Vec<&str> = plan.teardown().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(teardown.last(), Some(&declare::VPC));
        let server = teardown.iter().position(|n| *n == declare::SERVER).unwrap();
        let subnet = teardown.iter().position(|n| *n == declare::SUBNET).unwrap();
        assert!(server < subnet);
    }

    #[test]
    fn test_undeclared_resources_deleted() {
        let desired = single_node_cluster(&ResolvedConfig::default(), "").unwrap();
        let mut state = applied(&desired);
        state.record(
            "legacyGateway",
            "igw-old",
            ResourceSpec::InternetGateway(crate::resources::InternetGatewaySpec {
                vpc: declare::VPC.into(),
            }),
        );

        let plan = plan(&desired, &state).unwrap();
        assert_eq!(plan.summary().delete, 1);
        assert_eq!(plan.teardown()[0].name, "legacyGateway");
        assert!(plan.build().is_empty());
    }
}
