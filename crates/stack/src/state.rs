//! Recorded stack state.
//!
//! Tracks which provider resource backs each logical name and the spec it
//! was created from, so the next run can diff against it and a failed run
//! can pick up where it stopped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StackError;
use crate::graph::topological_order;
use crate::outputs::Outputs;
use crate::resources::{ResourceKind, ResourceSpec};

/// A resource that exists at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResource {
    /// Provider id (e.g. `vpc-0abc…`).
    pub id: String,
    /// Spec the resource was created from.
    pub spec: ResourceSpec,
    /// Logical names it depended on at creation time.
    pub depends_on: Vec<String>,
    /// When it was created.
    pub created_at: String,
}

impl RecordedResource {
    /// Kind of the recorded resource.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }
}

/// Everything known about a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackState {
    /// Stack name.
    pub stack: String,
    /// Recorded resources by logical name.
    #[serde(default)]
    pub resources: BTreeMap<String, RecordedResource>,
    /// Last published outputs.
    #[serde(default)]
    pub outputs: Option<Outputs>,
    /// Timestamp of last update.
    pub updated_at: String,
}

impl StackState {
    /// Create an empty state.
    #[must_use]
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            resources: BTreeMap::new(),
            outputs: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get the state file path.
    #[must_use]
    pub fn state_file(dir: &Path) -> PathBuf {
        dir.join("stack-state.json")
    }

    /// Load state from a directory.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::state_file(dir);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).context("Failed to read stack state file")?;
        let state: Self =
            serde_json::from_str(&content).context("Failed to parse stack state file")?;

        info!(
            stack = %state.stack,
            resources = state.resources.len(),
            "Loaded stack state"
        );
        Ok(Some(state))
    }

    /// Load state, or start empty if none exists.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_new(dir: &Path, stack: &str) -> Result<Self> {
        Ok(Self::load(dir)?.unwrap_or_else(|| Self::new(stack)))
    }

    /// Save state into a directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        std::fs::create_dir_all(dir).context("Failed to create state directory")?;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(Self::state_file(dir), content).context("Failed to write state file")?;

        Ok(())
    }

    /// Record a freshly created resource.
    pub fn record(&mut self, name: impl Into<String>, id: impl Into<String>, spec: ResourceSpec) {
        let depends_on = spec.dependencies();
        self.resources.insert(
            name.into(),
            RecordedResource {
                id: id.into(),
                spec,
                depends_on,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        );
    }

    /// Forget a deleted resource.
    pub fn forget(&mut self, name: &str) -> Option<RecordedResource> {
        self.resources.remove(name)
    }

    /// Provider id backing a logical name.
    #[must_use]
    pub fn provider_id(&self, name: &str) -> Option<&str> {
        self.resources.get(name).map(|r| r.id.as_str())
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Recorded resources ordered so dependents come before their dependencies.
    ///
    /// Dependencies that are no longer recorded are ignored.
    ///
    /// # Errors
    /// Returns an error if the recorded dependencies form a cycle.
    pub fn teardown_order(&self) -> Result<Vec<&str>, StackError> {
        let deps: BTreeMap<&str, Vec<String>> = self
            .resources
            .iter()
            .map(|(name, r)| {
                let live = r
                    .depends_on
                    .iter()
                    .filter(|d| self.resources.contains_key(d.as_str()))
                    .cloned()
                    .collect();
                (name.as_str(), live)
            })
            .collect();

        let mut order = topological_order(&deps)?;
        order.reverse();
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cidr::Ipv4Cidr;
    use crate::resources::{InternetGatewaySpec, VpcSpec};
    use tempfile::TempDir;

    fn vpc_spec() -> ResourceSpec {
        ResourceSpec::Vpc(VpcSpec {
            cidr_block: Ipv4Cidr::parse("10.0.0.0/16").unwrap(),
            enable_dns_hostnames: true,
            enable_dns_support: true,
        })
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut state = StackState::new("dev");
        state.record("vpc", "vpc-123", vpc_spec());
        state.outputs = Some(Outputs::new(Some("1.2.3.4".into()), Some("host".into())));
        state.save(dir.path()).unwrap();

        let loaded = StackState::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.provider_id("vpc"), Some("vpc-123"));
        assert_eq!(loaded.outputs.unwrap().url.as_deref(), Some("http://host"));
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(StackState::load(dir.path()).unwrap().is_none());
        assert!(StackState::load_or_new(dir.path(), "dev").unwrap().is_empty());
    }

    #[test]
    fn test_teardown_order_ignores_forgotten_dependencies() {
        let mut state = StackState::new("dev");
        state.record("vpc", "vpc-1", vpc_spec());
        state.record(
            "gateway",
            "igw-1",
            ResourceSpec::InternetGateway(InternetGatewaySpec { vpc: "vpc".into() }),
        );
        assert_eq!(state.teardown_order().unwrap(), vec!["gateway", "vpc"]);

        state.forget("vpc");
        assert_eq!(state.teardown_order().unwrap(), vec!["gateway"]);
    }
}
