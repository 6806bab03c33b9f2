//! Persisted bootstrap progress.
//!
//! Checks are the source of truth for whether a step is done; this file
//! records what the last runs observed so an operator can see where a boot
//! stopped and why.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runner::{RunStatus, StepOutcome};
use crate::steps::StepId;

/// Outcome of one step in the latest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which step.
    pub id: StepId,
    /// What happened.
    pub outcome: StepOutcome,
    /// When the outcome was recorded.
    pub finished_at: String,
}

/// Bootstrap progress saved between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapState {
    /// Number of runs so far, including the current one.
    pub runs: u32,
    /// Latest outcome per step, in step order.
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    /// Overall status of the latest finished run.
    #[serde(default)]
    pub status: Option<RunStatus>,
    /// When the latest run started.
    pub started_at: String,
    /// Timestamp of last update.
    pub updated_at: String,
}

impl Default for BootstrapState {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            runs: 0,
            steps: Vec::new(),
            status: None,
            started_at: now.clone(),
            updated_at: now,
        }
    }

    /// Get the state file path.
    #[must_use]
    pub fn state_file(dir: &Path) -> PathBuf {
        dir.join("bootstrap-state.json")
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

        let content =
            std::fs::read_to_string(&path).context("Failed to read bootstrap state file")?;
        let state: Self =
            serde_json::from_str(&content).context("Failed to parse bootstrap state file")?;

        info!(runs = state.runs, "Loaded bootstrap state");
        Ok(Some(state))
    }

    /// Save state into a directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        std::fs::create_dir_all(dir).context("Failed to create bootstrap state directory")?;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(Self::state_file(dir), content)
            .context("Failed to write bootstrap state file")?;

        Ok(())
    }

    /// Mark the start of a new run.
    pub fn begin_run(&mut self) {
        self.runs += 1;
        self.status = None;
        self.started_at = chrono::Utc::now().to_rfc3339();
    }

    /// Record a step's outcome, replacing any earlier record for it.
    pub fn record(&mut self, id: StepId, outcome: StepOutcome) {
        let record = StepRecord {
            id,
            outcome,
            finished_at: chrono::Utc::now().to_rfc3339(),
        };

        match self.steps.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = record,
            None => {
                self.steps.push(record);
                self.steps.sort_by_key(|r| r.id);
            }
        }
    }

    /// Latest recorded outcome for a step.
    #[must_use]
    pub fn outcome(&self, id: StepId) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.id == id).map(|r| &r.outcome)
    }

    /// Whether the latest run finished successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == Some(RunStatus::Succeeded)
    }
}
