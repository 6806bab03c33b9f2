//! Step-by-step bootstrap with persisted outcomes.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::BootstrapError;
use crate::exec::CommandRunner;
use crate::executor::Executor;
use crate::host::Host;
use crate::state::BootstrapState;
use crate::steps::{Step, StepId};

/// What happened to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Checks passed before anything was done.
    AlreadySatisfied,
    /// Actions ran and the checks now pass.
    Applied,
    /// Dry run: actions would have run.
    WouldApply,
    /// An action failed or the checks still fail afterwards.
    Failed {
        /// Error text.
        error: String,
    },
    /// An earlier step failed.
    NotReached,
}

impl StepOutcome {
    /// Short label for display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadySatisfied => "already satisfied",
            Self::Applied => "applied",
            Self::WouldApply => "would apply",
            Self::Failed { .. } => "failed",
            Self::NotReached => "not reached",
        }
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step is satisfied.
    Succeeded,
    /// Stopped at a failing step; earlier steps may have changed the node.
    Failed {
        /// The step that failed.
        step: StepId,
    },
    /// Nothing was changed.
    DryRun,
}

/// One step's result within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Which step.
    pub id: StepId,
    /// What happened.
    pub outcome: StepOutcome,
    /// Time spent on the step.
    pub elapsed_ms: u64,
}

/// Result of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    /// Per-step results, in order.
    pub steps: Vec<StepReport>,
    /// Overall status.
    pub status: RunStatus,
}

impl BootstrapReport {
    /// Whether every step is satisfied.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Outcome of a step.
    #[must_use]
    pub fn outcome(&self, id: StepId) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.id == id).map(|s| &s.outcome)
    }

    /// Number of steps whose actions ran.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Applied)
            .count()
    }
}

/// Walks the bootstrap steps in order.
pub struct Bootstrapper<R: CommandRunner> {
    steps: Vec<Step>,
    host: Host,
    runner: R,
    state_dir: Option<PathBuf>,
    dry_run: bool,
}

impl<R: CommandRunner> Bootstrapper<R> {
    /// Create a bootstrapper that does not persist state.
    pub fn new(steps: Vec<Step>, host: Host, runner: R) -> Self {
        Self {
            steps,
            host,
            runner,
            state_dir: None,
            dry_run: false,
        }
    }

    /// Persist per-step outcomes under this node path.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Evaluate checks only; never apply actions or write state.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The steps this bootstrapper walks.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns an error only if the state file cannot be read or written;
    /// step failures are reported in the [`BootstrapReport`].
    pub fn run(&self) -> Result<BootstrapReport> {
        let state_dir = self
            .state_dir
            .as_deref()
            .filter(|_| !self.dry_run)
            .map(|dir| self.host.resolve(dir));

        let mut state = match &state_dir {
            Some(dir) => BootstrapState::load(dir)?.unwrap_or_default(),
            None => BootstrapState::new(),
        };
        state.begin_run();

        let executor = Executor::new(&self.host, &self.runner);
        let mut reports = Vec::with_capacity(self.steps.len());
        let mut failed_at = None;

        for step in &self.steps {
            let start = Instant::now();
            let outcome = if failed_at.is_some() {
                StepOutcome::NotReached
            } else {
                self.run_step(&executor, step)
            };

            if matches!(outcome, StepOutcome::Failed { .. }) {
                failed_at = Some(step.id);
            }

            state.record(step.id, outcome.clone());
            if let Some(dir) = &state_dir {
                state.save(dir)?;
            }

            reports.push(StepReport {
                id: step.id,
                outcome,
                elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }

        let status = match failed_at {
            Some(step) => RunStatus::Failed { step },
            None if self.dry_run => RunStatus::DryRun,
            None => RunStatus::Succeeded,
        };

        state.status = Some(status.clone());
        if let Some(dir) = &state_dir {
            state.save(dir)?;
        }

        match &status {
            RunStatus::Succeeded => info!("✅ Bootstrap complete"),
            RunStatus::DryRun => info!("Dry run complete, nothing changed"),
            RunStatus::Failed { step } => error!(step = %step, "Bootstrap stopped"),
        }

        Ok(BootstrapReport {
            steps: reports,
            status,
        })
    }

    fn run_step(&self, executor: &Executor<'_, R>, step: &Step) -> StepOutcome {
        info!(
            "[{}/{}] {}",
            step.id.step_number(),
            StepId::TOTAL_STEPS,
            step.id.description()
        );

        match executor.all_pass(&step.checks) {
            Ok(true) => {
                info!(step = %step.id, "Already satisfied");
                return StepOutcome::AlreadySatisfied;
            }
            Ok(false) if self.dry_run => return StepOutcome::WouldApply,
            Ok(false) => {}
            Err(e) => return failed(step.id, &e),
        }

        if !step.id.is_reentrant() {
            debug!(step = %step.id, "Precondition unmet, applying non-re-entrant step once");
        }

        for action in &step.actions {
            if let Err(e) = executor.apply(action) {
                return failed(step.id, &e);
            }
        }

        match executor.all_pass(&step.checks) {
            Ok(true) => {
                info!("✅ {}", step.id.description());
                StepOutcome::Applied
            }
            Ok(false) => failed(step.id, &BootstrapError::PostconditionUnmet(step.id)),
            Err(e) => failed(step.id, &e),
        }
    }
}

fn failed(step: StepId, e: &BootstrapError) -> StepOutcome {
    error!(step = %step, "{e}");
    StepOutcome::Failed {
        error: e.to_string(),
    }
}
