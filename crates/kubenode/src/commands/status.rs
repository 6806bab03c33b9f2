use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use kubenode_bootstrap::config::DEFAULT_STATE_DIR;
use kubenode_bootstrap::{BootstrapState, Host, RunStatus, StepId};

use crate::ui;

/// Show the recorded bootstrap state of this node
#[derive(Args)]
pub struct StatusCommand {
    /// Filesystem root the bootstrap ran against
    #[arg(long, value_name = "DIR", default_value = "/")]
    root: PathBuf,

    /// Node directory holding the bootstrap state file
    #[arg(long, value_name = "DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

impl StatusCommand {
    pub fn run(&self) -> Result<()> {
        let dir = Host::new(&self.root).resolve(&self.state_dir);
        let Some(state) = BootstrapState::load(&dir)? else {
            ui::print_warning(&format!("No bootstrap state in {}", dir.display()));
            return Ok(());
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&state)?);
            return Ok(());
        }

        ui::print_section("Bootstrap status");
        ui::print_kv("runs", &state.runs.to_string());
        ui::print_kv("last started", &state.started_at);
        ui::print_kv("last updated", &state.updated_at);
        let status = match &state.status {
            Some(RunStatus::Succeeded) => "succeeded".to_string(),
            Some(RunStatus::DryRun) => "dry run".to_string(),
            Some(RunStatus::Failed { step }) => format!("failed at {step}"),
            None => "in progress or interrupted".to_string(),
        };
        ui::print_kv("status", &status);
        println!();

        for record in &state.steps {
            ui::print_outcome(
                record.id.step_number(),
                StepId::TOTAL_STEPS,
                record.id.description(),
                &record.outcome,
            );
        }

        if state.is_complete() {
            ui::print_success("All steps satisfied");
        }
        Ok(())
    }
}
